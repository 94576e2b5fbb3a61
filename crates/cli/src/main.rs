//! SCO loopback harness
//!
//! Runs a test session over an in-process link that hands every sent packet
//! straight back as a received one, optionally flagging or bit-flipping
//! packets on the way.
//!
//! ```text
//! scobridge --mode counter --frames 2000 --corrupt-every 50
//! scobridge --codec msbc --wav sco_input.wav --pace-ms 7
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use scobridge_codec_core::CodecId;
use scobridge_core::logging::parse_log_level;
use scobridge_core::{
    setup_logging, LinkTransport, LoggingConfig, LoopbackLink, PatternMode, Session,
    SessionConfig, SessionState,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Connection handle used on the loopback link
const LOOPBACK_HANDLE: u16 = 0x0001;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    Cvsd,
    Msbc,
}

impl From<CodecArg> for CodecId {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::Cvsd => CodecId::Cvsd,
            CodecArg::Msbc => CodecId::Msbc,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "scobridge", version, about = "SCO audio link test bridge")]
struct Args {
    /// Session configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Test pattern (sine, ascii, counter, fill55, fill00)
    #[arg(short, long)]
    mode: Option<PatternMode>,

    /// Negotiated codec
    #[arg(long, value_enum, default_value = "cvsd")]
    codec: CodecArg,

    /// Number of frames to send
    #[arg(short = 'n', long, default_value = "1000")]
    frames: u64,

    /// Flag every n-th packet as damaged (0 = never)
    #[arg(long, default_value = "0")]
    corrupt_every: u64,

    /// Probability of flipping each payload bit
    #[arg(long, default_value = "0.0")]
    bit_error_rate: f64,

    /// Seed for the corruption generator
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Capture decoded audio to this WAV file
    #[arg(short, long)]
    wav: Option<PathBuf>,

    /// Sent frames between send reports
    #[arg(long)]
    report_period: Option<u32>,

    /// Milliseconds between send events (0 = as fast as possible)
    #[arg(long, default_value = "0")]
    pace_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(path) = &self.wav {
            config.capture.wav_path = Some(path.clone());
        }
        if let Some(period) = self.report_period {
            config.report_period = period;
        }
        Ok(config)
    }
}

/// Send one frame and feed back whatever the link delivered
fn step(session: &mut Session, link: &mut LoopbackLink) {
    if let Err(e) = session.send_frame(link, LOOPBACK_HANDLE) {
        warn!("Send failed: {}", e);
    }
    while let Some(packet) = link.receive() {
        session.receive_packet(&packet);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = parse_log_level(&args.log_level)?;
    setup_logging(&LoggingConfig::new(level, "scobridge"))?;

    let config = args.session_config()?;
    let mut link = LoopbackLink::new(config.payload_len)
        .with_seed(args.seed)
        .with_corrupt_every(args.corrupt_every)
        .with_bit_error_rate(args.bit_error_rate);

    let mut session = Session::new(config)?;
    if let Some(setting) = session.voice_setting() {
        info!("Using voice setting 0x{:04x}", setting);
    }
    session.set_codec(args.codec.into());

    info!(
        "Sending {} frames of {} bytes",
        args.frames,
        link.packet_len()
    );

    if args.pace_ms == 0 {
        for _ in 0..args.frames {
            if session.state() == SessionState::Closed {
                break;
            }
            step(&mut session, &mut link);
        }
    } else {
        let mut ticker = tokio::time::interval(Duration::from_millis(args.pace_ms));
        let mut sent = 0;
        while sent < args.frames && session.state() != SessionState::Closed {
            tokio::select! {
                _ = ticker.tick() => {
                    step(&mut session, &mut link);
                    sent += 1;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }
    }

    let summary = session.close();
    println!("{}", summary);
    if link.flagged() > 0 || link.bit_errors() > 0 {
        println!(
            "link: {} packets flagged, {} bits flipped",
            link.flagged(),
            link.bit_errors()
        );
    }
    Ok(())
}
