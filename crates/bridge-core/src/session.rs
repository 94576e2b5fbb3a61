//! SCO test session
//!
//! A [`Session`] owns everything one test run needs: the signal source, the
//! codec adapters for the negotiated codec, the integrity monitor, the
//! playback sinks and the capture bookkeeping. The link drives it through
//! three entry points:
//!
//! - [`Session::set_codec`] once negotiation completes
//! - [`Session::send_frame`] on every "can send now" event
//! - [`Session::receive_packet`] for every packet received
//!
//! ```text
//!  Idle ──set_codec──▶ CodecNegotiated ──send/receive──▶ Streaming
//!                                                          │
//!                   capture target reached or close()      ▼
//!                                                        Closed
//! ```
//!
//! Received packets are inspected by the integrity monitor first; decoding
//! only happens afterwards and only in sine mode.

use crate::config::{PlaybackBackend, SessionConfig};
use crate::device::default_output_sink;
use crate::error::{BridgeError, Result};
use crate::integrity::{FrameInspection, IntegrityMonitor, ReceiveSummary, SendReport};
use crate::link::{encode_header, FrameStatus, LinkFrame, LinkTransport, SCO_HEADER_LEN};
use crate::pattern::{signal_source, PatternMode, SignalSource};
use crate::sink::{EncodedCapture, PlaybackSink, WavFileSink};
use bytes::{BufMut, BytesMut};
use scobridge_codec_core::adpcm::{AdpcmFrameDecoder, AdpcmFrameEncoder};
use scobridge_codec_core::{
    CodecId, CvsdDecoder, DecodedFrame, DecoderStats, FrameDecoder, FrameEncoder,
    MsbcDecodeAdapter, MsbcEncodeAdapter,
};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Voice setting for transparent 8-bit data, used by the byte-pattern modes
pub const TRANSPARENT_VOICE_SETTING: u16 = 0x0003;

/// Factory producing a fresh wideband coder pair for each negotiation
pub type CoderFactory = Box<dyn Fn() -> (Box<dyn FrameEncoder>, Box<dyn FrameDecoder>) + Send>;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for codec negotiation
    Idle,
    /// Codec known, no traffic yet
    CodecNegotiated,
    /// Frames flowing
    Streaming,
    /// Finished; events are ignored
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::CodecNegotiated => write!(f, "CodecNegotiated"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Final tallies of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Codec in use at close
    pub codec: Option<CodecId>,
    /// Frames sent
    pub sent: u64,
    /// Frames received
    pub received: u64,
    /// Receive counters across all windows
    pub totals: ReceiveSummary,
    /// Codec quality tallies
    pub decoder: DecoderStats,
    /// Decoded samples handed to sinks
    pub samples_captured: u64,
    /// Wideband encoder stream underruns
    pub encoder_underruns: u64,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.codec {
            Some(codec) => write!(f, "{}: ", codec)?,
            None => write!(f, "no codec: ")?,
        }
        write!(
            f,
            "sent {}, received {}, {}, {}",
            self.sent, self.received, self.totals, self.decoder
        )
    }
}

enum DecodePath {
    Cvsd(CvsdDecoder),
    Msbc(MsbcDecodeAdapter<Box<dyn FrameDecoder>>),
}

impl DecodePath {
    fn stats(&self) -> DecoderStats {
        match self {
            Self::Cvsd(decoder) => decoder.stats(),
            Self::Msbc(decoder) => decoder.stats(),
        }
    }
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    config: SessionConfig,
    source: Option<Box<dyn SignalSource>>,
    sinks: Vec<Box<dyn PlaybackSink>>,
    coders: Option<CoderFactory>,
}

impl SessionBuilder {
    /// Replace the signal source derived from the configured mode
    pub fn with_source(mut self, source: impl SignalSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Add a playback sink next to those named in the configuration
    pub fn with_sink(mut self, sink: impl PlaybackSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Use a different wideband coder pair
    ///
    /// Defaults to the reference ADPCM coder.
    pub fn with_frame_coders<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> (Box<dyn FrameEncoder>, Box<dyn FrameDecoder>) + Send + 'static,
    {
        self.coders = Some(Box::new(factory));
        self
    }

    /// Validate the configuration and create the session
    ///
    /// Encoded capture files that cannot be created are reported and left
    /// out; the session still starts.
    pub fn build(self) -> Result<Session> {
        let config = self.config;
        config.validate()?;

        let source = self.source.unwrap_or_else(|| signal_source(config.mode));
        if source.mode() != config.mode {
            return Err(BridgeError::config(format!(
                "signal source produces {} but the session is configured for {}",
                source.mode(),
                config.mode
            )));
        }

        let mut sinks = self.sinks;
        if let Some(path) = &config.capture.wav_path {
            sinks.push(Box::new(WavFileSink::new(path)));
        }
        if config.playback.backend == PlaybackBackend::Device {
            sinks.extend(default_output_sink());
        }

        let coders: CoderFactory = match self.coders {
            Some(coders) => coders,
            None => Box::new(reference_coders),
        };

        let encoded_out = open_encoded_capture(config.capture.encoded_out_path.as_deref());
        let encoded_in = open_encoded_capture(config.capture.encoded_in_path.as_deref());

        let monitor = IntegrityMonitor::new(config.mode)
            .with_window_bytes(config.receive_window_bytes)
            .with_report_period(config.report_period)
            .with_colored_dumps(config.colored_dumps);

        info!(
            "SCO session: mode {}, {}-byte payloads, {} sink(s)",
            config.mode,
            config.payload_len,
            sinks.len()
        );

        Ok(Session {
            packet: BytesMut::with_capacity(SCO_HEADER_LEN + config.payload_len),
            config,
            state: SessionState::Idle,
            codec: None,
            source,
            monitor,
            sinks,
            coders,
            encoder: None,
            decoder: None,
            samples: Vec::new(),
            encoded_out,
            encoded_in,
            capture_target: None,
            samples_captured: 0,
            summary: None,
        })
    }
}

fn reference_coders() -> (Box<dyn FrameEncoder>, Box<dyn FrameDecoder>) {
    (
        Box::new(AdpcmFrameEncoder::new()),
        Box::new(AdpcmFrameDecoder::new()),
    )
}

fn open_encoded_capture(path: Option<&Path>) -> Option<EncodedCapture> {
    match EncodedCapture::create(path?) {
        Ok(capture) => Some(capture),
        Err(e) => {
            warn!("Encoded capture disabled: {}", e);
            None
        }
    }
}

/// One SCO test session
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    codec: Option<CodecId>,
    source: Box<dyn SignalSource>,
    monitor: IntegrityMonitor,
    sinks: Vec<Box<dyn PlaybackSink>>,
    coders: CoderFactory,
    encoder: Option<MsbcEncodeAdapter<Box<dyn FrameEncoder>>>,
    decoder: Option<DecodePath>,
    samples: Vec<i16>,
    packet: BytesMut,
    encoded_out: Option<EncodedCapture>,
    encoded_in: Option<EncodedCapture>,
    capture_target: Option<u64>,
    samples_captured: u64,
    summary: Option<SessionSummary>,
}

impl Session {
    /// Create a session with the sinks and source named by `config`
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a session with injected parts
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            source: None,
            sinks: Vec::new(),
            coders: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated codec, if any
    pub fn codec(&self) -> Option<CodecId> {
        self.codec
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Integrity monitor with its running counters
    pub fn monitor(&self) -> &IntegrityMonitor {
        &self.monitor
    }

    /// Sinks still accepting audio
    pub fn active_sinks(&self) -> usize {
        self.sinks.len()
    }

    /// Voice setting the link should be opened with
    ///
    /// Byte-pattern modes need the controller to pass data through
    /// untouched; sine mode uses the link default.
    pub fn voice_setting(&self) -> Option<u16> {
        (!self.config.mode.is_audio()).then_some(TRANSPARENT_VOICE_SETTING)
    }

    /// Apply the negotiated codec
    ///
    /// Re-signalling the current codec is a no-op. A different codec resets
    /// the decode and encode adapters, reopens the sinks in the new PCM
    /// format and restarts the capture window.
    pub fn set_codec(&mut self, codec: CodecId) {
        if self.state == SessionState::Closed {
            debug!("Ignoring codec {} on closed session", codec);
            return;
        }
        if self.codec == Some(codec) {
            return;
        }
        info!("SCO codec negotiated: {}", codec);

        match codec {
            CodecId::Cvsd => {
                self.decoder = Some(DecodePath::Cvsd(CvsdDecoder::new()));
                self.encoder = None;
            }
            CodecId::Msbc => {
                let (encoder, decoder) = (self.coders)();
                self.decoder = Some(DecodePath::Msbc(MsbcDecodeAdapter::new(decoder)));
                let mut encoder = MsbcEncodeAdapter::new(encoder);
                if self.config.mode == PatternMode::Sine {
                    self.samples.resize(encoder.samples_per_frame(), 0);
                    // One frame primes the stream so the first send has data
                    self.source.fill_samples(&mut self.samples);
                    if let Err(e) = encoder.encode_frame(&self.samples) {
                        warn!("Failed to prime mSBC encoder: {}", e);
                    }
                }
                self.encoder = Some(encoder);
            }
        }
        self.codec = Some(codec);
        self.samples_captured = 0;
        self.capture_target = None;

        if self.config.mode.is_audio() {
            self.sinks.retain_mut(|sink| match sink.open(codec) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Disabling {} sink: {}", sink.name(), e);
                    false
                }
            });
            if !self.sinks.is_empty() && self.config.capture.duration_secs > 0 {
                let rate = u64::from(codec.pcm_format().sample_rate);
                self.capture_target = Some(u64::from(self.config.capture.duration_secs) * rate);
            }
        }

        self.state = SessionState::CodecNegotiated;
    }

    /// Build and send one packet on `handle`, then ask for the next event
    ///
    /// Returns the send report when a report period ends. Handle 0 and a
    /// closed session send nothing.
    pub fn send_frame<T>(&mut self, transport: &mut T, handle: u16) -> Result<Option<SendReport>>
    where
        T: LinkTransport + ?Sized,
    {
        if handle == 0 || self.state == SessionState::Closed {
            return Ok(None);
        }

        let packet_len = transport.packet_len();
        let payload_len = packet_len
            .checked_sub(SCO_HEADER_LEN)
            .and_then(|len| u8::try_from(len).ok())
            .ok_or_else(|| {
                BridgeError::transport(format!("unusable SCO packet length {}", packet_len))
            })?;

        self.packet.clear();
        self.packet
            .put_slice(&encode_header(handle, FrameStatus::Good, payload_len));
        self.packet.resize(packet_len, 0);
        let payload = &mut self.packet[SCO_HEADER_LEN..];

        match self.encoder.as_mut() {
            Some(encoder) if self.config.mode == PatternMode::Sine => {
                encoder.read_encoded(payload);
                if let Some(capture) = self.encoded_out.as_mut() {
                    if let Err(e) = capture.write(payload) {
                        warn!("Encoded capture disabled: {}", e);
                        self.encoded_out = None;
                    }
                }
                self.samples.resize(encoder.samples_per_frame(), 0);
                while encoder.can_encode_frame_now() {
                    self.source.fill_samples(&mut self.samples);
                    if let Err(e) = encoder.encode_frame(&self.samples) {
                        warn!("mSBC encode failed: {}", e);
                        break;
                    }
                }
            }
            _ => self.source.fill_payload(payload),
        }

        transport.send_packet(&self.packet)?;
        transport.request_can_send_now();

        if self.state == SessionState::CodecNegotiated {
            self.state = SessionState::Streaming;
        }
        Ok(self.monitor.record_sent())
    }

    /// Handle one received packet
    ///
    /// Returns the integrity verdict, or `None` on a closed session.
    pub fn receive_packet(&mut self, packet: &[u8]) -> Option<FrameInspection> {
        if self.state == SessionState::Closed {
            return None;
        }

        let frame = LinkFrame::parse(packet);
        let inspection = self.monitor.observe(&frame);

        if self.config.mode == PatternMode::Sine {
            self.decode(inspection.corrupted, frame.payload);
        }
        Some(inspection)
    }

    fn decode(&mut self, corrupted: bool, payload: &[u8]) {
        let Some(codec) = self.codec else {
            return;
        };
        if self.state == SessionState::CodecNegotiated {
            self.state = SessionState::Streaming;
        }

        let window_open = self
            .capture_target
            .is_none_or(|target| self.samples_captured < target);
        if codec == CodecId::Msbc && window_open {
            if let Some(capture) = self.encoded_in.as_mut() {
                if let Err(e) = capture.write(payload) {
                    warn!("Encoded capture disabled: {}", e);
                    self.encoded_in = None;
                }
            }
        }

        let sinks = &mut self.sinks;
        let captured = &mut self.samples_captured;
        let target = self.capture_target;
        match self.decoder.as_mut() {
            Some(DecodePath::Cvsd(decoder)) => decoder.process_frame(corrupted, payload, |frame| {
                deliver(sinks, captured, target, frame)
            }),
            Some(DecodePath::Msbc(decoder)) => decoder.process_data(corrupted, payload, |frame| {
                deliver(sinks, captured, target, frame)
            }),
            None => {}
        }

        if target.is_some_and(|target| self.samples_captured >= target) {
            info!("Capture complete after {} samples", self.samples_captured);
            self.close();
        }
    }

    /// Tallies so far
    pub fn summary(&self) -> SessionSummary {
        let report = self.monitor.report();
        SessionSummary {
            codec: self.codec,
            sent: report.sent,
            received: report.received,
            totals: self.monitor.totals(),
            decoder: self
                .decoder
                .as_ref()
                .map(DecodePath::stats)
                .unwrap_or_default(),
            samples_captured: self.samples_captured,
            encoder_underruns: self.encoder.as_ref().map_or(0, |e| e.underruns()),
        }
    }

    /// Finalise sinks and captures and report the codec tallies
    ///
    /// Calling it again returns the same summary without side effects.
    pub fn close(&mut self) -> SessionSummary {
        if let Some(summary) = self.summary {
            return summary;
        }

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.close() {
                warn!("Failed to close {} sink: {}", sink.name(), e);
            }
        }
        for capture in [self.encoded_out.as_mut(), self.encoded_in.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = capture.finish() {
                warn!("Failed to finish encoded capture: {}", e);
            }
        }

        let summary = self.summary();
        match summary.codec {
            Some(CodecId::Msbc) => info!(
                "mSBC: good frames {}, zero frames {}, bad frames {}",
                summary.decoder.good_frames, summary.decoder.zero_frames, summary.decoder.bad_frames
            ),
            Some(CodecId::Cvsd) => info!(
                "CVSD: good frames {}, bad frames {}",
                summary.decoder.good_frames, summary.decoder.bad_frames
            ),
            None => {}
        }
        info!("SCO session closed: {}", summary);

        self.state = SessionState::Closed;
        self.summary = Some(summary);
        summary
    }
}

/// Hand one decoded frame to every sink, up to the capture target
fn deliver(
    sinks: &mut Vec<Box<dyn PlaybackSink>>,
    captured: &mut u64,
    target: Option<u64>,
    frame: DecodedFrame<'_>,
) {
    let pcm = match target {
        Some(target) => {
            let left = target.saturating_sub(*captured);
            if left == 0 {
                return;
            }
            frame.pcm.truncate(usize::try_from(left).unwrap_or(usize::MAX))
        }
        None => frame.pcm,
    };

    sinks.retain_mut(|sink| match sink.write(pcm) {
        Ok(()) => true,
        Err(e) => {
            warn!("Disabling {} sink: {}", sink.name(), e);
            false
        }
    });
    *captured += pcm.len() as u64;
}
