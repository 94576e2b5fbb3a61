//! # Bridge-Core: SCO Audio Test Sessions
//!
//! This library drives both directions of a Bluetooth SCO audio link for
//! testing. It generates deterministic test signals, slices them into link
//! packets, reconstructs playable audio on the receive side and verifies
//! what arrived.
//!
//! ## Components
//!
//! - [`pattern`]: sine, ASCII, counter and fill signal sources
//! - [`elastic`]: prebuffered playback buffer between packet rate and
//!   device rate
//! - [`integrity`]: controller-status classification, pattern verification
//!   and periodic reports
//! - [`link`]: SCO packet framing, the transport seam and a loopback link
//! - [`sink`] and [`device`]: WAV capture and live playback
//! - [`session`]: the session object tying the above together
//!
//! ## Usage
//!
//! ```rust
//! use scobridge_core::{LoopbackLink, PatternMode, Session, SessionConfig};
//! use scobridge_codec_core::CodecId;
//!
//! let mut session = Session::new(SessionConfig::new(PatternMode::Counter))?;
//! session.set_codec(CodecId::Cvsd);
//!
//! let mut link = LoopbackLink::new(24);
//! for _ in 0..10 {
//!     session.send_frame(&mut link, 1)?;
//!     while let Some(packet) = link.receive() {
//!         session.receive_packet(&packet);
//!     }
//! }
//!
//! let summary = session.close();
//! assert_eq!(summary.received, 10);
//! assert_eq!(summary.totals.byte_errors, 0);
//! # Ok::<(), scobridge_core::BridgeError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod device;
pub mod elastic;
pub mod error;
pub mod integrity;
pub mod link;
pub mod logging;
pub mod pattern;
pub mod session;
pub mod sink;

pub use config::{CaptureConfig, PlaybackBackend, PlaybackConfig, SessionConfig};
pub use device::{DevicePlaybackSink, MemoryOutputDevice, OutputDevice};
pub use elastic::{ElasticBuffer, ElasticReader, ElasticStats, ElasticWriter, PlaybackProfile};
pub use error::{BridgeError, ErrorCategory, Result};
pub use integrity::{FrameInspection, IntegrityMonitor, ReceiveSummary, SendReport};
pub use link::{FrameStatus, LinkFrame, LinkTransport, LoopbackLink};
pub use logging::{setup_logging, LoggingConfig};
pub use pattern::{signal_source, PatternMode, SignalSource};
pub use session::{Session, SessionBuilder, SessionState, SessionSummary};
pub use sink::{EncodedCapture, PlaybackSink, WavFileSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
