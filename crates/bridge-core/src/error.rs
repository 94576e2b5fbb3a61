//! Error handling for bridge sessions
//!
//! Nothing in the per-frame send and receive paths returns these errors.
//! They come from loading configuration, opening or writing sinks, and
//! handing packets to a link transport.

#![allow(missing_docs)]

use scobridge_codec_core::CodecError;
use std::fmt;
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration file could not be parsed or holds invalid values
    #[error("Configuration error: {details}")]
    Config { details: String },

    /// A playback sink could not be opened
    #[error("Failed to open {sink} sink: {reason}")]
    SinkOpen { sink: String, reason: String },

    /// A playback sink rejected a write
    #[error("Failed to write to {sink} sink: {reason}")]
    SinkWrite { sink: String, reason: String },

    /// No output device is available
    #[error("Audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    /// Link transport refused a packet
    #[error("Link transport error: {reason}")]
    Transport { reason: String },

    /// Codec adapter error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encoder failure
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// TOML parse failure
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    /// Create a new configuration error
    pub fn config(details: impl Into<String>) -> Self {
        Self::Config {
            details: details.into(),
        }
    }

    /// Create a new sink open error
    pub fn sink_open(sink: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::SinkOpen {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new sink write error
    pub fn sink_write(sink: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::SinkWrite {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new device unavailable error
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Check if the session can keep pumping frames after this error
    ///
    /// Sink and transport failures only disable a feature or lose a frame.
    /// Configuration problems stop the session before it starts.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config { .. } | Self::Toml(_) => false,
            Self::Codec(e) => e.is_recoverable(),
            _ => true,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } | Self::Toml(_) => ErrorCategory::Configuration,
            Self::SinkOpen { .. } | Self::SinkWrite { .. } | Self::Wav(_) | Self::Io(_) => {
                ErrorCategory::Sink
            }
            Self::DeviceUnavailable { .. } => ErrorCategory::Device,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Codec(_) => ErrorCategory::Codec,
        }
    }
}

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration and parameter errors
    Configuration,
    /// File capture errors
    Sink,
    /// Output device errors
    Device,
    /// Link transport errors
    Transport,
    /// Codec adapter errors
    Codec,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Sink => write!(f, "Sink"),
            Self::Device => write!(f, "Device"),
            Self::Transport => write!(f, "Transport"),
            Self::Codec => write!(f, "Codec"),
        }
    }
}
