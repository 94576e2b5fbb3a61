//! Error handling for the codec adapters
//!
//! Per-frame decode paths never surface these errors to the link; they are
//! used by the frame coders and converted into concealment by the adapters.

#![allow(missing_docs)]

use std::fmt;
use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for codec operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Invalid frame size
    #[error("Invalid frame size: expected {expected}, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Coder frame did not start with the expected sync word
    #[error("Lost sync: expected 0x{expected:02x}, got 0x{actual:02x}")]
    SyncLost { expected: u8, actual: u8 },

    /// Coder frame checksum mismatch
    #[error("CRC mismatch: frame carries 0x{stored:02x}, computed 0x{computed:02x}")]
    CrcMismatch { stored: u8, computed: u8 },

    /// Invalid payload data
    #[error("Invalid payload data: {details}")]
    InvalidPayload { details: String },

    /// Encoding operation failed
    #[error("Encoding failed: {reason}")]
    EncodingFailed { reason: String },

    /// Buffer overflow during operation
    #[error("Buffer overflow: attempted to write {size} bytes with {free} bytes free")]
    BufferOverflow { size: usize, free: usize },

    /// Stream buffer does not hold enough encoded bytes
    #[error("Stream underrun: requested {requested} bytes, {available} available")]
    StreamUnderrun { requested: usize, available: usize },

    /// Codec identity not recognised
    #[error("Unsupported codec: {codec}")]
    UnsupportedCodec { codec: String },
}

impl CodecError {
    /// Create a new invalid payload error
    pub fn invalid_payload(details: impl Into<String>) -> Self {
        Self::InvalidPayload {
            details: details.into(),
        }
    }

    /// Create a new encoding failed error
    pub fn encoding_failed(reason: impl Into<String>) -> Self {
        Self::EncodingFailed {
            reason: reason.into(),
        }
    }

    /// Create a new unsupported codec error
    pub fn unsupported_codec(codec: impl Into<String>) -> Self {
        Self::UnsupportedCodec {
            codec: codec.into(),
        }
    }

    /// Check if the stream can continue after this error
    ///
    /// Everything a bad frame can cause is recoverable through concealment;
    /// only configuration mistakes are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::UnsupportedCodec { .. })
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedCodec { .. } => ErrorCategory::Configuration,

            Self::InvalidFrameSize { .. }
            | Self::SyncLost { .. }
            | Self::CrcMismatch { .. }
            | Self::InvalidPayload { .. } => ErrorCategory::Corruption,

            Self::EncodingFailed { .. } => ErrorCategory::Processing,

            Self::BufferOverflow { .. } | Self::StreamUnderrun { .. } => ErrorCategory::Pacing,
        }
    }
}

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration and parameter errors
    Configuration,
    /// Damaged or unparseable coder data
    Corruption,
    /// Audio processing errors
    Processing,
    /// Producer/consumer cadence mismatch
    Pacing,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Corruption => write!(f, "Corruption"),
            Self::Processing => write!(f, "Processing"),
            Self::Pacing => write!(f, "Pacing"),
        }
    }
}
