//! # Codec-Core: SCO Link Codec Adapters
//!
//! This library adapts frame-oriented speech coders to the byte-sliced
//! transport of a Bluetooth SCO link and hides lost or damaged frames
//! behind packet loss concealment.
//!
//! ## Features
//!
//! - **CVSD**: 8 kHz narrowband path; the controller transcodes, the host
//!   classifies frames and conceals the lost ones
//! - **mSBC**: 16 kHz wideband path with H2 framing, stream buffering on
//!   the send side and frame reassembly on the receive side
//! - **Concealment**: pattern-matching PLC tuned per codec
//! - **Reference coder**: a self-contained 57-byte frame coder with a
//!   CRC-8 check, used when no SBC implementation is plugged in
//!
//! ## Usage
//!
//! ```rust
//! use scobridge_codec_core::adpcm::{AdpcmFrameDecoder, AdpcmFrameEncoder};
//! use scobridge_codec_core::msbc::{MsbcDecodeAdapter, MsbcEncodeAdapter, H2_UNIT_LEN};
//!
//! let mut encoder = MsbcEncodeAdapter::new(AdpcmFrameEncoder::new());
//! let mut decoder = MsbcDecodeAdapter::new(AdpcmFrameDecoder::new());
//!
//! encoder.encode_frame(&[0i16; 120])?;
//! let mut unit = [0u8; H2_UNIT_LEN];
//! encoder.read_encoded(&mut unit);
//!
//! let mut decoded = 0;
//! decoder.process_data(false, &unit, |frame| decoded += frame.pcm.len());
//! assert_eq!(decoded, 120);
//! # Ok::<(), scobridge_codec_core::CodecError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod adpcm;
pub mod cvsd;
pub mod error;
pub mod msbc;
pub mod plc;
pub mod types;

// Re-export commonly used types and traits
pub use cvsd::CvsdDecoder;
pub use error::{CodecError, ErrorCategory, Result};
pub use msbc::{MsbcDecodeAdapter, MsbcEncodeAdapter};
pub use plc::{Concealer, PlcParams};
pub use types::{
    CodecId, DecodedFrame, DecoderStats, FrameDecoder, FrameEncoder, FrameKind, Pcm, PcmFormat,
};

/// Version information for the codec library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supported codec types
pub const SUPPORTED_CODECS: &[CodecId] = &[CodecId::Cvsd, CodecId::Msbc];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_supported_codecs() {
        assert!(SUPPORTED_CODECS.contains(&CodecId::Cvsd));
        assert!(SUPPORTED_CODECS.contains(&CodecId::Msbc));
    }
}
