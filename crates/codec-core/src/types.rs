//! Core types and traits for the codec adapters
//!
//! This module defines the codec identity negotiated for a link, the PCM
//! formats each codec produces, and the frame-oriented contracts the
//! adapters use to drive the bit-level coders.

use crate::error::{CodecError, Result};
use std::fmt;

/// Frame-based encoder contract
///
/// The adapter hands the encoder exactly [`FrameEncoder::samples_per_frame`]
/// samples and receives exactly [`FrameEncoder::frame_len`] bytes back.
pub trait FrameEncoder: Send {
    /// Number of PCM samples consumed per coder frame
    fn samples_per_frame(&self) -> usize;

    /// Size of one encoded coder frame in bytes
    fn frame_len(&self) -> usize;

    /// Encode one frame of samples into `out`
    ///
    /// # Errors
    ///
    /// Returns an error if `samples` or `out` do not have the frame sizes
    /// reported above.
    fn encode_frame(&mut self, samples: &[i16], out: &mut [u8]) -> Result<()>;

    /// Reset the encoder state
    fn reset(&mut self);
}

/// Frame-based decoder contract
///
/// Implementations carry their own bad-frame detection: a frame that fails
/// sync or checksum validation is rejected with an error instead of being
/// decoded into garbage.
pub trait FrameDecoder: Send {
    /// Number of PCM samples produced per coder frame
    fn samples_per_frame(&self) -> usize;

    /// Size of one encoded coder frame in bytes
    fn frame_len(&self) -> usize;

    /// Decode one coder frame into `out`
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is damaged; `out` is left untouched.
    fn decode_frame(&mut self, frame: &[u8], out: &mut [i16]) -> Result<()>;

    /// Reset the decoder state
    fn reset(&mut self);
}

impl<E: FrameEncoder + ?Sized> FrameEncoder for Box<E> {
    fn samples_per_frame(&self) -> usize {
        (**self).samples_per_frame()
    }

    fn frame_len(&self) -> usize {
        (**self).frame_len()
    }

    fn encode_frame(&mut self, samples: &[i16], out: &mut [u8]) -> Result<()> {
        (**self).encode_frame(samples, out)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn samples_per_frame(&self) -> usize {
        (**self).samples_per_frame()
    }

    fn frame_len(&self) -> usize {
        (**self).frame_len()
    }

    fn decode_frame(&mut self, frame: &[u8], out: &mut [i16]) -> Result<()> {
        (**self).decode_frame(frame, out)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Codec identity negotiated for a SCO link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// CVSD, transcoded by the controller; host sees 8 kHz 8-bit PCM
    Cvsd,
    /// mSBC wideband speech, 16 kHz 16-bit PCM in H2-framed coder frames
    Msbc,
}

impl CodecId {
    /// Get the codec name
    pub fn name(self) -> &'static str {
        match self {
            Self::Cvsd => "CVSD",
            Self::Msbc => "mSBC",
        }
    }

    /// Look up the codec by its hands-free profile codec id
    pub fn from_hfp_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Self::Cvsd),
            2 => Ok(Self::Msbc),
            other => Err(CodecError::unsupported_codec(format!("HFP codec id {}", other))),
        }
    }

    /// Hands-free profile codec id
    pub fn hfp_id(self) -> u8 {
        match self {
            Self::Cvsd => 1,
            Self::Msbc => 2,
        }
    }

    /// PCM format produced on the host side
    pub fn pcm_format(self) -> PcmFormat {
        match self {
            Self::Cvsd => PcmFormat {
                sample_rate: 8000,
                bytes_per_sample: 1,
            },
            Self::Msbc => PcmFormat {
                sample_rate: 16000,
                bytes_per_sample: 2,
            },
        }
    }

    /// Samples in one concealment unit (link frame for CVSD, coder frame for mSBC)
    pub fn samples_per_frame(self) -> usize {
        match self {
            Self::Cvsd => crate::cvsd::CVSD_FRAME_SAMPLES,
            Self::Msbc => crate::msbc::MSBC_SAMPLES_PER_FRAME,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mono PCM format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bytes per sample (1 = signed 8-bit, 2 = signed 16-bit little-endian)
    pub bytes_per_sample: usize,
}

impl PcmFormat {
    /// Bytes needed for `ms` milliseconds of audio
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        (ms * self.sample_rate / 1000) as usize * self.bytes_per_sample
    }

    /// Bits per sample
    pub fn bits_per_sample(&self) -> u16 {
        (self.bytes_per_sample * 8) as u16
    }
}

/// Borrowed block of decoded PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pcm<'a> {
    /// Signed 8-bit samples (CVSD path)
    I8(&'a [i8]),
    /// Signed 16-bit samples (mSBC path)
    I16(&'a [i16]),
}

impl<'a> Pcm<'a> {
    /// Number of samples in the block
    pub fn len(&self) -> usize {
        match self {
            Self::I8(s) => s.len(),
            Self::I16(s) => s.len(),
        }
    }

    /// Check if the block holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the first `n` samples
    pub fn truncate(self, n: usize) -> Pcm<'a> {
        match self {
            Self::I8(s) => Self::I8(&s[..n.min(s.len())]),
            Self::I16(s) => Self::I16(&s[..n.min(s.len())]),
        }
    }

    /// Serialise as raw device bytes (16-bit samples little-endian)
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::I8(s) => s.iter().map(|&v| v as u8).collect(),
            Self::I16(s) => s.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }
}

/// How a decoded frame came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Cleanly decoded
    Good,
    /// Controller delivered silence instead of a frame; concealed
    Zero,
    /// Corrupted or lost; concealed
    Bad,
}

/// One frame of reconstructed PCM handed to the decode callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    /// Decoded or concealed samples
    pub pcm: Pcm<'a>,
    /// How the frame was produced
    pub kind: FrameKind,
    /// Tallies including this frame
    pub stats: DecoderStats,
}

/// Codec quality tallies kept by a decode adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Cleanly decoded frames
    pub good_frames: u32,
    /// Silence-substituted frames
    pub zero_frames: u32,
    /// Corrupted-and-concealed frames
    pub bad_frames: u32,
    /// Gaps detected in the H2 sequence numbering
    pub sequence_gaps: u32,
}

impl DecoderStats {
    /// Record one emitted frame
    pub fn record(&mut self, kind: FrameKind) {
        match kind {
            FrameKind::Good => self.good_frames += 1,
            FrameKind::Zero => self.zero_frames += 1,
            FrameKind::Bad => self.bad_frames += 1,
        }
    }

    /// Total frames emitted
    pub fn total_frames(&self) -> u32 {
        self.good_frames + self.zero_frames + self.bad_frames
    }
}

impl fmt::Display for DecoderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} good frames, {} zero frames, {} bad frames",
            self.good_frames, self.zero_frames, self.bad_frames
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_id_properties() {
        assert_eq!(CodecId::Cvsd.pcm_format().sample_rate, 8000);
        assert_eq!(CodecId::Msbc.pcm_format().bytes_per_sample, 2);
        assert_eq!(CodecId::from_hfp_id(2).unwrap(), CodecId::Msbc);
        assert!(CodecId::from_hfp_id(3).is_err());
        assert_eq!(CodecId::Msbc.hfp_id(), 2);
    }

    #[test]
    fn test_prebuffer_sizes() {
        assert_eq!(CodecId::Cvsd.pcm_format().bytes_for_ms(5), 40);
        assert_eq!(CodecId::Msbc.pcm_format().bytes_for_ms(50), 1600);
    }

    #[test]
    fn test_pcm_bytes() {
        let samples = [1i16, -2];
        assert_eq!(Pcm::I16(&samples).to_le_bytes(), vec![1, 0, 0xfe, 0xff]);
        let bytes = [-1i8, 5];
        assert_eq!(Pcm::I8(&bytes).to_le_bytes(), vec![0xff, 5]);
        assert_eq!(Pcm::I16(&samples).truncate(1).len(), 1);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = DecoderStats::default();
        stats.record(FrameKind::Good);
        stats.record(FrameKind::Bad);
        stats.record(FrameKind::Zero);
        assert_eq!(stats.total_frames(), 3);
        assert_eq!(stats.to_string(), "1 good frames, 1 zero frames, 1 bad frames");
    }
}
