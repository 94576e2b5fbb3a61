//! mSBC encode adapter
//!
//! Coder frames are produced in 120-sample bursts while the link drains the
//! stream in small fixed-size packets; one H2 unit spans two and a half
//! 24-byte packets. The adapter keeps room for exactly two units so the
//! backlog never grows past what the send cadence needs.

use super::{H2_HEADER_LEN, H2_PADDING_LEN, H2_SEQUENCE, H2_SYNC_BYTE};
use crate::error::{CodecError, Result};
use crate::types::FrameEncoder;
use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

/// Units the stream buffer can hold
const STREAM_UNITS: usize = 2;

/// Encode adapter wrapping a frame encoder
pub struct MsbcEncodeAdapter<E: FrameEncoder> {
    encoder: E,
    stream: BytesMut,
    capacity: usize,
    frame: Vec<u8>,
    sequence: usize,
    frames_encoded: u64,
    underruns: u64,
}

impl<E: FrameEncoder> MsbcEncodeAdapter<E> {
    /// Create a new adapter around `encoder`
    pub fn new(encoder: E) -> Self {
        let frame_len = encoder.frame_len();
        let capacity = STREAM_UNITS * (H2_HEADER_LEN + frame_len + H2_PADDING_LEN);
        Self {
            encoder,
            stream: BytesMut::with_capacity(capacity),
            capacity,
            frame: vec![0; frame_len],
            sequence: 0,
            frames_encoded: 0,
            underruns: 0,
        }
    }

    /// Size of one H2 unit produced by this adapter
    pub fn unit_len(&self) -> usize {
        H2_HEADER_LEN + self.frame.len() + H2_PADDING_LEN
    }

    /// Whether the stream buffer has room for another unit
    pub fn can_encode_frame_now(&self) -> bool {
        self.capacity - self.stream.len() >= self.unit_len()
    }

    /// Samples the next call to [`encode_frame`](Self::encode_frame) expects
    pub fn samples_per_frame(&self) -> usize {
        self.encoder.samples_per_frame()
    }

    /// Encode one frame of samples and append it as an H2 unit
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BufferOverflow`] when the stream buffer is full
    /// and any error reported by the frame encoder. The stream is left
    /// unchanged on error.
    pub fn encode_frame(&mut self, samples: &[i16]) -> Result<()> {
        if !self.can_encode_frame_now() {
            return Err(CodecError::BufferOverflow {
                size: self.unit_len(),
                free: self.capacity - self.stream.len(),
            });
        }

        self.encoder.encode_frame(samples, &mut self.frame)?;

        self.stream.extend_from_slice(&[H2_SYNC_BYTE, H2_SEQUENCE[self.sequence]]);
        self.stream.extend_from_slice(&self.frame);
        self.stream.extend_from_slice(&[0u8; H2_PADDING_LEN]);
        self.sequence = (self.sequence + 1) % H2_SEQUENCE.len();
        self.frames_encoded += 1;

        debug!(
            "Encoded mSBC frame {}, {} bytes in stream",
            self.frames_encoded,
            self.stream.len()
        );
        Ok(())
    }

    /// Encoded bytes waiting to be sent
    pub fn bytes_available(&self) -> usize {
        self.stream.len()
    }

    /// Move up to `out.len()` encoded bytes into `out`
    ///
    /// Never hands out more than is buffered. A short read is a stream
    /// underrun: it is logged and counted, the missing tail is zero-filled
    /// and the number of real bytes copied is returned.
    pub fn read_encoded(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.stream.len());
        if count < out.len() {
            self.underruns += 1;
            warn!(
                "mSBC stream underrun: {} bytes requested, {} available",
                out.len(),
                self.stream.len()
            );
        }

        out[..count].copy_from_slice(&self.stream[..count]);
        self.stream.advance(count);
        out[count..].fill(0);
        count
    }

    /// Units encoded since creation or the last reset
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    /// Short reads since creation or the last reset
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Drop buffered bytes and restart the sequence numbering
    pub fn reset(&mut self) {
        self.encoder.reset();
        self.stream.clear();
        self.sequence = 0;
        self.frames_encoded = 0;
        self.underruns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adpcm::AdpcmFrameEncoder;
    use crate::msbc::{H2_UNIT_LEN, MSBC_SAMPLES_PER_FRAME, MSBC_SYNC_WORD};

    fn adapter() -> MsbcEncodeAdapter<AdpcmFrameEncoder> {
        MsbcEncodeAdapter::new(AdpcmFrameEncoder::new())
    }

    #[test]
    fn test_buffer_holds_two_units() {
        let mut enc = adapter();
        let samples = [0i16; MSBC_SAMPLES_PER_FRAME];
        assert!(enc.can_encode_frame_now());
        enc.encode_frame(&samples).unwrap();
        assert!(enc.can_encode_frame_now());
        enc.encode_frame(&samples).unwrap();
        assert!(!enc.can_encode_frame_now());
        assert_eq!(enc.bytes_available(), 2 * H2_UNIT_LEN);
        assert!(matches!(
            enc.encode_frame(&samples),
            Err(CodecError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_h2_headers_cycle() {
        let mut enc = adapter();
        let samples = [0i16; MSBC_SAMPLES_PER_FRAME];
        let mut unit = [0u8; H2_UNIT_LEN];
        for expected in H2_SEQUENCE.iter().chain(H2_SEQUENCE.iter()) {
            enc.encode_frame(&samples).unwrap();
            assert_eq!(enc.read_encoded(&mut unit), H2_UNIT_LEN);
            assert_eq!(unit[0], H2_SYNC_BYTE);
            assert_eq!(unit[1], *expected);
            assert_eq!(unit[2], MSBC_SYNC_WORD);
            assert_eq!(unit[H2_UNIT_LEN - 1], 0);
        }
    }

    #[test]
    fn test_read_never_exceeds_buffered() {
        let mut enc = adapter();
        enc.encode_frame(&[0i16; MSBC_SAMPLES_PER_FRAME]).unwrap();

        let mut packet = [0xffu8; 24];
        assert_eq!(enc.read_encoded(&mut packet), 24);
        assert_eq!(enc.read_encoded(&mut packet), 24);
        assert_eq!(enc.underruns(), 0);

        // 12 bytes left for a 24-byte request
        assert_eq!(enc.read_encoded(&mut packet), 12);
        assert!(packet[12..].iter().all(|&b| b == 0));
        assert_eq!(enc.underruns(), 1);
        assert_eq!(enc.bytes_available(), 0);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut enc = adapter();
        enc.encode_frame(&[0i16; MSBC_SAMPLES_PER_FRAME]).unwrap();
        enc.reset();
        assert_eq!(enc.bytes_available(), 0);
        enc.encode_frame(&[0i16; MSBC_SAMPLES_PER_FRAME]).unwrap();
        let mut unit = [0u8; H2_UNIT_LEN];
        enc.read_encoded(&mut unit);
        assert_eq!(unit[1], H2_SEQUENCE[0]);
    }
}
