//! CVSD receive path with packet loss concealment
//!
//! The controller transcodes CVSD, so the host receives plain signed 8-bit
//! PCM at 8 kHz. Decoding therefore reduces to classifying each link frame
//! and concealing the ones that were lost or flagged as corrupted.

use crate::plc::{Concealer, PlcParams};
use crate::types::{DecodedFrame, DecoderStats, FrameKind, Pcm};
use tracing::{debug, trace};

/// Samples per CVSD concealment frame, one standard 24-byte link payload
pub const CVSD_FRAME_SAMPLES: usize = 24;

/// CVSD decode adapter
#[derive(Debug, Clone)]
pub struct CvsdDecoder {
    plc: Concealer,
    stats: DecoderStats,
    input: Vec<f32>,
    output: Vec<f32>,
    pcm: Vec<i8>,
}

impl CvsdDecoder {
    /// Create a new decoder with empty concealment history
    pub fn new() -> Self {
        Self {
            plc: Concealer::new(PlcParams::CVSD),
            stats: DecoderStats::default(),
            input: vec![0.0; CVSD_FRAME_SAMPLES],
            output: vec![0.0; CVSD_FRAME_SAMPLES],
            pcm: Vec::new(),
        }
    }

    /// Decode one received link frame payload
    ///
    /// `corrupted` is the link status classification. A corrupted or
    /// all-zero payload is concealed; the emitted frame always has the same
    /// number of samples as the payload. An empty payload emits nothing.
    ///
    /// Payloads longer than [`CVSD_FRAME_SAMPLES`] are processed in
    /// frame-sized chunks. A trailing partial chunk is passed through when
    /// good and muted when lost, without touching the concealment history.
    pub fn process_frame<F>(&mut self, corrupted: bool, payload: &[u8], mut emit: F)
    where
        F: FnMut(DecodedFrame<'_>),
    {
        if payload.is_empty() {
            return;
        }

        let lost = corrupted || payload.iter().all(|&b| b == 0);
        let kind = if lost { FrameKind::Bad } else { FrameKind::Good };
        if lost {
            debug!(
                "Concealing CVSD frame (flagged: {}, run {})",
                corrupted,
                self.plc.bad_run() + 1
            );
        }

        self.pcm.clear();
        let mut chunks = payload.chunks_exact(CVSD_FRAME_SAMPLES);
        for chunk in chunks.by_ref() {
            if lost {
                self.plc.bad_frame(&mut self.output);
            } else {
                for (dst, &b) in self.input.iter_mut().zip(chunk) {
                    *dst = f32::from(b as i8);
                }
                self.plc.good_frame(&self.input, &mut self.output);
            }
            self.pcm.extend(
                self.output
                    .iter()
                    .map(|&v| v.round().clamp(f32::from(i8::MIN), f32::from(i8::MAX)) as i8),
            );
        }

        let tail = chunks.remainder();
        if !tail.is_empty() {
            trace!("CVSD payload of {} bytes leaves a {}-byte tail", payload.len(), tail.len());
            if lost {
                self.pcm.resize(self.pcm.len() + tail.len(), 0);
            } else {
                self.pcm.extend(tail.iter().map(|&b| b as i8));
            }
        }

        self.stats.record(kind);
        emit(DecodedFrame {
            pcm: Pcm::I8(&self.pcm),
            kind,
            stats: self.stats,
        });
    }

    /// Codec quality tallies
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Reset concealment history and tallies
    pub fn reset(&mut self) {
        self.plc.reset();
        self.stats = DecoderStats::default();
    }
}

impl Default for CvsdDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> Vec<u8> {
        vec![value; CVSD_FRAME_SAMPLES]
    }

    #[test]
    fn test_good_frame_is_passed_through() {
        let mut decoder = CvsdDecoder::new();
        let payload: Vec<u8> = (0..24u8).map(|i| i.wrapping_mul(7)).collect();
        let mut emitted = Vec::new();
        decoder.process_frame(false, &payload, |f| {
            assert_eq!(f.kind, FrameKind::Good);
            emitted = f.pcm.to_le_bytes();
        });
        assert_eq!(emitted, payload);
        assert_eq!(decoder.stats().good_frames, 1);
    }

    #[test]
    fn test_zero_payload_is_concealed() {
        let mut decoder = CvsdDecoder::new();
        let mut kinds = Vec::new();
        decoder.process_frame(false, &frame(0), |f| kinds.push(f.kind));
        assert_eq!(kinds, vec![FrameKind::Bad]);
        assert_eq!(decoder.stats().bad_frames, 1);
    }

    #[test]
    fn test_empty_payload_emits_nothing() {
        let mut decoder = CvsdDecoder::new();
        let mut calls = 0;
        decoder.process_frame(false, &[], |_| calls += 1);
        assert_eq!(calls, 0);
        assert_eq!(decoder.stats().total_frames(), 0);
    }

    #[test]
    fn test_short_payload_yields_short_output() {
        let mut decoder = CvsdDecoder::new();
        let mut len = 0;
        decoder.process_frame(false, &[3u8; 10], |f| len = f.pcm.len());
        assert_eq!(len, 10);
    }

    fn tone_frame(len: usize, offset: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * ((i + offset) % 40) as f32 / 40.0;
                (phase.sin() * 100.0).round() as i8 as u8
            })
            .collect()
    }

    #[test]
    fn test_long_payloads_are_concealed() {
        let mut decoder = CvsdDecoder::new();
        let mut offset = 0;
        for _ in 0..20 {
            let payload = tone_frame(48, offset);
            let mut emitted = Vec::new();
            decoder.process_frame(false, &payload, |f| emitted = f.pcm.to_le_bytes());
            assert_eq!(emitted, payload);
            offset += 48;
        }

        let mut concealed = Vec::new();
        decoder.process_frame(true, &tone_frame(48, offset), |f| {
            assert_eq!(f.kind, FrameKind::Bad);
            concealed = f.pcm.to_le_bytes();
        });
        assert_eq!(concealed.len(), 48);
        let audible = concealed.iter().filter(|&&b| b != 0).count();
        assert!(audible > 36, "only {} of 48 samples audible", audible);
        assert_eq!(decoder.stats().bad_frames, 1);
    }

    #[test]
    fn test_partial_tail_follows_frame_status() {
        let mut decoder = CvsdDecoder::new();
        let payload = tone_frame(30, 0);
        let mut emitted = Vec::new();
        decoder.process_frame(false, &payload, |f| emitted = f.pcm.to_le_bytes());
        assert_eq!(emitted, payload);

        decoder.process_frame(true, &payload, |f| emitted = f.pcm.to_le_bytes());
        assert_eq!(emitted.len(), 30);
        assert_eq!(&emitted[24..], &[0; 6]);
    }

    #[test]
    fn test_reset_clears_stats() {
        let mut decoder = CvsdDecoder::new();
        decoder.process_frame(true, &frame(5), |_| {});
        decoder.reset();
        assert_eq!(decoder.stats(), DecoderStats::default());
    }
}
