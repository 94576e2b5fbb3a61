//! Reference frame coder for the wideband path
//!
//! A 3-bit IMA-style ADPCM coder packed into 57-byte frames, the same size
//! as an mSBC frame. Every frame carries the predictor state it starts from,
//! so a decoder picks the stream back up after any number of lost frames.
//!
//! Frame layout:
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 1    | sync word `0xAD`                       |
//! | 1      | 2    | initial predictor, big-endian          |
//! | 3      | 1    | initial step index                     |
//! | 4      | 45   | 120 three-bit codes, MSB first         |
//! | 49     | 7    | reserved                               |
//! | 56     | 1    | CRC-8 over bytes 1..56                 |

use crate::error::{CodecError, Result};
use crate::msbc::{MSBC_FRAME_LEN, MSBC_SAMPLES_PER_FRAME, MSBC_SYNC_WORD};
use crate::types::{FrameDecoder, FrameEncoder};

/// IMA ADPCM step-size table
const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37,
    41, 45, 50, 55, 60, 66, 73, 80, 88, 97, 107, 118, 130, 143, 157, 173,
    190, 209, 230, 253, 279, 307, 337, 371, 408, 449, 494, 544, 598, 658,
    724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894,
    6484, 7132, 7845, 8630, 9493, 10442, 11487, 12635, 13899, 15289,
    16818, 18500, 20350, 22385, 24623, 27086, 29794, 32767,
];

/// Step index adjustment, indexed by the two magnitude bits
const INDEX_ADJUST: [i32; 4] = [-1, -1, 2, 4];

const MAX_STEP_INDEX: i32 = 88;
const BITS_PER_CODE: usize = 3;
const SIGN_BIT: u8 = 0b100;

const PREDICTOR_OFFSET: usize = 1;
const STEP_INDEX_OFFSET: usize = 3;
const CODES_OFFSET: usize = 4;
const CODES_LEN: usize = MSBC_SAMPLES_PER_FRAME * BITS_PER_CODE / 8;
const CRC_OFFSET: usize = MSBC_FRAME_LEN - 1;

/// CRC-8 with the SBC polynomial (x^8 + x^4 + x^3 + x^2 + 1), init 0x0F
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x0f;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x1d } else { crc << 1 };
        }
    }
    crc
}

fn reconstruct_diff(magnitude: u8, step: i32) -> i32 {
    let mut diff = step >> 2;
    if magnitude & 0b10 != 0 {
        diff += step;
    }
    if magnitude & 0b01 != 0 {
        diff += step >> 1;
    }
    diff
}

/// Shared predictor state; encoder and decoder must evolve it identically
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Predictor {
    predicted: i32,
    step_index: i32,
}

impl Predictor {
    fn apply(&mut self, code: u8) -> i16 {
        let step = STEP_TABLE[self.step_index as usize];
        let diff = reconstruct_diff(code & 0b11, step);
        let next = if code & SIGN_BIT != 0 {
            self.predicted - diff
        } else {
            self.predicted + diff
        };
        self.predicted = next.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        self.step_index =
            (self.step_index + INDEX_ADJUST[(code & 0b11) as usize]).clamp(0, MAX_STEP_INDEX);
        self.predicted as i16
    }

    fn quantize(&self, sample: i16) -> u8 {
        let step = STEP_TABLE[self.step_index as usize];
        let mut diff = i32::from(sample) - self.predicted;
        let mut code = 0u8;
        if diff < 0 {
            code |= SIGN_BIT;
            diff = -diff;
        }
        if diff >= step {
            code |= 0b10;
            diff -= step;
        }
        if diff >= step >> 1 {
            code |= 0b01;
        }
        code
    }
}

/// Reference ADPCM frame encoder
#[derive(Debug, Clone, Default)]
pub struct AdpcmFrameEncoder {
    state: Predictor,
}

impl AdpcmFrameEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameEncoder for AdpcmFrameEncoder {
    fn samples_per_frame(&self) -> usize {
        MSBC_SAMPLES_PER_FRAME
    }

    fn frame_len(&self) -> usize {
        MSBC_FRAME_LEN
    }

    fn encode_frame(&mut self, samples: &[i16], out: &mut [u8]) -> Result<()> {
        if samples.len() != MSBC_SAMPLES_PER_FRAME {
            return Err(CodecError::InvalidFrameSize {
                expected: MSBC_SAMPLES_PER_FRAME,
                actual: samples.len(),
            });
        }
        if out.len() != MSBC_FRAME_LEN {
            return Err(CodecError::InvalidFrameSize {
                expected: MSBC_FRAME_LEN,
                actual: out.len(),
            });
        }

        out.fill(0);
        out[0] = MSBC_SYNC_WORD;
        out[PREDICTOR_OFFSET..PREDICTOR_OFFSET + 2]
            .copy_from_slice(&(self.state.predicted as i16).to_be_bytes());
        out[STEP_INDEX_OFFSET] = self.state.step_index as u8;

        let codes = &mut out[CODES_OFFSET..CODES_OFFSET + CODES_LEN];
        for (i, &sample) in samples.iter().enumerate() {
            let code = self.state.quantize(sample);
            self.state.apply(code);
            write_code(codes, i, code);
        }

        out[CRC_OFFSET] = crc8(&out[1..CRC_OFFSET]);
        Ok(())
    }

    fn reset(&mut self) {
        self.state = Predictor::default();
    }
}

/// Reference ADPCM frame decoder
#[derive(Debug, Clone, Default)]
pub struct AdpcmFrameDecoder;

impl AdpcmFrameDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for AdpcmFrameDecoder {
    fn samples_per_frame(&self) -> usize {
        MSBC_SAMPLES_PER_FRAME
    }

    fn frame_len(&self) -> usize {
        MSBC_FRAME_LEN
    }

    fn decode_frame(&mut self, frame: &[u8], out: &mut [i16]) -> Result<()> {
        if frame.len() != MSBC_FRAME_LEN {
            return Err(CodecError::InvalidFrameSize {
                expected: MSBC_FRAME_LEN,
                actual: frame.len(),
            });
        }
        if out.len() < MSBC_SAMPLES_PER_FRAME {
            return Err(CodecError::InvalidFrameSize {
                expected: MSBC_SAMPLES_PER_FRAME,
                actual: out.len(),
            });
        }
        if frame[0] != MSBC_SYNC_WORD {
            return Err(CodecError::SyncLost {
                expected: MSBC_SYNC_WORD,
                actual: frame[0],
            });
        }
        let computed = crc8(&frame[1..CRC_OFFSET]);
        if computed != frame[CRC_OFFSET] {
            return Err(CodecError::CrcMismatch {
                stored: frame[CRC_OFFSET],
                computed,
            });
        }
        let step_index = i32::from(frame[STEP_INDEX_OFFSET]);
        if step_index > MAX_STEP_INDEX {
            return Err(CodecError::invalid_payload(format!(
                "step index {} out of range",
                step_index
            )));
        }

        let mut state = Predictor {
            predicted: i32::from(i16::from_be_bytes([
                frame[PREDICTOR_OFFSET],
                frame[PREDICTOR_OFFSET + 1],
            ])),
            step_index,
        };
        let codes = &frame[CODES_OFFSET..CODES_OFFSET + CODES_LEN];
        for (i, sample) in out[..MSBC_SAMPLES_PER_FRAME].iter_mut().enumerate() {
            *sample = state.apply(read_code(codes, i));
        }
        Ok(())
    }

    fn reset(&mut self) {}
}

fn write_code(codes: &mut [u8], index: usize, code: u8) {
    for bit in 0..BITS_PER_CODE {
        if code & (1 << (BITS_PER_CODE - 1 - bit)) != 0 {
            let pos = index * BITS_PER_CODE + bit;
            codes[pos / 8] |= 0x80 >> (pos % 8);
        }
    }
}

fn read_code(codes: &[u8], index: usize) -> u8 {
    let mut code = 0;
    for bit in 0..BITS_PER_CODE {
        let pos = index * BITS_PER_CODE + bit;
        code <<= 1;
        if codes[pos / 8] & (0x80 >> (pos % 8)) != 0 {
            code |= 1;
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_frame(frame_index: usize) -> Vec<i16> {
        (0..MSBC_SAMPLES_PER_FRAME)
            .map(|i| {
                let n = frame_index * MSBC_SAMPLES_PER_FRAME + i;
                let phase = 2.0 * std::f64::consts::PI * (n % 100) as f64 / 100.0;
                (phase.sin() * 16000.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_code_packing() {
        let mut codes = [0u8; CODES_LEN];
        for i in 0..MSBC_SAMPLES_PER_FRAME {
            write_code(&mut codes, i, (i % 8) as u8);
        }
        for i in 0..MSBC_SAMPLES_PER_FRAME {
            assert_eq!(read_code(&codes, i), (i % 8) as u8);
        }
    }

    #[test]
    fn test_crc_known_value() {
        assert_eq!(crc8(&[]), 0x0f);
        assert_ne!(crc8(&[0x00]), crc8(&[0x01]));
    }

    #[test]
    fn test_roundtrip_tracks_signal() {
        let mut encoder = AdpcmFrameEncoder::new();
        let mut decoder = AdpcmFrameDecoder::new();
        let mut frame = [0u8; MSBC_FRAME_LEN];
        let mut decoded = [0i16; MSBC_SAMPLES_PER_FRAME];

        let mut total_error = 0i64;
        let mut counted = 0i64;
        for index in 0..8 {
            let samples = sine_frame(index);
            encoder.encode_frame(&samples, &mut frame).unwrap();
            decoder.decode_frame(&frame, &mut decoded).unwrap();
            // The step size needs the first frame to adapt
            if index > 0 {
                for (a, b) in samples.iter().zip(decoded.iter()) {
                    total_error += (i64::from(*a) - i64::from(*b)).abs();
                    counted += 1;
                }
            }
        }
        let mean_error = total_error / counted;
        assert!(mean_error < 3000, "mean error too large: {}", mean_error);
    }

    #[test]
    fn test_frames_decode_independently() {
        let mut encoder = AdpcmFrameEncoder::new();
        let mut frames = Vec::new();
        for index in 0..3 {
            let mut frame = [0u8; MSBC_FRAME_LEN];
            encoder.encode_frame(&sine_frame(index), &mut frame).unwrap();
            frames.push(frame);
        }

        let mut in_order = AdpcmFrameDecoder::new();
        let mut expected = [0i16; MSBC_SAMPLES_PER_FRAME];
        for frame in &frames {
            in_order.decode_frame(frame, &mut expected).unwrap();
        }

        // Decoding only the last frame gives the same samples
        let mut fresh = AdpcmFrameDecoder::new();
        let mut alone = [0i16; MSBC_SAMPLES_PER_FRAME];
        fresh.decode_frame(&frames[2], &mut alone).unwrap();
        assert_eq!(alone, expected);
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut encoder = AdpcmFrameEncoder::new();
        let mut frame = [0u8; MSBC_FRAME_LEN];
        encoder.encode_frame(&sine_frame(0), &mut frame).unwrap();

        let mut decoder = AdpcmFrameDecoder::new();
        let mut out = [0i16; MSBC_SAMPLES_PER_FRAME];

        let mut damaged = frame;
        damaged[10] ^= 0x04;
        assert!(matches!(
            decoder.decode_frame(&damaged, &mut out),
            Err(CodecError::CrcMismatch { .. })
        ));

        let mut unsynced = frame;
        unsynced[0] = 0x00;
        assert!(matches!(
            decoder.decode_frame(&unsynced, &mut out),
            Err(CodecError::SyncLost { .. })
        ));

        assert!(decoder.decode_frame(&frame[..56], &mut out).is_err());
    }

    #[test]
    fn test_rejects_wrong_sample_count() {
        let mut encoder = AdpcmFrameEncoder::new();
        let mut frame = [0u8; MSBC_FRAME_LEN];
        let err = encoder.encode_frame(&[0i16; 100], &mut frame).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidFrameSize {
                expected: MSBC_SAMPLES_PER_FRAME,
                actual: 100
            }
        );
    }
}
