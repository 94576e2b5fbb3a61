//! mSBC decode adapter
//!
//! Link packets arrive in slices that do not line up with H2 units. The
//! adapter appends every slice to an assembly buffer, hunts for the H2
//! header, waits until a whole unit is present and then decodes it. Units
//! that cannot be decoded, and stretches of link data with no header in
//! them, are replaced by concealment so the PCM stream never stalls.

use super::{find_h2_header, h2_sequence_number, H2_HEADER_LEN, H2_PADDING_LEN};
use crate::plc::{Concealer, PlcParams};
use crate::types::{DecodedFrame, DecoderStats, FrameDecoder, FrameKind, Pcm};
use tracing::{debug, trace};

/// Where the assembly state machine currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// Searching the assembly buffer for an H2 header
    AwaitingHeader,
    /// Header found at the buffer start, collecting the rest of the unit
    Accumulating,
    /// A complete unit sits at the buffer start
    FrameReady,
}

/// Decode adapter wrapping a frame decoder
pub struct MsbcDecodeAdapter<D: FrameDecoder> {
    decoder: D,
    state: AssemblyState,
    /// Received bytes not yet consumed
    assembly: Vec<u8>,
    /// Per-byte flag: the byte arrived in a link frame marked corrupted
    tainted: Vec<bool>,
    expected_sequence: Option<usize>,
    plc: Concealer,
    stats: DecoderStats,
    decoded: Vec<i16>,
    input: Vec<f32>,
    output: Vec<f32>,
    pcm: Vec<i16>,
}

impl<D: FrameDecoder> MsbcDecodeAdapter<D> {
    /// Create a new adapter around `decoder`
    pub fn new(decoder: D) -> Self {
        let samples = decoder.samples_per_frame();
        let params = PlcParams::MSBC.with_frame_size(samples);
        Self {
            decoder,
            state: AssemblyState::AwaitingHeader,
            assembly: Vec::with_capacity(4 * samples),
            tainted: Vec::with_capacity(4 * samples),
            expected_sequence: None,
            plc: Concealer::new(params),
            stats: DecoderStats::default(),
            decoded: vec![0; samples],
            input: vec![0.0; samples],
            output: vec![0.0; samples],
            pcm: Vec::with_capacity(samples),
        }
    }

    /// Size of one H2 unit expected on the link
    pub fn unit_len(&self) -> usize {
        H2_HEADER_LEN + self.decoder.frame_len() + H2_PADDING_LEN
    }

    /// Current assembly state
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Codec quality tallies
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Feed one link payload slice
    ///
    /// `corrupted` marks every byte of `data` as suspect. A unit containing
    /// suspect bytes is still handed to the frame decoder, whose own checks
    /// decide between a recovered frame and concealment. `emit` is called
    /// once per coder frame produced, good or concealed.
    pub fn process_data<F>(&mut self, corrupted: bool, data: &[u8], mut emit: F)
    where
        F: FnMut(DecodedFrame<'_>),
    {
        if data.is_empty() {
            return;
        }

        self.assembly.extend_from_slice(data);
        self.tainted.resize(self.assembly.len(), corrupted);

        loop {
            match self.state {
                AssemblyState::AwaitingHeader => match find_h2_header(&self.assembly) {
                    // A whole unit's worth of data went by without a header
                    Some(offset) if offset >= self.unit_len() => self.conceal_unit(&mut emit),
                    Some(offset) => {
                        if offset > 0 {
                            trace!("Skipping {} bytes before H2 header", offset);
                            self.consume(offset);
                        }
                        self.state = AssemblyState::Accumulating;
                    }
                    // Keep two bytes back: they may be the start of a header
                    None if self.assembly.len() >= self.unit_len() + H2_HEADER_LEN => {
                        self.conceal_unit(&mut emit);
                    }
                    None => break,
                },
                AssemblyState::Accumulating => {
                    if self.assembly.len() >= self.unit_len() {
                        self.state = AssemblyState::FrameReady;
                    } else {
                        break;
                    }
                }
                AssemblyState::FrameReady => {
                    self.decode_unit(&mut emit);
                    let unit_len = self.unit_len();
                    self.consume(unit_len);
                    self.state = AssemblyState::AwaitingHeader;
                }
            }
        }
    }

    /// Drop partially assembled data, history and tallies
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.state = AssemblyState::AwaitingHeader;
        self.assembly.clear();
        self.tainted.clear();
        self.expected_sequence = None;
        self.plc.reset();
        self.stats = DecoderStats::default();
    }

    fn decode_unit<F>(&mut self, emit: &mut F)
    where
        F: FnMut(DecodedFrame<'_>),
    {
        let unit_len = self.unit_len();
        let suspect = self.tainted[..unit_len].iter().any(|&t| t);

        if let Some(sequence) = h2_sequence_number(self.assembly[1]) {
            if let Some(expected) = self.expected_sequence {
                if expected != sequence {
                    self.stats.sequence_gaps += 1;
                    debug!("H2 sequence gap: expected {}, got {}", expected, sequence);
                }
            }
            self.expected_sequence = Some((sequence + 1) % 4);
        }

        let frame = &self.assembly[H2_HEADER_LEN..unit_len - H2_PADDING_LEN];
        match self.decoder.decode_frame(frame, &mut self.decoded) {
            Ok(()) => {
                if suspect {
                    debug!("mSBC frame flagged by link decoded cleanly");
                }
                for (dst, &s) in self.input.iter_mut().zip(self.decoded.iter()) {
                    *dst = f32::from(s);
                }
                self.plc.good_frame(&self.input, &mut self.output);
                self.emit_output(FrameKind::Good, emit);
            }
            Err(e) => {
                debug!("mSBC frame rejected (flagged: {}): {}", suspect, e);
                self.conceal(FrameKind::Bad, emit);
            }
        }
    }

    fn conceal_unit<F>(&mut self, emit: &mut F)
    where
        F: FnMut(DecodedFrame<'_>),
    {
        let unit_len = self.unit_len();
        let kind = if self.assembly[..unit_len].iter().all(|&b| b == 0) {
            FrameKind::Zero
        } else {
            FrameKind::Bad
        };
        debug!("No H2 header in {} bytes, concealing as {:?}", unit_len, kind);
        self.consume(unit_len);
        self.conceal(kind, emit);
    }

    fn conceal<F>(&mut self, kind: FrameKind, emit: &mut F)
    where
        F: FnMut(DecodedFrame<'_>),
    {
        self.plc.bad_frame(&mut self.output);
        self.emit_output(kind, emit);
    }

    fn emit_output<F>(&mut self, kind: FrameKind, emit: &mut F)
    where
        F: FnMut(DecodedFrame<'_>),
    {
        self.pcm.clear();
        self.pcm.extend(
            self.output
                .iter()
                .map(|&v| v.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16),
        );
        self.stats.record(kind);
        emit(DecodedFrame {
            pcm: Pcm::I16(&self.pcm),
            kind,
            stats: self.stats,
        });
    }

    fn consume(&mut self, count: usize) {
        self.assembly.drain(..count);
        self.tainted.drain(..count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adpcm::{AdpcmFrameDecoder, AdpcmFrameEncoder};
    use crate::error::Result;
    use crate::msbc::{
        MsbcEncodeAdapter, H2_SEQUENCE, H2_SYNC_BYTE, H2_UNIT_LEN, MSBC_FRAME_LEN,
        MSBC_SAMPLES_PER_FRAME, MSBC_SYNC_WORD,
    };

    fn encoded_stream(frames: usize) -> Vec<u8> {
        let mut enc = MsbcEncodeAdapter::new(AdpcmFrameEncoder::new());
        let mut stream = Vec::new();
        let mut unit = [0u8; H2_UNIT_LEN];
        for i in 0..frames {
            let samples: Vec<i16> = (0..MSBC_SAMPLES_PER_FRAME)
                .map(|n| ((i * MSBC_SAMPLES_PER_FRAME + n) % 100) as i16 * 100)
                .collect();
            enc.encode_frame(&samples).unwrap();
            enc.read_encoded(&mut unit);
            stream.extend_from_slice(&unit);
        }
        stream
    }

    fn adapter() -> MsbcDecodeAdapter<AdpcmFrameDecoder> {
        MsbcDecodeAdapter::new(AdpcmFrameDecoder::new())
    }

    /// Wideband coder with 40-sample frames, far below the mSBC frame size
    struct ShortFrameDecoder;

    impl FrameDecoder for ShortFrameDecoder {
        fn samples_per_frame(&self) -> usize {
            40
        }

        fn frame_len(&self) -> usize {
            MSBC_FRAME_LEN
        }

        fn decode_frame(&mut self, _frame: &[u8], out: &mut [i16]) -> Result<()> {
            for (i, s) in out.iter_mut().enumerate() {
                *s = (i as i16 - 20) * 500;
            }
            Ok(())
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_short_frame_coder_is_concealed() {
        let mut dec = MsbcDecodeAdapter::new(ShortFrameDecoder);
        let params = *dec.plc.params();
        assert_eq!(params.frame_size, 40);
        assert!(params.template < params.frame_size);
        assert!(params.reconvergence + params.overlap <= params.frame_size);

        let mut frames = Vec::new();
        for i in 0..30 {
            let mut unit = vec![0x22u8; H2_UNIT_LEN];
            unit[0] = H2_SYNC_BYTE;
            unit[1] = H2_SEQUENCE[i % 4];
            unit[2] = MSBC_SYNC_WORD;
            unit[H2_UNIT_LEN - 1] = 0;
            if i == 29 {
                // A headerless unit ahead of the last one
                dec.process_data(false, &[0x33; H2_UNIT_LEN], |_| {});
            }
            dec.process_data(false, &unit, |f| frames.push((f.kind, f.pcm.to_le_bytes())));
        }

        let (kind, concealed) = &frames[frames.len() - 2];
        assert_eq!(*kind, FrameKind::Bad);
        assert_eq!(concealed.len(), 80);
        assert!(concealed.chunks(2).filter(|s| s.iter().any(|&b| b != 0)).count() > 20);
        assert_eq!(frames.last().map(|f| f.0), Some(FrameKind::Good));
    }

    #[test]
    fn test_state_machine_progression() {
        let stream = encoded_stream(1);
        let mut dec = adapter();
        assert_eq!(dec.state(), AssemblyState::AwaitingHeader);

        let mut kinds = Vec::new();
        dec.process_data(false, &stream[..24], |f| kinds.push(f.kind));
        assert_eq!(dec.state(), AssemblyState::Accumulating);
        dec.process_data(false, &stream[24..48], |f| kinds.push(f.kind));
        assert!(kinds.is_empty());
        dec.process_data(false, &stream[48..], |f| kinds.push(f.kind));
        assert_eq!(kinds, vec![FrameKind::Good]);
        assert_eq!(dec.state(), AssemblyState::AwaitingHeader);
    }

    #[test]
    fn test_link_slices_decode_every_frame() {
        let stream = encoded_stream(4);
        let mut dec = adapter();
        let mut samples = 0;
        for packet in stream.chunks(24) {
            dec.process_data(false, packet, |f| {
                assert_eq!(f.kind, FrameKind::Good);
                samples += f.pcm.len();
            });
        }
        assert_eq!(dec.stats().good_frames, 4);
        assert_eq!(samples, 4 * MSBC_SAMPLES_PER_FRAME);
        assert_eq!(dec.stats().sequence_gaps, 0);
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut data = vec![0x42u8; 7];
        data.extend(encoded_stream(1));
        let mut dec = adapter();
        dec.process_data(false, &data, |_| {});
        assert_eq!(dec.stats().good_frames, 1);
        assert_eq!(dec.stats().bad_frames, 0);
    }

    #[test]
    fn test_damaged_frame_is_concealed() {
        let mut stream = encoded_stream(2);
        stream[H2_UNIT_LEN + 20] ^= 0xff;
        let mut dec = adapter();
        let mut kinds = Vec::new();
        for packet in stream.chunks(24) {
            dec.process_data(true, packet, |f| {
                assert_eq!(f.pcm.len(), MSBC_SAMPLES_PER_FRAME);
                kinds.push(f.kind);
            });
        }
        assert_eq!(kinds, vec![FrameKind::Good, FrameKind::Bad]);
    }

    #[test]
    fn test_zero_data_counts_zero_frames() {
        let mut dec = adapter();
        let zeros = [0u8; 24];
        let mut frames = 0;
        for _ in 0..6 {
            dec.process_data(true, &zeros, |f| {
                assert_eq!(f.kind, FrameKind::Zero);
                frames += 1;
            });
        }
        // 144 bytes of silence: two units concealed, 24 bytes held back
        assert_eq!(frames, 2);
        assert_eq!(dec.stats().zero_frames, 2);
    }

    #[test]
    fn test_sequence_gap_detected() {
        let stream = encoded_stream(3);
        let mut dec = adapter();
        dec.process_data(false, &stream[..H2_UNIT_LEN], |_| {});
        dec.process_data(false, &stream[2 * H2_UNIT_LEN..], |_| {});
        assert_eq!(dec.stats().sequence_gaps, 1);
        assert_eq!(dec.stats().good_frames, 2);
    }

    #[test]
    fn test_reset() {
        let stream = encoded_stream(1);
        let mut dec = adapter();
        dec.process_data(false, &stream[..30], |_| {});
        dec.reset();
        assert_eq!(dec.state(), AssemblyState::AwaitingHeader);
        dec.process_data(false, &stream[30..], |_| {});
        assert_eq!(dec.stats().total_frames(), 0);
    }
}
