//! mSBC wideband speech over SCO
//!
//! mSBC coder frames are carried in 60-byte units: a two-byte H2
//! synchronisation header, the 57-byte coder frame and one padding byte.
//! The second header byte cycles through four values so the receiver can
//! spot lost units.
//!
//! - [`MsbcEncodeAdapter`] buffers encoded units and hands them out in
//!   link-sized slices.
//! - [`MsbcDecodeAdapter`] reassembles units from link slices, decodes them
//!   and conceals the ones that are missing or damaged.

pub mod decoder;
pub mod encoder;

pub use decoder::{AssemblyState, MsbcDecodeAdapter};
pub use encoder::MsbcEncodeAdapter;

/// PCM samples per mSBC coder frame (7.5 ms at 16 kHz)
pub const MSBC_SAMPLES_PER_FRAME: usize = 120;

/// Size of an mSBC coder frame in bytes
pub const MSBC_FRAME_LEN: usize = 57;

/// First byte of every coder frame
pub const MSBC_SYNC_WORD: u8 = 0xad;

/// Size of the H2 synchronisation header
pub const H2_HEADER_LEN: usize = 2;

/// Padding appended after each coder frame
pub const H2_PADDING_LEN: usize = 1;

/// Size of one H2-framed unit on the link
pub const H2_UNIT_LEN: usize = H2_HEADER_LEN + MSBC_FRAME_LEN + H2_PADDING_LEN;

/// First H2 header byte
pub const H2_SYNC_BYTE: u8 = 0x01;

/// Second H2 header byte, indexed by sequence number
pub const H2_SEQUENCE: [u8; 4] = [0x08, 0x38, 0xc8, 0xf8];

/// Sequence number carried by a second H2 header byte
pub fn h2_sequence_number(byte: u8) -> Option<usize> {
    H2_SEQUENCE.iter().position(|&b| b == byte)
}

/// Offset of the first complete H2 header followed by the mSBC sync word
pub fn find_h2_header(data: &[u8]) -> Option<usize> {
    data.windows(3).position(|w| {
        w[0] == H2_SYNC_BYTE && h2_sequence_number(w[1]).is_some() && w[2] == MSBC_SYNC_WORD
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_len() {
        assert_eq!(H2_UNIT_LEN, 60);
    }

    #[test]
    fn test_find_h2_header() {
        assert_eq!(find_h2_header(&[0x01, 0x38, 0xad]), Some(0));
        assert_eq!(find_h2_header(&[0x00, 0x00, 0x01, 0xf8, 0xad, 0x10]), Some(2));
        assert_eq!(find_h2_header(&[0x01, 0x39, 0xad]), None);
        assert_eq!(find_h2_header(&[0x01, 0x08]), None);
    }

    #[test]
    fn test_sequence_numbers() {
        assert_eq!(h2_sequence_number(0x08), Some(0));
        assert_eq!(h2_sequence_number(0xf8), Some(3));
        assert_eq!(h2_sequence_number(0x00), None);
    }
}
