//! Test pattern generation
//!
//! A [`SignalSource`] produces the payload for outgoing link frames. Audio
//! mode plays a fixed tone; the other modes send byte patterns the receiver
//! can verify position by position.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One period of an 8 kHz tone as signed 8-bit samples
const SINE_I8: [i8; 50] = [
    0, 15, 31, 46, 61, 74, 86, 97, 107, 114, //
    120, 124, 126, 126, 124, 120, 114, 107, 97, 86, //
    74, 61, 46, 31, 15, 0, -15, -31, -46, -61, //
    -74, -86, -97, -107, -114, -120, -124, -126, -126, -124, //
    -120, -114, -107, -97, -86, -74, -61, -46, -31, -15,
];

/// One period of a 160 Hz tone at 16 kHz
const SINE_I16: [i16; 100] = [
    0, 2057, 4107, 6140, 8149, 10126, 12062, 13952, 15786, 17557, //
    19260, 20886, 22431, 23886, 25247, 26509, 27666, 28714, 29648, 30466, //
    31163, 31738, 32187, 32509, 32702, 32767, 32702, 32509, 32187, 31738, //
    31163, 30466, 29648, 28714, 27666, 26509, 25247, 23886, 22431, 20886, //
    19260, 17557, 15786, 13952, 12062, 10126, 8149, 6140, 4107, 2057, //
    0, -2057, -4107, -6140, -8149, -10126, -12062, -13952, -15786, -17557, //
    -19260, -20886, -22431, -23886, -25247, -26509, -27666, -28714, -29648, -30466, //
    -31163, -31738, -32187, -32509, -32702, -32767, -32702, -32509, -32187, -31738, //
    -31163, -30466, -29648, -28714, -27666, -26509, -25247, -23886, -22431, -20886, //
    -19260, -17557, -15786, -13952, -12062, -10126, -8149, -6140, -4107, -2057,
];

/// Bytes accepted by the fill-mode verifier
pub const FILL_ACCEPTED: [u8; 4] = [0x00, 0x35, 0x53, 0x55];

/// Test pattern selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    /// Periodic tone, decoded and played back on receive
    #[default]
    Sine,
    /// One lowercase letter per frame, advancing each frame
    Ascii,
    /// Incrementing byte counter
    Counter,
    /// Constant 0x55
    Fill55,
    /// Constant 0x00
    Fill00,
}

impl PatternMode {
    /// All modes in declaration order
    pub const ALL: [PatternMode; 5] = [
        PatternMode::Sine,
        PatternMode::Ascii,
        PatternMode::Counter,
        PatternMode::Fill55,
        PatternMode::Fill00,
    ];

    /// Get the mode name as used in configuration
    pub fn name(self) -> &'static str {
        match self {
            Self::Sine => "sine",
            Self::Ascii => "ascii",
            Self::Counter => "counter",
            Self::Fill55 => "fill55",
            Self::Fill00 => "fill00",
        }
    }

    /// Whether the mode carries audio rather than a byte pattern
    pub fn is_audio(self) -> bool {
        matches!(self, Self::Sine)
    }

    /// Constant byte sent by the fill modes
    pub fn fill_byte(self) -> Option<u8> {
        match self {
            Self::Fill55 => Some(0x55),
            Self::Fill00 => Some(0x00),
            _ => None,
        }
    }

    /// Length of one full pattern period in frames
    pub fn period_frames(self, payload_len: usize) -> usize {
        match self {
            Self::Sine => lcm(SINE_I8.len(), payload_len) / payload_len.max(1),
            Self::Ascii => 26,
            Self::Counter => lcm(256, payload_len) / payload_len.max(1),
            Self::Fill55 | Self::Fill00 => 1,
        }
    }
}

impl fmt::Display for PatternMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PatternMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown pattern mode: {}", s))
    }
}

/// Source of outgoing test payloads
///
/// Sources are deterministic: after [`reset`](SignalSource::reset) they
/// repeat exactly the sequence they produced before.
pub trait SignalSource: Send {
    /// Mode this source implements
    fn mode(&self) -> PatternMode;

    /// Fill one link payload with 8-bit data
    fn fill_payload(&mut self, out: &mut [u8]);

    /// Fill a block of 16-bit samples for the wideband encoder
    ///
    /// Byte patterns are placed in the high byte of each sample.
    fn fill_samples(&mut self, out: &mut [i16]) {
        let mut bytes = vec![0u8; out.len()];
        self.fill_payload(&mut bytes);
        for (dst, &b) in out.iter_mut().zip(bytes.iter()) {
            *dst = i16::from(b as i8) << 8;
        }
    }

    /// Restart the pattern from its first value
    fn reset(&mut self);

    /// Produce the next `n` payload bytes
    fn next(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        self.fill_payload(&mut out);
        out
    }
}

/// Table-driven tone
///
/// The 8-bit and 16-bit tables keep separate cursors so switching codec
/// mid-session never starts the other table at an odd phase.
#[derive(Debug, Clone, Default)]
pub struct SineSource {
    cursor_i8: usize,
    cursor_i16: usize,
}

impl SineSource {
    /// Create a new tone source at phase 0
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalSource for SineSource {
    fn mode(&self) -> PatternMode {
        PatternMode::Sine
    }

    fn fill_payload(&mut self, out: &mut [u8]) {
        for dst in out.iter_mut() {
            *dst = SINE_I8[self.cursor_i8] as u8;
            self.cursor_i8 = (self.cursor_i8 + 1) % SINE_I8.len();
        }
    }

    fn fill_samples(&mut self, out: &mut [i16]) {
        for dst in out.iter_mut() {
            *dst = SINE_I16[self.cursor_i16];
            self.cursor_i16 = (self.cursor_i16 + 1) % SINE_I16.len();
        }
    }

    fn reset(&mut self) {
        self.cursor_i8 = 0;
        self.cursor_i16 = 0;
    }
}

/// Repeating lowercase alphabet, one letter per frame
#[derive(Debug, Clone)]
pub struct AsciiSource {
    letter: u8,
}

impl AsciiSource {
    /// Create a new source starting at `a`
    pub fn new() -> Self {
        Self { letter: b'a' }
    }
}

impl Default for AsciiSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for AsciiSource {
    fn mode(&self) -> PatternMode {
        PatternMode::Ascii
    }

    fn fill_payload(&mut self, out: &mut [u8]) {
        out.fill(self.letter);
        self.letter = next_letter(self.letter);
    }

    fn reset(&mut self) {
        self.letter = b'a';
    }
}

/// Incrementing byte counter
#[derive(Debug, Clone, Default)]
pub struct CounterSource {
    value: u8,
}

impl CounterSource {
    /// Create a new counter starting at 0
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalSource for CounterSource {
    fn mode(&self) -> PatternMode {
        PatternMode::Counter
    }

    fn fill_payload(&mut self, out: &mut [u8]) {
        for dst in out.iter_mut() {
            *dst = self.value;
            self.value = self.value.wrapping_add(1);
        }
    }

    fn reset(&mut self) {
        self.value = 0;
    }
}

/// Constant fill byte
#[derive(Debug, Clone)]
pub struct FillSource {
    mode: PatternMode,
    byte: u8,
}

impl FillSource {
    /// Source for `Fill55` or `Fill00`; any other mode yields `None`
    pub fn new(mode: PatternMode) -> Option<Self> {
        mode.fill_byte().map(|byte| Self { mode, byte })
    }
}

impl SignalSource for FillSource {
    fn mode(&self) -> PatternMode {
        self.mode
    }

    fn fill_payload(&mut self, out: &mut [u8]) {
        out.fill(self.byte);
    }

    fn reset(&mut self) {}
}

/// Create the default source for a mode
pub fn signal_source(mode: PatternMode) -> Box<dyn SignalSource> {
    match mode {
        PatternMode::Sine => Box::new(SineSource::new()),
        PatternMode::Ascii => Box::new(AsciiSource::new()),
        PatternMode::Counter => Box::new(CounterSource::new()),
        PatternMode::Fill55 => Box::new(FillSource { mode, byte: 0x55 }),
        PatternMode::Fill00 => Box::new(FillSource { mode, byte: 0x00 }),
    }
}

/// Letter following `letter`, wrapping `z` back to `a`
pub fn next_letter(letter: u8) -> u8 {
    if letter >= b'z' { b'a' } else { letter + 1 }
}

fn lcm(a: usize, b: usize) -> usize {
    fn gcd(a: usize, b: usize) -> usize {
        if b == 0 { a } else { gcd(b, a % b) }
    }
    if a == 0 || b == 0 { 0 } else { a / gcd(a, b) * b }
}
