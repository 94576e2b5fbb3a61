//! Integrity monitoring
//!
//! Every received frame is inspected before it is decoded: the controller
//! status decides whether it is corrupted, and in byte-pattern modes the
//! payload is compared position by position with what the sender's pattern
//! must have produced. Counters roll up into fixed-size receive windows and
//! periodic send reports.

use crate::link::{FrameStatus, LinkFrame};
use crate::pattern::{next_letter, PatternMode, FILL_ACCEPTED};
use std::fmt::{self, Write as _};
use tracing::{debug, info, Level};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

/// Result of inspecting one received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInspection {
    /// Controller status
    pub status: FrameStatus,
    /// Whether the frame is to be treated as damaged downstream
    pub corrupted: bool,
    /// Payload bytes that did not match the expected pattern
    pub byte_errors: u32,
    /// Window summary completed by this frame, if any
    pub summary: Option<ReceiveSummary>,
}

/// Counters for one receive window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    /// Payload bytes received
    pub bytes: u64,
    /// Frames received
    pub frames: u64,
    /// Frames flagged by the controller
    pub corrupted_frames: u64,
    /// Pattern mismatches
    pub byte_errors: u64,
}

impl ReceiveSummary {
    fn add(&mut self, payload_len: usize, corrupted: bool, byte_errors: u32) {
        self.bytes += payload_len as u64;
        self.frames += 1;
        self.corrupted_frames += u64::from(corrupted);
        self.byte_errors += u64::from(byte_errors);
    }
}

impl fmt::Display for ReceiveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data {:07}, packets {:04}, packets with errors {}, byte errors {:04}",
            self.bytes, self.frames, self.corrupted_frames, self.byte_errors
        )
    }
}

/// Cumulative send and receive totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Frames sent so far
    pub sent: u64,
    /// Frames received so far
    pub received: u64,
}

impl fmt::Display for SendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sent {}, received {}", self.sent, self.received)
    }
}

/// Position tracking for the verifiable byte patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expectation {
    /// Audio, nothing to verify
    None,
    /// Next counter byte, once synchronised
    Counter(Option<u8>),
    /// Letter of the next frame, once synchronised
    Ascii(Option<u8>),
    /// Any of the accepted fill bytes
    Fill,
}

impl Expectation {
    fn for_mode(mode: PatternMode) -> Self {
        match mode {
            PatternMode::Sine => Self::None,
            PatternMode::Counter => Self::Counter(None),
            PatternMode::Ascii => Self::Ascii(None),
            PatternMode::Fill55 | PatternMode::Fill00 => Self::Fill,
        }
    }

    /// Forget position after a frame that could not be verified
    fn desync(&mut self) {
        match self {
            Self::Counter(expected) | Self::Ascii(expected) => *expected = None,
            Self::None | Self::Fill => {}
        }
    }

    /// Compare a payload against the pattern; `mismatch[i]` marks bad bytes
    fn verify(&mut self, payload: &[u8], mismatch: &mut Vec<bool>) -> u32 {
        mismatch.clear();
        match self {
            Self::None => {}
            Self::Counter(expected) => {
                for &b in payload {
                    mismatch.push(expected.is_some_and(|e| e != b));
                    *expected = Some(b.wrapping_add(1));
                }
            }
            Self::Ascii(expected) => {
                if !payload.is_empty() {
                    let reference = expected.unwrap_or_else(|| most_common(payload));
                    mismatch.extend(payload.iter().map(|&b| b != reference));
                    *expected = Some(next_letter(reference));
                }
            }
            Self::Fill => {
                mismatch.extend(payload.iter().map(|b| !FILL_ACCEPTED.contains(b)));
            }
        }
        mismatch.iter().filter(|&&m| m).count() as u32
    }
}

/// Byte occurring most often in `payload`; resynchronises the ASCII letter
/// without trusting any single position
fn most_common(payload: &[u8]) -> u8 {
    let mut counts = [0u16; 256];
    for &b in payload {
        counts[usize::from(b)] += 1;
    }
    (0..=u8::MAX)
        .max_by_key(|&b| counts[usize::from(b)])
        .unwrap_or(0)
}

/// Receive-side integrity checks and send/receive accounting
#[derive(Debug, Clone)]
pub struct IntegrityMonitor {
    mode: PatternMode,
    expectation: Expectation,
    window_limit: u64,
    report_period: u32,
    colored_dumps: bool,
    window: ReceiveSummary,
    totals: ReceiveSummary,
    sent: u64,
    received: u64,
    mismatch: Vec<bool>,
}

impl IntegrityMonitor {
    /// Create a monitor for `mode` with default window and report period
    pub fn new(mode: PatternMode) -> Self {
        Self {
            mode,
            expectation: Expectation::for_mode(mode),
            window_limit: crate::config::DEFAULT_RECEIVE_WINDOW_BYTES,
            report_period: crate::config::DEFAULT_REPORT_PERIOD,
            colored_dumps: false,
            window: ReceiveSummary::default(),
            totals: ReceiveSummary::default(),
            sent: 0,
            received: 0,
            mismatch: Vec::new(),
        }
    }

    /// Emit a receive summary once a window exceeds `bytes`
    pub fn with_window_bytes(mut self, bytes: u64) -> Self {
        self.window_limit = bytes.max(1);
        self
    }

    /// Emit a send report every `period` sent frames
    pub fn with_report_period(mut self, period: u32) -> Self {
        self.report_period = period.max(1);
        self
    }

    /// Highlight mismatches in debug hexdumps with ANSI colour
    pub fn with_colored_dumps(mut self, colored: bool) -> Self {
        self.colored_dumps = colored;
        self
    }

    /// Pattern mode being verified
    pub fn mode(&self) -> PatternMode {
        self.mode
    }

    /// Inspect one received frame
    ///
    /// Corrupted frames are counted and excluded from pattern verification;
    /// position tracking resynchronises on the next clean frame.
    pub fn observe(&mut self, frame: &LinkFrame<'_>) -> FrameInspection {
        self.received += 1;
        let corrupted = frame.is_corrupted();

        let byte_errors = if corrupted {
            debug!("Frame {} flagged by controller: {:?}", self.received, frame.status);
            self.expectation.desync();
            0
        } else {
            let errors = self.expectation.verify(frame.payload, &mut self.mismatch);
            if tracing::enabled!(Level::DEBUG) {
                self.dump(frame, errors);
            }
            errors
        };

        self.window.add(frame.payload.len(), corrupted, byte_errors);
        self.totals.add(frame.payload.len(), corrupted, byte_errors);

        let summary = if self.window.bytes > self.window_limit {
            let summary = std::mem::take(&mut self.window);
            info!("Summary: {}", summary);
            Some(summary)
        } else {
            None
        };

        FrameInspection {
            status: frame.status,
            corrupted,
            byte_errors,
            summary,
        }
    }

    /// Account for one sent frame, returning a report on period boundaries
    pub fn record_sent(&mut self) -> Option<SendReport> {
        self.sent += 1;
        if self.sent % u64::from(self.report_period) == 0 {
            let report = self.report();
            info!("SCO: {}", report);
            Some(report)
        } else {
            None
        }
    }

    /// Current cumulative totals
    pub fn report(&self) -> SendReport {
        SendReport {
            sent: self.sent,
            received: self.received,
        }
    }

    /// Counters accumulated since creation, across all windows
    pub fn totals(&self) -> ReceiveSummary {
        self.totals
    }

    /// Counters of the window in progress
    pub fn current_window(&self) -> ReceiveSummary {
        self.window
    }

    fn dump(&self, frame: &LinkFrame<'_>, errors: u32) {
        match self.mode {
            PatternMode::Ascii => {
                debug!("data: {}", String::from_utf8_lossy(frame.payload));
            }
            PatternMode::Counter => {
                debug!("data: {}", self.hexdump(frame.payload, &self.mismatch));
            }
            PatternMode::Fill55 | PatternMode::Fill00 if errors > 0 => {
                let header = self.hexdump(frame.header, &[]);
                debug!("data: {}{}", header, self.hexdump(frame.payload, &self.mismatch));
            }
            _ => {}
        }
    }

    fn hexdump(&self, bytes: &[u8], mismatch: &[bool]) -> String {
        let mut out = String::with_capacity(bytes.len() * 3);
        for (i, b) in bytes.iter().enumerate() {
            if mismatch.get(i).copied().unwrap_or(false) && self.colored_dumps {
                let _ = write!(out, "{}{:02x}{} ", ANSI_RED, b, ANSI_RESET);
            } else if mismatch.get(i).copied().unwrap_or(false) {
                let _ = write!(out, "[{:02x}] ", b);
            } else {
                let _ = write!(out, "{:02x} ", b);
            }
        }
        out
    }
}
