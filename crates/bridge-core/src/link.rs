//! SCO link framing and transports
//!
//! An HCI SCO packet is a three-byte header followed by the payload:
//!
//! ```text
//!  byte 0        byte 1                     byte 2
//! +------------+---------------------------+----------------+----------
//! | handle 7:0 | rsvd | status | handle 11:8 | payload length | payload
//! +------------+---------------------------+----------------+----------
//! ```
//!
//! The two status bits are set by the controller when a frame was received
//! with errors or not at all.

use crate::error::Result;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Size of the SCO packet header
pub const SCO_HEADER_LEN: usize = 3;

/// Mask of the connection handle in the first header word
pub const HANDLE_MASK: u16 = 0x0fff;

/// Mask of the status flags in the second header byte
pub const STATUS_MASK: u8 = 0x30;

/// Packet status reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// Correctly received
    Good,
    /// Received, data possibly invalid
    PossiblyInvalid,
    /// Nothing received, payload is filler
    NoData,
    /// Partially lost
    PartiallyLost,
}

impl FrameStatus {
    /// Decode the two status bits
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Good,
            1 => Self::PossiblyInvalid,
            2 => Self::NoData,
            _ => Self::PartiallyLost,
        }
    }

    /// Status bits as carried in the header
    pub fn bits(self) -> u8 {
        match self {
            Self::Good => 0,
            Self::PossiblyInvalid => 1,
            Self::NoData => 2,
            Self::PartiallyLost => 3,
        }
    }

    /// Whether the frame must be treated as damaged
    pub fn is_corrupted(self) -> bool {
        self != Self::Good
    }
}

/// One received SCO packet, borrowed from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFrame<'a> {
    /// Connection handle
    pub handle: u16,
    /// Controller status
    pub status: FrameStatus,
    /// Payload bytes
    pub payload: &'a [u8],
    /// The raw header, empty for malformed packets
    pub header: &'a [u8],
}

impl<'a> LinkFrame<'a> {
    /// Parse a raw packet
    ///
    /// A packet too short to hold a header yields an empty, uncorrupted
    /// frame. A length byte that disagrees with the packet size is resolved
    /// in favour of the shorter of the two.
    pub fn parse(packet: &'a [u8]) -> Self {
        if packet.len() < SCO_HEADER_LEN {
            debug!("Malformed SCO packet of {} bytes", packet.len());
            return Self {
                handle: 0,
                status: FrameStatus::Good,
                payload: &[],
                header: &[],
            };
        }

        let word = u16::from_le_bytes([packet[0], packet[1]]);
        let declared = usize::from(packet[2]);
        let body = &packet[SCO_HEADER_LEN..];
        if declared != body.len() {
            trace!(
                "SCO length byte {} disagrees with {} payload bytes",
                declared,
                body.len()
            );
        }

        Self {
            handle: word & HANDLE_MASK,
            status: FrameStatus::from_bits((packet[1] & STATUS_MASK) >> 4),
            payload: &body[..declared.min(body.len())],
            header: &packet[..SCO_HEADER_LEN],
        }
    }

    /// Whether the controller flagged this frame
    pub fn is_corrupted(&self) -> bool {
        self.status.is_corrupted()
    }
}

/// Build the three header bytes for a packet
pub fn encode_header(handle: u16, status: FrameStatus, payload_len: u8) -> [u8; SCO_HEADER_LEN] {
    let word = (handle & HANDLE_MASK) | (u16::from(status.bits()) << 12);
    let [lo, hi] = word.to_le_bytes();
    [lo, hi, payload_len]
}

/// Outgoing side of a SCO connection
pub trait LinkTransport {
    /// Total packet size, header included
    fn packet_len(&self) -> usize;

    /// Hand one complete packet to the controller
    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;

    /// Ask for the next "can send now" event
    fn request_can_send_now(&mut self);
}

/// In-process link that loops every sent packet back as a received one
///
/// Corruption can be injected in two ways: every n-th packet gets its status
/// flags set (as a controller would report a damaged frame), and payload bits
/// can be flipped at random without setting any flag. Both are driven by a
/// seeded generator so runs are reproducible.
#[derive(Debug)]
pub struct LoopbackLink {
    payload_len: usize,
    queue: VecDeque<Vec<u8>>,
    rng: SmallRng,
    corrupt_every: Option<u64>,
    bit_error_rate: f64,
    sent: u64,
    flagged: u64,
    bit_errors: u64,
    send_requests: u64,
}

impl LoopbackLink {
    /// Create a clean loopback carrying `payload_len`-byte payloads
    pub fn new(payload_len: usize) -> Self {
        Self {
            payload_len,
            queue: VecDeque::new(),
            rng: SmallRng::seed_from_u64(0),
            corrupt_every: None,
            bit_error_rate: 0.0,
            sent: 0,
            flagged: 0,
            bit_errors: 0,
            send_requests: 0,
        }
    }

    /// Seed the corruption generator
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Flag every `n`-th packet as damaged; 0 disables
    pub fn with_corrupt_every(mut self, n: u64) -> Self {
        self.corrupt_every = (n > 0).then_some(n);
        self
    }

    /// Flip each payload bit with probability `rate`
    pub fn with_bit_error_rate(mut self, rate: f64) -> Self {
        self.bit_error_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Take the next looped-back packet
    pub fn receive(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }

    /// Packets waiting to be received
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Packets accepted so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Packets delivered with status flags set
    pub fn flagged(&self) -> u64 {
        self.flagged
    }

    /// Payload bits flipped so far
    pub fn bit_errors(&self) -> u64 {
        self.bit_errors
    }

    /// Send events requested so far
    pub fn send_requests(&self) -> u64 {
        self.send_requests
    }

    fn flag(&mut self, packet: &mut [u8]) {
        let status = FrameStatus::from_bits(self.rng.gen_range(1..=3));
        packet[1] = (packet[1] & !STATUS_MASK) | (status.bits() << 4);
        if status == FrameStatus::NoData {
            packet[SCO_HEADER_LEN..].fill(0);
        }
        self.flagged += 1;
        trace!("Loopback flagged packet {} as {:?}", self.sent, status);
    }

    fn flip_bits(&mut self, payload: &mut [u8]) {
        for byte in payload.iter_mut() {
            for bit in 0..8 {
                if self.rng.gen_bool(self.bit_error_rate) {
                    *byte ^= 1 << bit;
                    self.bit_errors += 1;
                }
            }
        }
    }
}

impl LinkTransport for LoopbackLink {
    fn packet_len(&self) -> usize {
        SCO_HEADER_LEN + self.payload_len
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.sent += 1;
        let mut looped = packet.to_vec();

        if looped.len() >= SCO_HEADER_LEN {
            if self.corrupt_every.is_some_and(|n| self.sent % n == 0) {
                self.flag(&mut looped);
            } else if self.bit_error_rate > 0.0 {
                self.flip_bits(&mut looped[SCO_HEADER_LEN..]);
            }
        }

        self.queue.push_back(looped);
        Ok(())
    }

    fn request_can_send_now(&mut self) {
        self.send_requests += 1;
    }
}
