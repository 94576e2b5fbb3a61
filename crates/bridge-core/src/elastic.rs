//! Elastic audio buffer
//!
//! Decoded PCM arrives in small irregular bursts, one link frame or coder
//! frame at a time, while an output device pulls fixed-size blocks on its
//! own clock. The buffer between them holds playback back until a
//! prebuffer threshold is reached and then serves pulls in FIFO order,
//! padding short pulls with silence.
//!
//! [`ElasticBuffer`] is the single-owner form. [`ElasticBuffer::into_split`]
//! turns it into a writer and a reader that can live on different threads;
//! the halves share a lock-free single-producer single-consumer ring.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use scobridge_codec_core::CodecId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Byte value used for silence (signed PCM zero)
const SILENCE: u8 = 0;

/// Buffer sizing for one codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackProfile {
    /// Bytes that must be buffered before playback starts
    pub prebuffer_bytes: usize,
    /// Bytes the device pulls per callback
    pub pull_bytes: usize,
    /// Bytes one decoded frame adds
    pub frame_bytes: usize,
}

impl PlaybackProfile {
    /// Sizing used for a negotiated codec
    pub fn for_codec(codec: CodecId) -> Self {
        let format = codec.pcm_format();
        let (prebuffer_ms, pull_frames) = match codec {
            CodecId::Cvsd => (5, 24),
            CodecId::Msbc => (50, 120),
        };
        Self {
            prebuffer_bytes: format.bytes_for_ms(prebuffer_ms),
            pull_bytes: pull_frames * format.bytes_per_sample,
            frame_bytes: codec.samples_per_frame() * format.bytes_per_sample,
        }
    }

    /// Ring capacity needed to absorb one frame burst on top of the prebuffer
    pub fn capacity(&self) -> usize {
        (2 * self.prebuffer_bytes).max(self.prebuffer_bytes + self.frame_bytes + self.pull_bytes)
    }
}

/// Buffer health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElasticStats {
    /// Pulls that found fewer bytes than requested after the gate opened
    pub underruns: u64,
    /// Unread bytes discarded to make room for newer data
    pub overwritten_bytes: u64,
    /// Incoming bytes discarded because the reader fell behind
    pub dropped_bytes: u64,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    threshold: usize,
    gate_open: AtomicBool,
    underruns: AtomicU64,
    overwritten_bytes: AtomicU64,
    dropped_bytes: AtomicU64,
}

impl Shared {
    fn new(capacity: usize, threshold: usize) -> Self {
        Self {
            capacity,
            threshold,
            gate_open: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            overwritten_bytes: AtomicU64::new(0),
            dropped_bytes: AtomicU64::new(0),
        }
    }

    fn update_gate(&self, buffered: usize) {
        if buffered >= self.threshold && !self.gate_open.swap(true, Ordering::AcqRel) {
            debug!(
                "Prebuffer threshold of {} bytes reached, playback starts",
                self.threshold
            );
        }
    }

    fn stats(&self) -> ElasticStats {
        ElasticStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            overwritten_bytes: self.overwritten_bytes.load(Ordering::Relaxed),
            dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
        }
    }

    /// Serve one pull from `consumer`
    fn read(&self, consumer: &mut HeapConsumer<u8>, out: &mut [u8]) -> usize {
        if !self.gate_open.load(Ordering::Acquire) {
            out.fill(SILENCE);
            return 0;
        }

        let count = consumer.pop_slice(out);
        if count < out.len() {
            self.underruns.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Playback underrun: {} bytes requested, {} available",
                out.len(),
                count
            );
            out[count..].fill(SILENCE);
        }
        count
    }
}

/// Single-owner elastic buffer
pub struct ElasticBuffer {
    producer: HeapProducer<u8>,
    consumer: HeapConsumer<u8>,
    shared: Arc<Shared>,
}

impl ElasticBuffer {
    /// Create a buffer of `capacity` bytes gated at `threshold` bytes
    ///
    /// The threshold is clamped to the capacity so the gate can always open.
    pub fn new(capacity: usize, threshold: usize) -> Self {
        let capacity = capacity.max(1);
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        Self {
            producer,
            consumer,
            shared: Arc::new(Shared::new(capacity, threshold.min(capacity))),
        }
    }

    /// Create a buffer sized for a playback profile
    pub fn with_profile(profile: &PlaybackProfile) -> Self {
        Self::new(profile.capacity(), profile.prebuffer_bytes)
    }

    /// Append decoded PCM bytes
    ///
    /// When the data does not fit, the oldest unread bytes are discarded
    /// and counted in [`ElasticStats::overwritten_bytes`].
    pub fn write(&mut self, data: &[u8]) {
        let capacity = self.shared.capacity;
        let data = if data.len() > capacity {
            self.count_overwritten(data.len() - capacity);
            &data[data.len() - capacity..]
        } else {
            data
        };

        let free = self.producer.free_len();
        if data.len() > free {
            let skipped = self.consumer.skip(data.len() - free);
            self.count_overwritten(skipped);
        }
        self.producer.push_slice(data);
        self.shared.update_gate(self.consumer.len());
    }

    /// Fill `out` for one device pull and return the number of real bytes
    ///
    /// Until the prebuffer threshold has been reached the whole block is
    /// silence and nothing is consumed.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.shared.read(&mut self.consumer, out)
    }

    /// Bytes currently buffered
    pub fn available(&self) -> usize {
        self.consumer.len()
    }

    /// Whether playback has been released
    pub fn prebuffer_threshold_reached(&self) -> bool {
        self.shared.gate_open.load(Ordering::Acquire)
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Prebuffer threshold in bytes
    pub fn threshold(&self) -> usize {
        self.shared.threshold
    }

    /// Health counters
    pub fn stats(&self) -> ElasticStats {
        self.shared.stats()
    }

    /// Split into a writer and a reader for use on separate threads
    pub fn into_split(self) -> (ElasticWriter, ElasticReader) {
        (
            ElasticWriter {
                producer: self.producer,
                shared: self.shared.clone(),
            },
            ElasticReader {
                consumer: self.consumer,
                shared: self.shared,
            },
        )
    }

    fn count_overwritten(&self, bytes: usize) {
        if bytes > 0 {
            self.shared
                .overwritten_bytes
                .fetch_add(bytes as u64, Ordering::Relaxed);
            debug!("Elastic buffer full, overwrote {} unread bytes", bytes);
        }
    }
}

/// Producer half of a split buffer
pub struct ElasticWriter {
    producer: HeapProducer<u8>,
    shared: Arc<Shared>,
}

impl ElasticWriter {
    /// Append decoded PCM bytes and return how many were accepted
    ///
    /// The writer cannot move the read cursor, so bytes that do not fit are
    /// dropped and counted in [`ElasticStats::dropped_bytes`].
    pub fn write(&mut self, data: &[u8]) -> usize {
        let written = self.producer.push_slice(data);
        if written < data.len() {
            let dropped = data.len() - written;
            self.shared
                .dropped_bytes
                .fetch_add(dropped as u64, Ordering::Relaxed);
            warn!("Elastic buffer full, dropped {} bytes", dropped);
        }
        self.shared.update_gate(self.producer.len());
        written
    }

    /// Bytes currently buffered
    pub fn available(&self) -> usize {
        self.producer.len()
    }

    /// Whether playback has been released
    pub fn prebuffer_threshold_reached(&self) -> bool {
        self.shared.gate_open.load(Ordering::Acquire)
    }

    /// Health counters
    pub fn stats(&self) -> ElasticStats {
        self.shared.stats()
    }
}

/// Consumer half of a split buffer
pub struct ElasticReader {
    consumer: HeapConsumer<u8>,
    shared: Arc<Shared>,
}

impl ElasticReader {
    /// Fill `out` for one device pull and return the number of real bytes
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.shared.read(&mut self.consumer, out)
    }

    /// Bytes currently buffered
    pub fn available(&self) -> usize {
        self.consumer.len()
    }

    /// Whether playback has been released
    pub fn prebuffer_threshold_reached(&self) -> bool {
        self.shared.gate_open.load(Ordering::Acquire)
    }

    /// Health counters
    pub fn stats(&self) -> ElasticStats {
        self.shared.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let cvsd = PlaybackProfile::for_codec(CodecId::Cvsd);
        assert_eq!(cvsd.prebuffer_bytes, 40);
        assert_eq!(cvsd.pull_bytes, 24);
        assert_eq!(cvsd.capacity(), 88);

        let msbc = PlaybackProfile::for_codec(CodecId::Msbc);
        assert_eq!(msbc.prebuffer_bytes, 1600);
        assert_eq!(msbc.pull_bytes, 240);
        assert_eq!(msbc.capacity(), 3200);
    }

    #[test]
    fn test_gate_holds_back_playback() {
        let mut buffer = ElasticBuffer::new(64, 16);
        buffer.write(&[1; 10]);

        let mut out = [0xffu8; 8];
        assert_eq!(buffer.read(&mut out), 0);
        assert_eq!(out, [0; 8]);
        assert_eq!(buffer.available(), 10);
        assert!(!buffer.prebuffer_threshold_reached());

        buffer.write(&[2; 6]);
        assert!(buffer.prebuffer_threshold_reached());
        assert_eq!(buffer.read(&mut out), 8);
        assert_eq!(out, [1; 8]);
    }

    #[test]
    fn test_gate_stays_open() {
        let mut buffer = ElasticBuffer::new(32, 4);
        buffer.write(&[7; 4]);
        let mut out = [0u8; 4];
        buffer.read(&mut out);
        assert_eq!(buffer.available(), 0);

        buffer.write(&[8; 2]);
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(out, [8, 8, 0, 0]);
        assert_eq!(buffer.stats().underruns, 1);
    }

    #[test]
    fn test_overwrite_oldest() {
        let mut buffer = ElasticBuffer::new(8, 1);
        buffer.write(&[1, 2, 3, 4, 5, 6]);
        buffer.write(&[7, 8, 9, 10]);
        assert_eq!(buffer.available(), 8);
        assert_eq!(buffer.stats().overwritten_bytes, 2);

        let mut out = [0u8; 8];
        assert_eq!(buffer.read(&mut out), 8);
        assert_eq!(out, [3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let mut buffer = ElasticBuffer::new(4, 1);
        buffer.write(&[1, 2, 3, 4, 5, 6]);
        let mut out = [0u8; 4];
        buffer.read(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
        assert_eq!(buffer.stats().overwritten_bytes, 2);
    }

    #[test]
    fn test_split_halves_across_threads() {
        let (mut writer, mut reader) = ElasticBuffer::new(256, 32).into_split();

        let producer = std::thread::spawn(move || {
            for chunk in 0..8u8 {
                writer.write(&[chunk; 8]);
            }
            writer
        });
        let writer = producer.join().unwrap();
        assert!(writer.prebuffer_threshold_reached());

        let mut out = [0u8; 64];
        assert_eq!(reader.read(&mut out), 64);
        for (i, chunk) in out.chunks(8).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn test_split_writer_drops_excess() {
        let (mut writer, reader) = ElasticBuffer::new(8, 4).into_split();
        assert_eq!(writer.write(&[1; 6]), 6);
        assert_eq!(writer.write(&[2; 6]), 2);
        assert_eq!(reader.stats().dropped_bytes, 4);
        assert_eq!(reader.available(), 8);
    }
}
