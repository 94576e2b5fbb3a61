//! Live playback through an output device
//!
//! The device runs on its own clock and pulls fixed-size blocks from the
//! read half of an elastic buffer; the session pushes decoded frames into
//! the write half. [`DevicePlaybackSink`] wires the two together for any
//! [`OutputDevice`].

use crate::elastic::{ElasticBuffer, ElasticReader, ElasticStats, ElasticWriter, PlaybackProfile};
use crate::error::{BridgeError, Result};
use crate::sink::PlaybackSink;
use parking_lot::Mutex;
use scobridge_codec_core::{CodecId, Pcm, PcmFormat};
use std::sync::Arc;
use tracing::{debug, info};

/// An audio output that pulls PCM bytes on its own schedule
pub trait OutputDevice: Send {
    /// Device name for log messages
    fn name(&self) -> &str;

    /// Start pulling `pull_bytes`-byte blocks of `format` audio from `reader`
    fn start(&mut self, format: PcmFormat, pull_bytes: usize, reader: ElasticReader) -> Result<()>;

    /// Stop pulling and release the device
    fn stop(&mut self);
}

/// Playback sink feeding an [`OutputDevice`] through an elastic buffer
pub struct DevicePlaybackSink<D: OutputDevice> {
    device: D,
    writer: Option<ElasticWriter>,
    scratch: Vec<u8>,
}

impl<D: OutputDevice> DevicePlaybackSink<D> {
    /// Wrap a device
    pub fn new(device: D) -> Self {
        Self {
            device,
            writer: None,
            scratch: Vec::new(),
        }
    }

    /// Buffer health, while playing
    pub fn stats(&self) -> Option<ElasticStats> {
        self.writer.as_ref().map(ElasticWriter::stats)
    }

    /// The wrapped device
    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: OutputDevice> PlaybackSink for DevicePlaybackSink<D> {
    fn name(&self) -> &str {
        self.device.name()
    }

    fn open(&mut self, codec: CodecId) -> Result<()> {
        self.close()?;

        let profile = PlaybackProfile::for_codec(codec);
        let (writer, reader) = ElasticBuffer::with_profile(&profile).into_split();
        self.device
            .start(codec.pcm_format(), profile.pull_bytes, reader)?;

        info!(
            "Playback on {}: prebuffer {} bytes, pull {} bytes",
            self.device.name(),
            profile.prebuffer_bytes,
            profile.pull_bytes
        );
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, pcm: Pcm<'_>) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BridgeError::sink_write("device", "playback not started"))?;

        self.scratch.clear();
        match pcm {
            Pcm::I8(samples) => self.scratch.extend(samples.iter().map(|&s| s as u8)),
            Pcm::I16(samples) => self
                .scratch
                .extend(samples.iter().flat_map(|s| s.to_le_bytes())),
        }
        writer.write(&self.scratch);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            self.device.stop();
            let stats = writer.stats();
            debug!(
                "Playback stopped: {} underruns, {} bytes dropped",
                stats.underruns, stats.dropped_bytes
            );
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryDeviceState {
    reader: Option<ElasticReader>,
    format: Option<PcmFormat>,
    pull_bytes: usize,
    played: Vec<u8>,
    starts: u32,
}

/// Output device that plays into memory
///
/// Clones share the same state, so a test can hand one clone to a sink and
/// drive device callbacks through another with [`pull`](Self::pull).
#[derive(Clone, Default)]
pub struct MemoryOutputDevice {
    state: Arc<Mutex<MemoryDeviceState>>,
}

impl MemoryOutputDevice {
    /// Create a stopped device
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one device callback; returns the real bytes delivered, or `None`
    /// when the device is stopped
    pub fn pull(&self) -> Option<usize> {
        let mut state = self.state.lock();
        let pull_bytes = state.pull_bytes;
        let mut block = vec![0u8; pull_bytes];
        let real = state.reader.as_mut()?.read(&mut block);
        state.played.extend_from_slice(&block);
        Some(real)
    }

    /// Everything played so far, silence included
    pub fn played(&self) -> Vec<u8> {
        self.state.lock().played.clone()
    }

    /// Format of the current or last playback
    pub fn format(&self) -> Option<PcmFormat> {
        self.state.lock().format
    }

    /// Whether the device is currently pulling
    pub fn is_running(&self) -> bool {
        self.state.lock().reader.is_some()
    }

    /// Number of times the device was started
    pub fn starts(&self) -> u32 {
        self.state.lock().starts
    }
}

impl OutputDevice for MemoryOutputDevice {
    fn name(&self) -> &str {
        "memory"
    }

    fn start(&mut self, format: PcmFormat, pull_bytes: usize, reader: ElasticReader) -> Result<()> {
        let mut state = self.state.lock();
        state.reader = Some(reader);
        state.format = Some(format);
        state.pull_bytes = pull_bytes;
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().reader = None;
    }
}

/// Device buffer size in frames matching a pull of `pull_bytes`
#[cfg_attr(not(feature = "device-cpal"), allow(dead_code))]
fn pull_frames(format: PcmFormat, pull_bytes: usize) -> u32 {
    (pull_bytes / format.bytes_per_sample.max(1)).max(1) as u32
}

/// Fill `block` from `reader` in pulls of at most `pull_bytes`
///
/// Hosts may hand out larger callbacks than requested; reading in pull-sized
/// steps keeps every read within the buffer's capacity.
#[cfg_attr(not(feature = "device-cpal"), allow(dead_code))]
fn read_pulls(reader: &mut ElasticReader, block: &mut [u8], pull_bytes: usize) -> usize {
    block
        .chunks_mut(pull_bytes.max(1))
        .map(|chunk| reader.read(chunk))
        .sum()
}

/// Playback sink on the default system output
#[cfg(feature = "device-cpal")]
pub fn default_output_sink() -> Option<Box<dyn PlaybackSink>> {
    Some(Box::new(DevicePlaybackSink::new(CpalOutputDevice::new())))
}

/// Playback sink on the default system output
///
/// Built without `device-cpal` there is no device backend; live playback is
/// reported as disabled and the session runs without it.
#[cfg(not(feature = "device-cpal"))]
pub fn default_output_sink() -> Option<Box<dyn PlaybackSink>> {
    tracing::warn!("Built without the device-cpal feature, live playback disabled");
    None
}

#[cfg(feature = "device-cpal")]
pub use cpal_backend::CpalOutputDevice;

#[cfg(feature = "device-cpal")]
mod cpal_backend {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc;
    use std::thread::JoinHandle;
    use tracing::error;

    /// Default system output through `cpal`
    ///
    /// cpal streams are not `Send`, so the stream lives on a dedicated thread
    /// that owns it until [`stop`](OutputDevice::stop) is called.
    pub struct CpalOutputDevice {
        name: String,
        shutdown: Option<mpsc::Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl CpalOutputDevice {
        /// Use the host's default output device
        pub fn new() -> Self {
            Self {
                name: "default output".to_string(),
                shutdown: None,
                thread: None,
            }
        }
    }

    impl Default for CpalOutputDevice {
        fn default() -> Self {
            Self::new()
        }
    }

    fn build_stream(
        format: PcmFormat,
        pull_bytes: usize,
        mut reader: ElasticReader,
    ) -> Result<(cpal::Stream, String)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BridgeError::device_unavailable("no default output device"))?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(pull_frames(format, pull_bytes)),
        };
        let bytes_per_sample = format.bytes_per_sample;
        let mut block = Vec::with_capacity(pull_bytes);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    block.resize(data.len() * bytes_per_sample, 0);
                    read_pulls(&mut reader, &mut block, pull_bytes);
                    if bytes_per_sample == 1 {
                        for (dst, &b) in data.iter_mut().zip(block.iter()) {
                            *dst = f32::from(b as i8) / 128.0;
                        }
                    } else {
                        for (dst, pair) in data.iter_mut().zip(block.chunks_exact(2)) {
                            *dst = f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0;
                        }
                    }
                },
                |err| {
                    error!("Audio playback error: {}", err);
                },
                None,
            )
            .map_err(|e| BridgeError::device_unavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| BridgeError::device_unavailable(e.to_string()))?;
        Ok((stream, name))
    }

    impl OutputDevice for CpalOutputDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn start(&mut self, format: PcmFormat, pull_bytes: usize, reader: ElasticReader) -> Result<()> {
            self.stop();

            let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String>>(1);
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

            let thread = std::thread::spawn(move || {
                match build_stream(format, pull_bytes, reader) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        // Hold the stream until told to stop or the sender is gone
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });

            let name = ready_rx
                .recv()
                .map_err(|_| BridgeError::device_unavailable("playback thread exited"))??;
            info!("Started audio playback on device: {}", name);

            self.name = name;
            self.shutdown = Some(shutdown_tx);
            self.thread = Some(thread);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    impl Drop for CpalOutputDevice {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_sink_gates_playback() {
        let device = MemoryOutputDevice::new();
        let mut sink = DevicePlaybackSink::new(device.clone());
        sink.open(CodecId::Cvsd).unwrap();
        assert!(device.is_running());
        assert_eq!(device.format().unwrap().sample_rate, 8000);

        // 24 bytes are below the 40-byte prebuffer
        sink.write(Pcm::I8(&[5; 24])).unwrap();
        assert_eq!(device.pull(), Some(0));

        sink.write(Pcm::I8(&[6; 24])).unwrap();
        assert_eq!(device.pull(), Some(24));
        assert_eq!(device.pull(), Some(24));

        let played = device.played();
        assert_eq!(&played[..24], &[0; 24]);
        assert_eq!(&played[24..48], &[5; 24]);
        assert_eq!(&played[48..], &[6; 24]);
    }

    #[test]
    fn test_device_sink_close_stops_device() {
        let device = MemoryOutputDevice::new();
        let mut sink = DevicePlaybackSink::new(device.clone());
        sink.open(CodecId::Msbc).unwrap();
        sink.write(Pcm::I16(&[1, 2, 3])).unwrap();
        sink.close().unwrap();

        assert!(!device.is_running());
        assert_eq!(device.pull(), None);
        assert!(sink.write(Pcm::I16(&[1])).is_err());
    }

    #[test]
    fn test_pull_frames_follow_format() {
        assert_eq!(pull_frames(CodecId::Cvsd.pcm_format(), 24), 24);
        assert_eq!(pull_frames(CodecId::Msbc.pcm_format(), 240), 120);
    }

    #[test]
    fn test_oversized_callback_reads_in_pulls() {
        let profile = PlaybackProfile::for_codec(CodecId::Cvsd);
        let (mut writer, mut reader) = ElasticBuffer::with_profile(&profile).into_split();
        writer.write(&[7; 48]);

        // A callback twice the buffer's capacity still drains what is queued
        let mut block = vec![0u8; profile.capacity() * 2];
        assert_eq!(read_pulls(&mut reader, &mut block, profile.pull_bytes), 48);
        assert_eq!(&block[..48], &[7; 48]);
        assert!(block[48..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reopen_restarts_device() {
        let device = MemoryOutputDevice::new();
        let mut sink = DevicePlaybackSink::new(device.clone());
        sink.open(CodecId::Cvsd).unwrap();
        sink.open(CodecId::Msbc).unwrap();
        assert_eq!(device.starts(), 2);
        assert_eq!(device.format().unwrap().sample_rate, 16000);
    }
}
