//! Playback sinks
//!
//! Decoded audio leaves a session through [`PlaybackSink`]s. A sink is
//! opened when a codec is negotiated, receives every decoded frame until the
//! capture target is reached and is closed with the session. A sink that
//! fails is dropped by the session; the frame pump carries on without it.

use crate::error::{BridgeError, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use scobridge_codec_core::{CodecId, Pcm};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Destination for decoded PCM
pub trait PlaybackSink: Send {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Prepare for audio in the negotiated codec's PCM format
    fn open(&mut self, codec: CodecId) -> Result<()>;

    /// Consume one block of decoded PCM
    fn write(&mut self, pcm: Pcm<'_>) -> Result<()>;

    /// Flush and release resources; further writes fail until reopened
    fn close(&mut self) -> Result<()>;
}

/// Mono WAV capture via `hound`
///
/// CVSD audio is stored as 8-bit, wideband audio as 16-bit.
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    samples_written: u64,
}

impl WavFileSink {
    /// Create a sink that will write to `path` once opened
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            samples_written: 0,
        }
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples written since the last open
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl PlaybackSink for WavFileSink {
    fn name(&self) -> &str {
        "wav"
    }

    fn open(&mut self, codec: CodecId) -> Result<()> {
        self.close()?;

        let format = codec.pcm_format();
        let spec = WavSpec {
            channels: 1,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample(),
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.path, spec)
            .map_err(|e| BridgeError::sink_open(self.name(), e))?;

        info!(
            "Capturing {} Hz {}-bit audio to {}",
            spec.sample_rate,
            spec.bits_per_sample,
            self.path.display()
        );
        self.writer = Some(writer);
        self.samples_written = 0;
        Ok(())
    }

    fn write(&mut self, pcm: Pcm<'_>) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BridgeError::sink_write("wav", "sink is not open"))?;

        match pcm {
            Pcm::I8(samples) => {
                for &s in samples {
                    writer.write_sample(s)?;
                }
            }
            Pcm::I16(samples) => {
                for &s in samples {
                    writer.write_sample(s)?;
                }
            }
        }
        self.samples_written += pcm.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            debug!(
                "Closed {} after {} samples",
                self.path.display(),
                self.samples_written
            );
        }
        Ok(())
    }
}

/// Raw file of coder bytes, written as they cross the link
pub struct EncodedCapture {
    path: PathBuf,
    file: BufWriter<File>,
    bytes_written: u64,
}

impl EncodedCapture {
    /// Create or truncate `path`
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)
            .map_err(|e| BridgeError::sink_open(format!("encoded capture {}", path.display()), e))?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Append coder bytes
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush buffered bytes to disk
    pub fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        debug!(
            "Encoded capture {} holds {} bytes",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
