//! Session configuration
//!
//! Everything that was a build-time switch in older SCO test tools is a
//! runtime value here. Configuration is plain serde data and can be loaded
//! from TOML:
//!
//! ```toml
//! mode = "counter"
//! payload_len = 24
//! report_period = 100
//!
//! [playback]
//! backend = "none"
//!
//! [capture]
//! wav_path = "sco_input.wav"
//! duration_secs = 15
//! ```

use crate::error::{BridgeError, Result};
use crate::pattern::PatternMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default link payload length in bytes
pub const DEFAULT_PAYLOAD_LEN: usize = 24;

/// Default number of sent frames between send reports
pub const DEFAULT_REPORT_PERIOD: u32 = 100;

/// Default receive window size in payload bytes
pub const DEFAULT_RECEIVE_WINDOW_BYTES: u64 = 100_000;

/// Default WAV capture length in seconds
pub const DEFAULT_CAPTURE_SECS: u32 = 15;

/// Top-level session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Test pattern to send and verify
    pub mode: PatternMode,
    /// Link payload length in bytes
    pub payload_len: usize,
    /// Sent frames between send reports
    pub report_period: u32,
    /// Received payload bytes per integrity summary
    pub receive_window_bytes: u64,
    /// Highlight mismatches in hexdumps with ANSI colour
    pub colored_dumps: bool,
    /// Live playback settings
    pub playback: PlaybackConfig,
    /// File capture settings
    pub capture: CaptureConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: PatternMode::Sine,
            payload_len: DEFAULT_PAYLOAD_LEN,
            report_period: DEFAULT_REPORT_PERIOD,
            receive_window_bytes: DEFAULT_RECEIVE_WINDOW_BYTES,
            colored_dumps: true,
            playback: PlaybackConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given pattern mode
    pub fn new(mode: PatternMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set the send report period
    pub fn with_report_period(mut self, period: u32) -> Self {
        self.report_period = period;
        self
    }

    /// Set the link payload length
    pub fn with_payload_len(mut self, len: usize) -> Self {
        self.payload_len = len;
        self
    }

    /// Capture decoded audio to a WAV file
    pub fn with_wav_capture(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture.wav_path = Some(path.into());
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.payload_len == 0 || self.payload_len > usize::from(u8::MAX) {
            return Err(BridgeError::config(format!(
                "payload_len must be 1..=255, got {}",
                self.payload_len
            )));
        }
        if self.report_period == 0 {
            return Err(BridgeError::config("report_period must be greater than 0"));
        }
        if self.receive_window_bytes == 0 {
            return Err(BridgeError::config(
                "receive_window_bytes must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Playback backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackBackend {
    /// No live playback
    #[default]
    None,
    /// Default system output device
    Device,
}

/// Live playback settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Where decoded audio is played
    pub backend: PlaybackBackend,
}

/// File capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// WAV file receiving decoded audio
    pub wav_path: Option<PathBuf>,
    /// Length of the capture window in seconds
    pub duration_secs: u32,
    /// Raw file receiving outgoing coder bytes
    pub encoded_out_path: Option<PathBuf>,
    /// Raw file receiving incoming coder bytes
    pub encoded_in_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            wav_path: None,
            duration_secs: DEFAULT_CAPTURE_SECS,
            encoded_out_path: None,
            encoded_in_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.mode, PatternMode::Sine);
        assert_eq!(config.payload_len, 24);
        assert_eq!(config.report_period, 100);
        assert_eq!(config.receive_window_bytes, 100_000);
        assert_eq!(config.capture.duration_secs, 15);
        assert_eq!(config.playback.backend, PlaybackBackend::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            mode = "fill55"
            report_period = 50

            [playback]
            backend = "device"

            [capture]
            wav_path = "out.wav"
            duration_secs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, PatternMode::Fill55);
        assert_eq!(config.report_period, 50);
        assert_eq!(config.payload_len, 24);
        assert_eq!(config.playback.backend, PlaybackBackend::Device);
        assert_eq!(config.capture.wav_path, Some(PathBuf::from("out.wav")));
        assert_eq!(config.capture.duration_secs, 3);
    }

    #[test]
    fn test_validation_errors() {
        let err = SessionConfig::from_toml_str("payload_len = 0").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = SessionConfig::from_toml_str("payload_len = 300").unwrap_err();
        assert!(err.to_string().contains("1..=255"));

        assert!(SessionConfig::from_toml_str("report_period = 0").is_err());
        assert!(SessionConfig::from_toml_str("mode = \"square\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "mode = \"ascii\"\ncolored_dumps = false\n").unwrap();

        let config = SessionConfig::from_file(&path).unwrap();
        assert_eq!(config.mode, PatternMode::Ascii);
        assert!(!config.colored_dumps);

        assert!(SessionConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
