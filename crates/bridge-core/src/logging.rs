//! Logging setup
//!
//! Per-frame detail is logged at `debug`, periodic reports and session
//! summaries at `info`, underruns and disabled sinks at `warn`.
//! `RUST_LOG` directives are layered on top of the configured level.

use crate::error::{BridgeError, Result};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to emit ANSI colour codes
    pub ansi: bool,
    /// Application name to include in the welcome line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            file_info: false,
            ansi: true,
            app_name: "scobridge".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Disable ANSI colour codes
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }
}

/// Set up the global subscriber with the provided configuration
///
/// # Errors
///
/// Returns a configuration error if a global subscriber is already set.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_target(false)
        .try_init()
        .map_err(|e| BridgeError::config(format!("Failed to install logger: {}", e)))?;

    log_welcome(&config.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| BridgeError::config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_config_builders() {
        let config = LoggingConfig::new(Level::TRACE, "probe")
            .with_file_info()
            .without_ansi();
        assert_eq!(config.level, Level::TRACE);
        assert!(config.file_info);
        assert!(!config.ansi);
        assert_eq!(config.app_name, "probe");
    }
}
