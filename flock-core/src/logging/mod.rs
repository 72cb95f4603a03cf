//! Logging subsystem for flock-core
//!
//! This module provides a unified logging interface using the `tracing` crate.
//! It supports different log levels and can be configured for various output formats.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level for the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive for this level
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    /// Whether to include target module information
    pub with_target: bool,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: true,
            json_format: false,
        }
    }
}

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set.
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(config.with_target))
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))
    }
}
