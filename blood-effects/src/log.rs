//! Logging Infrastructure
//!
//! The runtime emits `tracing` events (handler install and dispatch at trace,
//! request lifecycle at debug, uncaught exceptions and fatal errors at error).
//! This module installs a `tracing-subscriber` for them.
//!
//! # Environment
//!
//! `BLOOD_EFFECTS_LOG` takes an `EnvFilter` directive (for example
//! `blood_effects=debug`) and overrides the configured level.
//!
//! # Example
//!
//! ```rust,ignore
//! use blood_effects::log::{self, LogConfig, LogFormat, LogLevel};
//!
//! log::init(&LogConfig {
//!     level: LogLevel::Debug,
//!     format: LogFormat::Json,
//!     ..LogConfig::default()
//! });
//! ```

use std::io;

use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "BLOOD_EFFECTS_LOG";

/// Log level for runtime logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// No logging.
    Off,
    /// Error messages only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Debug messages.
    Debug,
    /// Trace-level messages.
    Trace,
}

impl LogLevel {
    /// Parse a log level from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to a string representation, usable as a filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse a format name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" | "pretty" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level.
    /// Default: Info.
    pub level: LogLevel,

    /// Output format.
    /// Default: Plain.
    pub format: LogFormat,

    /// Include source location in log output.
    /// Default: false (only in debug builds).
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Plain,
            source_location: cfg!(debug_assertions),
        }
    }
}

/// Filter for `config`, letting [`LOG_ENV`] override the level.
pub fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Install the global subscriber, writing to stderr.
///
/// Returns `false` if a global subscriber was already set.
pub fn init(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_writer(io::stderr)
        .with_file(config.source_location)
        .with_line_number(config.source_location);
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Plain => builder.try_init().is_ok(),
    };
    if installed {
        tracing::debug!(level = config.level.as_str(), format = ?config.format, "logging initialized");
    }
    installed
}
