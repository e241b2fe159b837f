//! Runtime Configuration
//!
//! Configuration for the reactor, logging and shutdown diagnostics. It can be
//! set programmatically or loaded from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `BLOOD_EFFECTS_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BLOOD_EFFECTS_POLL_TIMEOUT_MS` | Longest single reactor poll in milliseconds | 100 |
//! | `BLOOD_EFFECTS_MAX_PENDING` | Maximum requests in flight | 1024 |
//! | `BLOOD_EFFECTS_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `BLOOD_EFFECTS_LOG_FORMAT` | Log format (plain/json) | plain |
//! | `BLOOD_EFFECTS_CHECK_LEAKS` | Leak check at shutdown ("true"/"false") | true |
//! | `BLOOD_EFFECTS_PRINT_STATS` | Print runtime statistics at shutdown | false |
//!
//! # Example
//!
//! ```rust,ignore
//! use blood_effects::config::RuntimeConfig;
//!
//! // Load from environment with defaults
//! let config = RuntimeConfig::from_env();
//!
//! // Or use the builder pattern
//! let config = RuntimeConfig::builder()
//!     .max_pending(64)
//!     .print_stats(true)
//!     .build()?;
//! ```

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::log::{LogConfig, LogFormat, LogLevel};
use crate::reactor::ReactorConfig;

/// Shutdown diagnostics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Verify at shutdown that no frame, resumption, request or handle leaked.
    /// Default: true.
    pub check_leaks: bool,

    /// Print runtime statistics to stderr at shutdown.
    /// Default: false.
    pub print_stats: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            check_leaks: true,
            print_stats: false,
        }
    }
}

/// Complete runtime configuration.
///
/// Use `RuntimeConfig::default()` for sensible defaults, or
/// `RuntimeConfig::from_env()` to load from environment variables.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Event loop configuration.
    pub reactor: ReactorConfig,

    /// Logging configuration.
    pub log: LogConfig,

    /// Shutdown diagnostics.
    pub diagnostics: DiagnosticsConfig,
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables that are not set, or do not parse, keep their
    /// default values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_usize("BLOOD_EFFECTS_POLL_TIMEOUT_MS") {
            if val > 0 {
                config.reactor.poll_timeout = Duration::from_millis(val as u64);
            }
        }

        if let Some(val) = parse_env_usize("BLOOD_EFFECTS_MAX_PENDING") {
            if val > 0 {
                config.reactor.max_pending = val;
            }
        }

        if let Ok(val) = env::var("BLOOD_EFFECTS_LOG_LEVEL") {
            if let Some(level) = LogLevel::from_str(&val) {
                config.log.level = level;
            }
        }

        if let Ok(val) = env::var("BLOOD_EFFECTS_LOG_FORMAT") {
            if let Some(format) = LogFormat::from_str(&val) {
                config.log.format = format;
            }
        }

        if let Some(val) = parse_env_bool("BLOOD_EFFECTS_CHECK_LEAKS") {
            config.diagnostics.check_leaks = val;
        }

        if let Some(val) = parse_env_bool("BLOOD_EFFECTS_PRINT_STATS") {
            config.diagnostics.print_stats = val;
        }

        config
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reactor.poll_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reactor.poll_timeout".into(),
                message: "must be greater than zero".into(),
            });
        }

        if self.reactor.max_pending == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reactor.max_pending".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the longest single reactor poll.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.reactor.poll_timeout = timeout;
        self
    }

    /// Set the maximum number of requests in flight.
    pub fn max_pending(mut self, n: usize) -> Self {
        self.config.reactor.max_pending = n;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Enable or disable the shutdown leak check.
    pub fn check_leaks(mut self, enabled: bool) -> Self {
        self.config.diagnostics.check_leaks = enabled;
        self
    }

    /// Enable or disable printing statistics at shutdown.
    pub fn print_stats(mut self, enabled: bool) -> Self {
        self.config.diagnostics.print_stats = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> RuntimeConfig {
        self.config
    }
}

/// Parse an environment variable as usize.
fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    })
}
