//! Logging configuration using tracing

use crate::config::LoggingConfig;
use forgescan_core::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for operators at a terminal)
    #[default]
    Pretty,
    /// JSON format (for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::InvalidConfig {
                key: String::from("logging.format"),
                message: format!("unknown format '{}'", other),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level, overridden by RUST_LOG when set
    pub level: String,
    pub format: LogFormat,
    /// Include file/line information
    pub with_file: bool,
    /// Include target (module path)
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::Pretty,
            with_file: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[logging]` section of the config file
    pub fn from_settings(settings: &LoggingConfig) -> Result<Self> {
        Ok(Self::new()
            .level(settings.level.clone())
            .format(settings.format.parse()?))
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }
}

/// Initialize the global tracing subscriber with default settings
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the global tracing subscriber with custom configuration
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(config.with_target);

    let installed = match config.format {
        LogFormat::Json => registry.with(base.json()).try_init(),
        LogFormat::Compact => registry.with(base.compact()).try_init(),
        LogFormat::Pretty => registry.with(base.pretty()).try_init(),
    };

    installed.map_err(|e| Error::Configuration(format!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new()
            .level("debug")
            .format(LogFormat::Json)
            .with_file();

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.with_file);
    }

    #[test]
    fn test_log_config_from_settings() {
        let settings = LoggingConfig {
            level: String::from("trace"),
            format: String::from("Compact"),
        };
        let config = LogConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, "trace");
        assert_eq!(config.format, LogFormat::Compact);

        let bad = LoggingConfig {
            level: String::from("info"),
            format: String::from("syslog"),
        };
        assert!(LogConfig::from_settings(&bad).is_err());
    }
}
