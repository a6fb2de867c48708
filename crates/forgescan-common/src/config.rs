//! Configuration management for ForgeScan components

use crate::logging::LogFormat;
use forgescan_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Policy database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// NVT feed catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Scan config defaults
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (FORGESCAN_ prefix)
    pub fn merge_env(mut self) -> Self {
        // Database settings
        if let Ok(val) = std::env::var("FORGESCAN_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Ok(val) = std::env::var("FORGESCAN_DATABASE_BUSY_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.database.busy_timeout_ms = n;
            }
        }

        // Catalog settings
        if let Ok(val) = std::env::var("FORGESCAN_FEED_PATH") {
            self.catalog.feed_path = Some(val);
        }

        // Logging
        if let Ok(val) = std::env::var("FORGESCAN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("FORGESCAN_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(Error::InvalidConfig {
                key: String::from("database.path"),
                message: String::from("must not be empty"),
            });
        }
        self.logging.format.parse::<LogFormat>().map(|_| ())
    }
}

/// Policy database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding NVTs, selectors and configs
    #[serde(default = "default_database_path")]
    pub path: String,

    /// How long a writer waits for the exclusive lock, in milliseconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

fn default_database_path() -> String {
    String::from("/var/lib/forgescan/policy.db")
}

fn default_busy_timeout() -> u32 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// NVT feed catalog configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// YAML/JSON feed export loaded by `forgescan-policyctl feed`
    pub feed_path: Option<String>,
}

/// Defaults for newly created scan configs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// New configs start from the whole catalog (constraining) instead of nothing
    #[serde(default = "default_true")]
    pub default_families_growing: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_families_growing: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn database_path(mut self, path: impl Into<String>) -> Self {
        self.config.database.path = path.into();
        self
    }

    pub fn busy_timeout_ms(mut self, timeout: u32) -> Self {
        self.config.database.busy_timeout_ms = timeout;
        self
    }

    pub fn feed_path(mut self, path: impl Into<String>) -> Self {
        self.config.catalog.feed_path = Some(path.into());
        self
    }

    pub fn default_families_growing(mut self, growing: bool) -> Self {
        self.config.policy.default_families_growing = growing;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [database]
            path = "/tmp/policy.db"
            busy_timeout_ms = 250

            [catalog]
            feed_path = "/var/lib/forgescan/feed.yaml"

            [policy]
            default_families_growing = false

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.database.path, "/tmp/policy.db");
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(
            config.catalog.feed_path.as_deref(),
            Some("/var/lib/forgescan/feed.yaml")
        );
        assert!(!config.policy.default_families_growing);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.database.path, "/var/lib/forgescan/policy.db");
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert!(config.policy.default_families_growing);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .database_path(":memory:")
            .default_families_growing(false)
            .log_level("warn")
            .build();

        assert_eq!(config.database.path, ":memory:");
        assert!(!config.policy.default_families_growing);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_validate_rejects_unknown_log_format() {
        let mut config = Config::default();
        config.logging.format = String::from("xml");
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }
}
