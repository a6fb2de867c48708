//! ForgeScan Common - Shared utilities: configuration and logging
//!
//! This crate provides common functionality used across all ForgeScan crates.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigBuilder, DatabaseConfig};
pub use logging::{init_logging, LogConfig, LogFormat};
