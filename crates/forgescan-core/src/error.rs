//! Error types for the ForgeScan policy engine

use thiserror::Error;

/// Result type alias using ForgeScan Error
pub type Result<T> = std::result::Result<T, Error>;

/// ForgeScan error types
#[derive(Error, Debug)]
pub enum Error {
    // === Input Errors ===
    #[error("Invalid selector rule #{index}: {message}")]
    InvalidRule { index: usize, message: String },

    #[error("Selector rule #{index} is missing field: {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Parse error: {0}")]
    Parse(String),

    // === Referential Errors ===
    #[error("NVT not found in catalog: {oid}")]
    UnknownNvt { oid: String },

    #[error("NVT {oid} belongs to family {actual}, not {expected}")]
    NvtFamilyMismatch {
        oid: String,
        expected: String,
        actual: String,
    },

    #[error("Family not found in catalog: {family}")]
    UnknownFamily { family: String },

    #[error("Scan config not found: {config_id}")]
    ConfigNotFound { config_id: i64 },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: i64 },

    // === Conflict Errors ===
    #[error("Scan config {config_id} is in use by {tasks} task(s)")]
    ConfigInUse { config_id: i64, tasks: u32 },

    // === Consistency Errors ===
    #[error("Count cache mismatch for config {config_id}: expected {field}={expected}, recomputed {actual}")]
    CountMismatch {
        config_id: i64,
        field: &'static str,
        expected: i64,
        actual: i64,
    },

    // === Database Errors ===
    #[error("Database error: {0}")]
    Database(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller can fix this by changing the request
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRule { .. }
                | Error::MissingField { .. }
                | Error::InvalidSelection(_)
                | Error::Parse(_)
                | Error::UnknownNvt { .. }
                | Error::NvtFamilyMismatch { .. }
                | Error::UnknownFamily { .. }
                | Error::ConfigNotFound { .. }
                | Error::TaskNotFound { .. }
                | Error::ConfigInUse { .. }
        )
    }

    /// Whether this signals a broken invariant rather than a bad request
    pub fn is_consistency_failure(&self) -> bool {
        matches!(self, Error::CountMismatch { .. } | Error::Internal(_))
    }

    /// Get an error code for logging and CLI exit reporting
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRule { .. } => "INVALID_RULE",
            Error::MissingField { .. } => "MISSING_FIELD",
            Error::InvalidSelection(_) => "INVALID_SELECTION",
            Error::Parse(_) => "PARSE_ERROR",
            Error::UnknownNvt { .. } => "UNKNOWN_NVT",
            Error::NvtFamilyMismatch { .. } => "NVT_FAMILY_MISMATCH",
            Error::UnknownFamily { .. } => "UNKNOWN_FAMILY",
            Error::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            Error::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Error::ConfigInUse { .. } => "CONFIG_IN_USE",
            Error::CountMismatch { .. } => "COUNT_MISMATCH",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::InvalidConfig { .. } => "INVALID_CONFIG",
            Error::Io(_) => "IO_ERROR",
            Error::FileNotFound { .. } => "FILE_NOT_FOUND",
            Error::Json(_) => "JSON_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let in_use = Error::ConfigInUse {
            config_id: 7,
            tasks: 2,
        };
        assert!(in_use.is_user_error());
        assert!(!in_use.is_consistency_failure());
        assert_eq!(in_use.code(), "CONFIG_IN_USE");

        let mismatch = Error::CountMismatch {
            config_id: 7,
            field: "nvt_count",
            expected: 3,
            actual: 4,
        };
        assert!(mismatch.is_consistency_failure());
        assert!(!mismatch.is_user_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::NvtFamilyMismatch {
            oid: String::from("1.3.6.1.4.1.25623.1.0.10330"),
            expected: String::from("Web Servers"),
            actual: String::from("Service detection"),
        };
        assert_eq!(
            err.to_string(),
            "NVT 1.3.6.1.4.1.25623.1.0.10330 belongs to family Service detection, not Web Servers"
        );
    }
}
