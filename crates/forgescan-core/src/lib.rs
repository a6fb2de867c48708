//! ForgeScan Core - Foundation types and error handling
//!
//! This crate provides the core abstractions shared by the policy engine:
//! - `NvtInfo`: one vulnerability test from the feed catalog
//! - `SelectorRule`, `RuleType`: the rows that make up an NVT selection
//! - `ScanConfig`, `SelectionCounts`: a scan config and its cached summary
//! - `Error`, `Result`: the error type used across the workspace

pub mod error;
pub mod nvt;
pub mod selector;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use nvt::NvtInfo;
pub use selector::{
    ConfigId, RuleType, ScanConfig, SelectionCounts, SelectorId, SelectorRule, TaskId,
};
