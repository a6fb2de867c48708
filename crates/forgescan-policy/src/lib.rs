//! ForgeScan Policy - scan configuration NVT selection engine
//!
//! A scan config owns a selector: a set of ALL, FAMILY and NVT rules that,
//! evaluated against the NVT catalog, yields the plugins a scan runs.
//!
//! ## Modes
//!
//! - **Constraining**: an ALL rule selects the whole catalog and excludes
//!   narrow it. New families are picked up automatically.
//! - **Generating**: nothing is selected until includes add families or NVTs.
//!
//! Within either mode a family is *growing* (tracks new NVTs of the feed) or
//! *static* (an explicit OID list). The engine keeps four cached counts on
//! every config in line with its rules.
//!
//! ## Example
//!
//! ```no_run
//! use forgescan_policy::{PolicyEngine, Store};
//!
//! # fn main() -> forgescan_core::Result<()> {
//! let engine = PolicyEngine::new(Store::open("/var/lib/forgescan/policy.db", 5000)?)?;
//! let config = engine.create_config("Full and fast", "", true)?;
//! engine.set_nvt_selection(config.id, "Port scanners", &[String::from("1.3.6.1.4.1.25623.1.0.100315")])?;
//! println!("{:?}", engine.config(config.id)?.counts);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod counts;
pub mod engine;
pub mod import;
pub mod mutation;
pub mod rules;
pub mod selection;
pub mod store;
pub mod switch;

pub use catalog::{load_feed_file, parse_feed, NvtCatalog};
pub use engine::{import_rules_file, PolicyEngine};
pub use import::{ImportRule, RuleDocument};
pub use mutation::FamilySelection;
pub use rules::{FamilyLayout, RuleSet};
pub use selection::{FamilyCase, FamilyState};
pub use store::Store;
