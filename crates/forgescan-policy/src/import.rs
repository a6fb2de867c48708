//! Selector import - validate externally supplied rules before persisting

use crate::catalog::NvtCatalog;
use forgescan_core::{Error, Result, RuleType, SelectorRule};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// One rule as written in an import document
///
/// Every field is optional here so that missing values surface as
/// [`Error::MissingField`] with the rule index rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRule {
    #[serde(rename = "type", default)]
    pub rule_type: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub exclude: bool,
    #[serde(default)]
    pub family_or_nvt: Option<String>,
    /// Ignored for NVT rules; the catalog decides the family
    #[serde(default)]
    pub family: Option<String>,
}

impl ImportRule {
    pub fn new(rule_type: &str, family_or_nvt: &str, exclude: bool) -> Self {
        Self {
            rule_type: Some(rule_type.to_string()),
            exclude,
            family_or_nvt: Some(family_or_nvt.to_string()),
            family: None,
        }
    }
}

/// Accept `true`/`false` as well as `0`/`1`
fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(serde::de::Error::custom(format!(
            "exclude must be 0 or 1, got {}",
            other
        ))),
    }
}

/// An import document: a named selector and its rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub rules: Vec<ImportRule>,
}

/// Parse a YAML or JSON rule document
pub fn parse_rules(content: &str) -> Result<RuleDocument> {
    Ok(serde_yaml::from_str(content)?)
}

/// Read and parse a rule document from disk
pub fn load_rules_file(path: impl AsRef<Path>) -> Result<RuleDocument> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    let document = parse_rules(&content)?;
    debug!("Read {} rules from {}", document.rules.len(), path.display());
    Ok(document)
}

/// Validated rules ready to be written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub rules: Vec<SelectorRule>,
    /// NVT OIDs dropped because the catalog does not know them
    pub skipped: Vec<String>,
}

/// Validate every rule and resolve NVT families
///
/// Fails on the first malformed rule, so nothing gets persisted for a bad
/// document. Unknown NVT OIDs are skipped.
pub fn validate(rules: &[ImportRule], catalog: &NvtCatalog) -> Result<ImportOutcome> {
    let mut outcome = ImportOutcome::default();
    let mut seen: HashMap<(RuleType, String), bool> = HashMap::new();

    for (index, rule) in rules.iter().enumerate() {
        let raw_type = rule.rule_type.as_deref().ok_or(Error::MissingField {
            index,
            field: "type",
        })?;
        let rule_type: RuleType = raw_type.parse().map_err(|_| Error::InvalidRule {
            index,
            message: format!("unknown rule type '{}'", raw_type),
        })?;

        let resolved = match rule_type {
            RuleType::All => {
                if rule.exclude {
                    return Err(Error::InvalidRule {
                        index,
                        message: String::from("the ALL rule cannot exclude"),
                    });
                }
                SelectorRule::all()
            }
            RuleType::Family => {
                let family = target(rule, index)?;
                SelectorRule::family(family, rule.exclude)
            }
            RuleType::Nvt => {
                let oid = target(rule, index)?;
                match catalog.family_of(oid) {
                    Some(family) => SelectorRule::nvt(oid, family, rule.exclude),
                    None => {
                        warn!("Skipping import rule {}: unknown NVT {}", index, oid);
                        outcome.skipped.push(oid.to_string());
                        continue;
                    }
                }
            }
        };

        let key = (rule_type, resolved.family_or_nvt.clone());
        match seen.get(&key).copied() {
            Some(_) if rule_type == RuleType::All => {
                return Err(Error::InvalidRule {
                    index,
                    message: String::from("duplicate ALL rule"),
                });
            }
            Some(exclude) if exclude != resolved.exclude => {
                return Err(Error::InvalidRule {
                    index,
                    message: format!(
                        "conflicting {} rules for '{}'",
                        rule_type, resolved.family_or_nvt
                    ),
                });
            }
            Some(_) => continue,
            None => {
                seen.insert(key, resolved.exclude);
                outcome.rules.push(resolved);
            }
        }
    }

    Ok(outcome)
}

fn target(rule: &ImportRule, index: usize) -> Result<&str> {
    match rule.family_or_nvt.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::MissingField {
            index,
            field: "family_or_nvt",
        }),
    }
}
