//! Selector rules, scan configs and their cached selection counts

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Stable handle of a selector row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SelectorId(pub i64);

/// Stable handle of a scan config row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigId(pub i64);

/// Stable handle of a task row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for SelectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of selector rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Matches the whole catalog
    All,
    /// Matches one family
    Family,
    /// Matches one NVT
    Nvt,
}

impl RuleType {
    /// Integer code stored in the rule table
    pub fn code(&self) -> i64 {
        match self {
            RuleType::All => 0,
            RuleType::Family => 1,
            RuleType::Nvt => 2,
        }
    }

    /// Decode the stored integer code
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(RuleType::All),
            1 => Ok(RuleType::Family),
            2 => Ok(RuleType::Nvt),
            other => Err(Error::Database(format!("Unknown selector rule type code: {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::All => "all",
            RuleType::Family => "family",
            RuleType::Nvt => "nvt",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RuleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "0" => Ok(RuleType::All),
            "family" | "1" => Ok(RuleType::Family),
            "nvt" | "2" => Ok(RuleType::Nvt),
            other => Err(Error::Parse(format!("Unknown selector rule type: {}", other))),
        }
    }
}

/// One row of a selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorRule {
    pub rule_type: RuleType,

    /// Exclude polarity (include when false)
    pub exclude: bool,

    /// Family name for FAMILY rules, OID for NVT rules, empty for ALL
    pub family_or_nvt: String,

    /// Owning family for FAMILY and NVT rules
    pub family: Option<String>,
}

impl SelectorRule {
    /// The rule that makes a selector constraining
    pub fn all() -> Self {
        Self {
            rule_type: RuleType::All,
            exclude: false,
            family_or_nvt: String::new(),
            family: None,
        }
    }

    pub fn family(family: impl Into<String>, exclude: bool) -> Self {
        let family = family.into();
        Self {
            rule_type: RuleType::Family,
            exclude,
            family_or_nvt: family.clone(),
            family: Some(family),
        }
    }

    pub fn nvt(oid: impl Into<String>, family: impl Into<String>, exclude: bool) -> Self {
        Self {
            rule_type: RuleType::Nvt,
            exclude,
            family_or_nvt: oid.into(),
            family: Some(family.into()),
        }
    }

    /// Family the rule applies to, if any
    pub fn owning_family(&self) -> Option<&str> {
        match self.rule_type {
            RuleType::All => None,
            RuleType::Family => Some(self.family_or_nvt.as_str()),
            RuleType::Nvt => self.family.as_deref(),
        }
    }
}

impl std::fmt::Display for SelectorRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let polarity = if self.exclude { "-" } else { "+" };
        match self.rule_type {
            RuleType::All => write!(f, "{}all", polarity),
            RuleType::Family => write!(f, "{}family:{}", polarity, self.family_or_nvt),
            RuleType::Nvt => write!(
                f,
                "{}nvt:{} [{}]",
                polarity,
                self.family_or_nvt,
                self.family.as_deref().unwrap_or("?")
            ),
        }
    }
}

/// Cached summary of a selection, stored on the config row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCounts {
    /// Number of families with a non-empty or growing selection
    pub family_count: u32,
    /// Number of selected NVTs
    pub nvt_count: u32,
    /// New catalog families are selected automatically
    pub families_growing: bool,
    /// At least one family tracks new catalog NVTs
    pub nvts_growing: bool,
}

/// A scan configuration row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub id: ConfigId,
    pub uuid: String,
    pub name: String,
    pub comment: String,
    pub selector_id: SelectorId,
    pub counts: SelectionCounts,
    /// Last modification time (unix seconds)
    pub modified_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_type_codes() {
        for rule_type in [RuleType::All, RuleType::Family, RuleType::Nvt] {
            assert_eq!(RuleType::from_code(rule_type.code()).unwrap(), rule_type);
        }
        assert!(RuleType::from_code(9).is_err());
    }

    #[test]
    fn test_rule_type_from_str() {
        assert_eq!("FAMILY".parse::<RuleType>().unwrap(), RuleType::Family);
        assert_eq!(" nvt ".parse::<RuleType>().unwrap(), RuleType::Nvt);
        assert!("plugin".parse::<RuleType>().is_err());
    }

    #[test]
    fn test_owning_family() {
        assert_eq!(SelectorRule::all().owning_family(), None);
        assert_eq!(SelectorRule::family("Web Servers", true).owning_family(), Some("Web Servers"));
        assert_eq!(SelectorRule::nvt("1.2.3", "Databases", false).owning_family(), Some("Databases"));
        assert_eq!(SelectorRule::nvt("1.2.3", "Databases", true).to_string(), "-nvt:1.2.3 [Databases]");
    }
}
