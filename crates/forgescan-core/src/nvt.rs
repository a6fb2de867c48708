//! NVT catalog entries

use serde::{Deserialize, Serialize};

/// One vulnerability test as published in the feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NvtInfo {
    /// Stable object identifier (e.g., "1.3.6.1.4.1.25623.1.0.10330")
    pub oid: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Family this NVT belongs to
    #[serde(default)]
    pub family: String,
}

impl NvtInfo {
    /// Create a new catalog entry
    pub fn new(oid: impl Into<String>, name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            family: family.into(),
        }
    }
}

impl std::fmt::Display for NvtInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) [{}]", self.oid, self.name, self.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nvt_from_yaml_without_name() {
        let nvt: NvtInfo = serde_yaml::from_str("oid: \"1.2.3\"\nfamily: \"Web Servers\"\n").unwrap();
        assert_eq!(nvt.oid, "1.2.3");
        assert_eq!(nvt.family, "Web Servers");
        assert!(nvt.name.is_empty());
    }
}
