//! Selector rule store - rule rows of one selector and their per-family view

use crate::store::db_err;
use forgescan_core::{Result, RuleType, SelectorId, SelectorRule};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Rules of one selector that concern a single family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyRules {
    /// FAMILY rule with include polarity
    pub include: bool,
    /// FAMILY rule with exclude polarity
    pub exclude: bool,
    pub nvt_includes: BTreeSet<String>,
    pub nvt_excludes: BTreeSet<String>,
}

/// In-memory view of a selector, grouped by family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    constraining: bool,
    families: BTreeMap<String, FamilyRules>,
    rule_count: usize,
}

impl RuleSet {
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a SelectorRule>) -> Self {
        let mut set = Self::default();
        for rule in rules {
            set.rule_count += 1;
            match rule.rule_type {
                RuleType::All => set.constraining |= !rule.exclude,
                RuleType::Family => {
                    let entry = set.families.entry(rule.family_or_nvt.clone()).or_default();
                    if rule.exclude {
                        entry.exclude = true;
                    } else {
                        entry.include = true;
                    }
                }
                RuleType::Nvt => {
                    let Some(family) = rule.family.as_ref() else {
                        warn!("Ignoring NVT rule without family: {}", rule.family_or_nvt);
                        continue;
                    };
                    let entry = set.families.entry(family.clone()).or_default();
                    if rule.exclude {
                        entry.nvt_excludes.insert(rule.family_or_nvt.clone());
                    } else {
                        entry.nvt_includes.insert(rule.family_or_nvt.clone());
                    }
                }
            }
        }
        set
    }

    /// Load and group the rules of a selector
    pub fn load(conn: &Connection, selector: SelectorId) -> Result<Self> {
        Ok(Self::from_rules(&load_rules(conn, selector)?))
    }

    /// Selection starts from the whole catalog (an ALL rule is present)
    pub fn is_constraining(&self) -> bool {
        self.constraining
    }

    /// The selector consists of the ALL rule and nothing else
    pub fn is_all_only(&self) -> bool {
        self.constraining && self.rule_count == 1
    }

    pub fn family(&self, family: &str) -> Option<&FamilyRules> {
        self.families.get(family)
    }

    /// Families mentioned by at least one rule
    pub fn families(&self) -> impl Iterator<Item = (&str, &FamilyRules)> {
        self.families.iter().map(|(name, rules)| (name.as_str(), rules))
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }
}

/// Layout of one family's rules, independent of the selector mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyLayout {
    /// Track the catalog, minus these OIDs
    Growing { excludes: BTreeSet<String> },
    /// Exactly these OIDs
    Static { includes: BTreeSet<String> },
}

impl FamilyLayout {
    /// Rule rows expressing this layout under the given selector mode
    pub fn rules(&self, family: &str, constraining: bool) -> Vec<SelectorRule> {
        let mut rules = Vec::new();
        match self {
            FamilyLayout::Growing { excludes } => {
                if !constraining {
                    rules.push(SelectorRule::family(family, false));
                }
                rules.extend(excludes.iter().map(|oid| SelectorRule::nvt(oid, family, true)));
            }
            FamilyLayout::Static { includes } => {
                if constraining {
                    rules.push(SelectorRule::family(family, true));
                }
                rules.extend(includes.iter().map(|oid| SelectorRule::nvt(oid, family, false)));
            }
        }
        rules
    }
}

/// Read every rule of a selector
pub fn load_rules(conn: &Connection, selector: SelectorId) -> Result<Vec<SelectorRule>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT rule_type, exclude, family_or_nvt, family
            FROM selector_rules WHERE selector_id = ?1
            ORDER BY rule_type, family, family_or_nvt
            "#,
        )
        .map_err(db_err("Failed to prepare rule query"))?;
    let rows = stmt
        .query_map([selector.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .map_err(db_err("Failed to query selector rules"))?;

    let mut rules = Vec::new();
    for row in rows {
        let (code, exclude, family_or_nvt, family) =
            row.map_err(db_err("Failed to read selector rule"))?;
        rules.push(SelectorRule {
            rule_type: RuleType::from_code(code)?,
            exclude,
            family_or_nvt,
            family,
        });
    }
    Ok(rules)
}

/// Insert a rule, replacing any rule with the same type and target
pub fn insert_rule(conn: &Connection, selector: SelectorId, rule: &SelectorRule) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO selector_rules (selector_id, rule_type, exclude, family_or_nvt, family)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            selector.0,
            rule.rule_type.code(),
            rule.exclude,
            rule.family_or_nvt,
            rule.family,
        ],
    )
    .map_err(db_err("Failed to insert selector rule"))?;
    Ok(())
}

pub fn insert_rules<'a>(
    conn: &Connection,
    selector: SelectorId,
    rules: impl IntoIterator<Item = &'a SelectorRule>,
) -> Result<usize> {
    let mut inserted = 0;
    for rule in rules {
        insert_rule(conn, selector, rule)?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Remove the ALL rule
pub fn delete_all_rule(conn: &Connection, selector: SelectorId) -> Result<()> {
    conn.execute(
        "DELETE FROM selector_rules WHERE selector_id = ?1 AND rule_type = ?2",
        params![selector.0, RuleType::All.code()],
    )
    .map_err(db_err("Failed to delete ALL rule"))?;
    Ok(())
}

/// Remove the FAMILY rule of a family, whatever its polarity
pub fn delete_family_rule(conn: &Connection, selector: SelectorId, family: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM selector_rules WHERE selector_id = ?1 AND rule_type = ?2 AND family_or_nvt = ?3",
        params![selector.0, RuleType::Family.code(), family],
    )
    .map_err(db_err("Failed to delete family rule"))?;
    Ok(())
}

/// Remove every FAMILY and NVT rule of a family
pub fn delete_family_rules(conn: &Connection, selector: SelectorId, family: &str) -> Result<usize> {
    conn.execute(
        r#"
        DELETE FROM selector_rules
        WHERE selector_id = ?1
          AND ((rule_type = ?2 AND family_or_nvt = ?3) OR (rule_type = ?4 AND family = ?3))
        "#,
        params![selector.0, RuleType::Family.code(), family, RuleType::Nvt.code()],
    )
    .map_err(db_err("Failed to delete family rules"))
}

/// Replace everything a selector says about one family
pub fn write_family_layout(
    conn: &Connection,
    selector: SelectorId,
    family: &str,
    constraining: bool,
    layout: &FamilyLayout,
) -> Result<()> {
    let removed = delete_family_rules(conn, selector, family)?;
    let rules = layout.rules(family, constraining);
    insert_rules(conn, selector, &rules)?;
    debug!(
        "Rewrote family '{}' of selector {}: removed {} rules, wrote {}",
        family,
        selector,
        removed,
        rules.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{insert_selector, Store};

    fn oids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rule_set_grouping() {
        let rules = vec![
            SelectorRule::all(),
            SelectorRule::family("A", true),
            SelectorRule::nvt("n1", "A", false),
            SelectorRule::nvt("n4", "B", true),
        ];
        let set = RuleSet::from_rules(&rules);

        assert!(set.is_constraining());
        assert!(!set.is_all_only());
        assert_eq!(set.rule_count(), 4);

        let a = set.family("A").unwrap();
        assert!(a.exclude && !a.include);
        assert_eq!(a.nvt_includes, oids(&["n1"]));
        assert_eq!(set.family("B").unwrap().nvt_excludes, oids(&["n4"]));
        assert!(set.family("C").is_none());
    }

    #[test]
    fn test_all_only() {
        let set = RuleSet::from_rules(&[SelectorRule::all()]);
        assert!(set.is_all_only());
        assert!(!RuleSet::default().is_constraining());
    }

    #[test]
    fn test_layout_rules_per_mode() {
        let growing = FamilyLayout::Growing {
            excludes: oids(&["n2"]),
        };
        assert_eq!(growing.rules("A", true), vec![SelectorRule::nvt("n2", "A", true)]);
        assert_eq!(
            growing.rules("A", false),
            vec![SelectorRule::family("A", false), SelectorRule::nvt("n2", "A", true)]
        );

        let fixed = FamilyLayout::Static {
            includes: BTreeSet::new(),
        };
        assert_eq!(fixed.rules("A", true), vec![SelectorRule::family("A", true)]);
        assert!(fixed.rules("A", false).is_empty());
    }

    #[test]
    fn test_rule_rows_round_trip_through_store() {
        let store = Store::in_memory().unwrap();
        let loaded = store
            .exclusive(|tx| {
                let selector = insert_selector(tx, "test")?;
                insert_rules(
                    tx,
                    selector,
                    &[
                        SelectorRule::all(),
                        SelectorRule::family("A", true),
                        SelectorRule::nvt("n1", "A", false),
                        SelectorRule::nvt("n4", "B", true),
                    ],
                )?;
                // Same type and target replaces the earlier row
                insert_rule(tx, selector, &SelectorRule::family("A", false))?;
                write_family_layout(
                    tx,
                    selector,
                    "B",
                    true,
                    &FamilyLayout::Static {
                        includes: oids(&["n5"]),
                    },
                )?;
                RuleSet::load(tx, selector)
            })
            .unwrap();

        let a = loaded.family("A").unwrap();
        assert!(a.include && !a.exclude);
        let b = loaded.family("B").unwrap();
        assert!(b.exclude);
        assert!(b.nvt_excludes.is_empty());
        assert_eq!(b.nvt_includes, oids(&["n5"]));
        assert_eq!(loaded.rule_count(), 5);
    }
}
