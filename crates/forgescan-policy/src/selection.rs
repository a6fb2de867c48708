//! Selection query builder - which NVTs a selector picks from each family
//!
//! Every family of a selector falls into exactly one [`FamilyCase`]. Cases
//! 2/5 and 3/4 compute the same set operation; they stay separate variants so
//! callers and tests can tell which representation produced a membership.

use crate::catalog::NvtCatalog;
use crate::rules::{FamilyLayout, FamilyRules, RuleSet};
use serde::Serialize;
use std::collections::BTreeSet;

static NO_RULES: BTreeSet<String> = BTreeSet::new();

/// Structural case of one family within a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyCase<'a> {
    /// Constraining selector holding only the ALL rule: the whole family
    Everything,
    /// Constraining, family excluded: only the NVT includes
    ExcludedFamily { includes: &'a BTreeSet<String> },
    /// Constraining, family not excluded: the family minus NVT excludes
    ConstrainedFamily { excludes: &'a BTreeSet<String> },
    /// Generating, family included: the family minus NVT excludes
    IncludedFamily { excludes: &'a BTreeSet<String> },
    /// Generating, family not included: only the NVT includes
    UnselectedFamily { includes: &'a BTreeSet<String> },
}

impl<'a> FamilyCase<'a> {
    /// Classify a family of a selector
    pub fn classify(rules: &'a RuleSet, family: &str) -> Self {
        if rules.is_all_only() {
            return FamilyCase::Everything;
        }

        let family_rules: Option<&'a FamilyRules> = rules.family(family);
        let includes = family_rules.map_or(&NO_RULES, |r| &r.nvt_includes);
        let excludes = family_rules.map_or(&NO_RULES, |r| &r.nvt_excludes);

        if rules.is_constraining() {
            if family_rules.is_some_and(|r| r.exclude) {
                FamilyCase::ExcludedFamily { includes }
            } else {
                FamilyCase::ConstrainedFamily { excludes }
            }
        } else if family_rules.is_some_and(|r| r.include) {
            FamilyCase::IncludedFamily { excludes }
        } else {
            FamilyCase::UnselectedFamily { includes }
        }
    }

    /// Membership tracks the catalog
    pub fn is_growing(&self) -> bool {
        matches!(
            self,
            FamilyCase::Everything
                | FamilyCase::ConstrainedFamily { .. }
                | FamilyCase::IncludedFamily { .. }
        )
    }

    /// Explicit NVT list of a static family (empty for growing families)
    pub fn static_includes(&self) -> &'a BTreeSet<String> {
        match *self {
            FamilyCase::ExcludedFamily { includes } | FamilyCase::UnselectedFamily { includes } => {
                includes
            }
            _ => &NO_RULES,
        }
    }

    /// Current member OIDs of `family`
    pub fn members(&self, catalog: &NvtCatalog, family: &str) -> BTreeSet<String> {
        match self {
            FamilyCase::Everything => catalog.family_oids(family).clone(),
            FamilyCase::ConstrainedFamily { excludes } | FamilyCase::IncludedFamily { excludes } => {
                catalog.family_oids(family).difference(excludes).cloned().collect()
            }
            FamilyCase::ExcludedFamily { includes } | FamilyCase::UnselectedFamily { includes } => {
                (*includes).clone()
            }
        }
    }

    /// Number of members of `family`
    pub fn member_count(&self, catalog: &NvtCatalog, family: &str) -> usize {
        match self {
            FamilyCase::Everything => catalog.family_size(family),
            FamilyCase::ConstrainedFamily { excludes } | FamilyCase::IncludedFamily { excludes } => {
                catalog.family_oids(family).difference(excludes).count()
            }
            FamilyCase::ExcludedFamily { includes } | FamilyCase::UnselectedFamily { includes } => {
                includes.len()
            }
        }
    }

    /// Whether `oid` of `family` is selected
    pub fn contains(&self, catalog: &NvtCatalog, family: &str, oid: &str) -> bool {
        match self {
            FamilyCase::Everything => catalog.family_of(oid) == Some(family),
            FamilyCase::ConstrainedFamily { excludes } | FamilyCase::IncludedFamily { excludes } => {
                catalog.family_of(oid) == Some(family) && !excludes.contains(oid)
            }
            FamilyCase::ExcludedFamily { includes } | FamilyCase::UnselectedFamily { includes } => {
                includes.contains(oid)
            }
        }
    }

    /// Mode-independent layout that reproduces this family's membership
    pub fn layout(&self, catalog: &NvtCatalog, family: &str) -> FamilyLayout {
        if self.is_growing() {
            let members = self.members(catalog, family);
            FamilyLayout::Growing {
                excludes: catalog.family_oids(family).difference(&members).cloned().collect(),
            }
        } else {
            FamilyLayout::Static {
                includes: self.static_includes().clone(),
            }
        }
    }
}

/// Every family name the catalog or the selector's rules mention
pub fn mentioned_families(rules: &RuleSet, catalog: &NvtCatalog) -> BTreeSet<String> {
    catalog
        .families()
        .chain(rules.families().map(|(family, _)| family))
        .map(str::to_string)
        .collect()
}

/// Families that take part in a selection: every catalog family, plus
/// rule-only families holding a static NVT list
///
/// A growing family the catalog no longer has selects nothing and has
/// nothing to track, so it is left out.
pub fn family_universe(rules: &RuleSet, catalog: &NvtCatalog) -> BTreeSet<String> {
    let retired = rules.families().filter(|(family, _)| {
        !catalog.has_family(family) && !FamilyCase::classify(rules, family).is_growing()
    });
    catalog
        .families()
        .chain(retired.map(|(family, _)| family))
        .map(str::to_string)
        .collect()
}

/// Per-family summary shown when editing a config
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyState {
    pub family: String,
    pub growing: bool,
    /// Selected NVTs in the family
    pub selected: usize,
    /// NVTs the catalog currently has in the family
    pub total: usize,
}

/// Summaries for every family of the universe
pub fn family_states(rules: &RuleSet, catalog: &NvtCatalog) -> Vec<FamilyState> {
    family_universe(rules, catalog)
        .into_iter()
        .map(|family| {
            let case = FamilyCase::classify(rules, &family);
            FamilyState {
                growing: case.is_growing(),
                selected: case.member_count(catalog, &family),
                total: catalog.family_size(&family),
                family,
            }
        })
        .collect()
}

/// Whether a single OID is selected
pub fn is_selected(rules: &RuleSet, catalog: &NvtCatalog, oid: &str) -> bool {
    if let Some(family) = catalog.family_of(oid) {
        return FamilyCase::classify(rules, family).contains(catalog, family, oid);
    }
    // Unknown OIDs can only be selected through an explicit static include
    family_universe(rules, catalog).iter().any(|family| {
        FamilyCase::classify(rules, family)
            .static_includes()
            .contains(oid)
    })
}

/// Every selected OID, sorted; the plugin list handed to a scan
pub fn plugin_list(rules: &RuleSet, catalog: &NvtCatalog) -> Vec<String> {
    let mut oids = BTreeSet::new();
    for family in family_universe(rules, catalog) {
        oids.extend(FamilyCase::classify(rules, &family).members(catalog, &family));
    }
    oids.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgescan_core::{NvtInfo, RuleType, SelectorRule};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn catalog() -> NvtCatalog {
        NvtCatalog::from_nvts(vec![
            NvtInfo::new("n1", "", "A"),
            NvtInfo::new("n2", "", "A"),
            NvtInfo::new("n3", "", "A"),
            NvtInfo::new("n4", "", "B"),
            NvtInfo::new("n5", "", "B"),
        ])
    }

    fn oids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Decide each catalog NVT on its own, straight from the rule list
    fn reference_members(
        rules: &[SelectorRule],
        catalog: &NvtCatalog,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let constraining = rules.iter().any(|r| r.rule_type == RuleType::All);
        let family_rule = |family: &str, exclude: bool| {
            rules.iter().any(|r| {
                r.rule_type == RuleType::Family
                    && r.family_or_nvt == family
                    && r.exclude == exclude
            })
        };
        let nvt_rule = |oid: &str, exclude: bool| {
            rules.iter().any(|r| {
                r.rule_type == RuleType::Nvt && r.family_or_nvt == oid && r.exclude == exclude
            })
        };

        let mut result = BTreeMap::new();
        for family in catalog.families() {
            let growing = if constraining {
                !family_rule(family, true)
            } else {
                family_rule(family, false)
            };
            let members = catalog
                .family_oids(family)
                .iter()
                .filter(|oid| {
                    if growing {
                        !nvt_rule(oid, true)
                    } else {
                        nvt_rule(oid, false)
                    }
                })
                .cloned()
                .collect();
            result.insert(family.to_string(), members);
        }
        result
    }

    fn random_rules(rng: &mut StdRng, catalog: &NvtCatalog) -> Vec<SelectorRule> {
        let mut rules = Vec::new();
        if rng.random_bool(0.5) {
            rules.push(SelectorRule::all());
        }
        for family in catalog.families() {
            match rng.random_range(0..3) {
                0 => {}
                1 => rules.push(SelectorRule::family(family, false)),
                _ => rules.push(SelectorRule::family(family, true)),
            }
            for oid in catalog.family_oids(family) {
                match rng.random_range(0..4) {
                    0 => rules.push(SelectorRule::nvt(oid, family, false)),
                    1 => rules.push(SelectorRule::nvt(oid, family, true)),
                    _ => {}
                }
            }
        }
        rules
    }

    #[test]
    fn test_five_cases() {
        let catalog = catalog();

        let all_only = RuleSet::from_rules(&[SelectorRule::all()]);
        let case = FamilyCase::classify(&all_only, "A");
        assert_eq!(case, FamilyCase::Everything);
        assert_eq!(case.members(&catalog, "A"), oids(&["n1", "n2", "n3"]));

        let constraining = RuleSet::from_rules(&[
            SelectorRule::all(),
            SelectorRule::family("A", true),
            SelectorRule::nvt("n1", "A", false),
            SelectorRule::nvt("n5", "B", true),
        ]);
        let a = FamilyCase::classify(&constraining, "A");
        assert!(matches!(a, FamilyCase::ExcludedFamily { .. }));
        assert!(!a.is_growing());
        assert_eq!(a.members(&catalog, "A"), oids(&["n1"]));
        let b = FamilyCase::classify(&constraining, "B");
        assert!(matches!(b, FamilyCase::ConstrainedFamily { .. }));
        assert_eq!(b.members(&catalog, "B"), oids(&["n4"]));

        let generating = RuleSet::from_rules(&[
            SelectorRule::family("A", false),
            SelectorRule::nvt("n2", "A", true),
            SelectorRule::nvt("n4", "B", false),
        ]);
        let a = FamilyCase::classify(&generating, "A");
        assert!(matches!(a, FamilyCase::IncludedFamily { .. }));
        assert_eq!(a.members(&catalog, "A"), oids(&["n1", "n3"]));
        let b = FamilyCase::classify(&generating, "B");
        assert!(matches!(b, FamilyCase::UnselectedFamily { .. }));
        assert_eq!(b.member_count(&catalog, "B"), 1);
        assert!(b.contains(&catalog, "B", "n4"));
        assert!(!b.contains(&catalog, "B", "n5"));
    }

    #[test]
    fn test_membership_matches_reference_evaluator() {
        let catalog = catalog();
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..500 {
            let rules = random_rules(&mut rng, &catalog);
            let set = RuleSet::from_rules(&rules);
            let expected = reference_members(&rules, &catalog);

            for (family, members) in &expected {
                let case = FamilyCase::classify(&set, family);
                assert_eq!(&case.members(&catalog, family), members, "rules: {:?}", rules);
                assert_eq!(case.member_count(&catalog, family), members.len());
                for oid in catalog.family_oids(family) {
                    assert_eq!(case.contains(&catalog, family, oid), members.contains(oid));
                }
            }

            let flat: BTreeSet<String> = expected.values().flatten().cloned().collect();
            assert_eq!(plugin_list(&set, &catalog), flat.into_iter().collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_layout_reproduces_membership() {
        let catalog = catalog();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let rules = random_rules(&mut rng, &catalog);
            let set = RuleSet::from_rules(&rules);
            for constraining in [true, false] {
                let mut rebuilt = if constraining { vec![SelectorRule::all()] } else { vec![] };
                for family in catalog.families() {
                    let layout = FamilyCase::classify(&set, family).layout(&catalog, family);
                    rebuilt.extend(layout.rules(family, constraining));
                }
                let rebuilt = RuleSet::from_rules(&rebuilt);
                for family in catalog.families() {
                    let before = FamilyCase::classify(&set, family);
                    let after = FamilyCase::classify(&rebuilt, family);
                    assert_eq!(before.is_growing(), after.is_growing());
                    assert_eq!(before.members(&catalog, family), after.members(&catalog, family));
                }
            }
        }
    }

    #[test]
    fn test_static_members_are_catalog_independent() {
        let catalog = catalog();
        let rules = RuleSet::from_rules(&[SelectorRule::nvt("retired-oid", "A", false)]);
        let case = FamilyCase::classify(&rules, "A");
        assert_eq!(case.members(&catalog, "A"), oids(&["retired-oid"]));
        assert!(is_selected(&rules, &catalog, "retired-oid"));
        assert!(!is_selected(&rules, &catalog, "n1"));
    }

    #[test]
    fn test_family_states() {
        let catalog = catalog();
        let rules = RuleSet::from_rules(&[
            SelectorRule::all(),
            SelectorRule::family("A", true),
            SelectorRule::nvt("n1", "A", false),
        ]);
        let states = family_states(&rules, &catalog);
        assert_eq!(
            states,
            vec![
                FamilyState {
                    family: String::from("A"),
                    growing: false,
                    selected: 1,
                    total: 3,
                },
                FamilyState {
                    family: String::from("B"),
                    growing: true,
                    selected: 2,
                    total: 2,
                },
            ]
        );
    }
}
