//! Count cache maintenance - the summary fields stored on every config

use crate::catalog::NvtCatalog;
use crate::rules::RuleSet;
use crate::selection::{family_universe, FamilyCase};
use crate::store;
use forgescan_core::{Error, Result, ScanConfig, SelectionCounts};
use rusqlite::Connection;
use tracing::{debug, error};

/// Families that are growing or hold at least one explicit NVT include
pub fn family_count(rules: &RuleSet, catalog: &NvtCatalog) -> u32 {
    family_universe(rules, catalog)
        .iter()
        .filter(|family| {
            let case = FamilyCase::classify(rules, family);
            case.is_growing() || !case.static_includes().is_empty()
        })
        .count() as u32
}

/// Selected NVTs in one family, or in all families when `family` is `None`
pub fn nvt_count(rules: &RuleSet, catalog: &NvtCatalog, family: Option<&str>) -> u32 {
    match family {
        Some(family) => FamilyCase::classify(rules, family).member_count(catalog, family) as u32,
        None => family_universe(rules, catalog)
            .iter()
            .map(|family| FamilyCase::classify(rules, family).member_count(catalog, family))
            .sum::<usize>() as u32,
    }
}

/// At least one family tracks new catalog NVTs
///
/// A growing family whose current NVTs are all excluded still counts.
pub fn nvts_growing(rules: &RuleSet, catalog: &NvtCatalog) -> bool {
    family_universe(rules, catalog)
        .iter()
        .any(|family| FamilyCase::classify(rules, family).is_growing())
}

/// Recompute all four cached fields from scratch
pub fn compute(rules: &RuleSet, catalog: &NvtCatalog) -> SelectionCounts {
    SelectionCounts {
        family_count: family_count(rules, catalog),
        nvt_count: nvt_count(rules, catalog, None),
        families_growing: rules.is_constraining(),
        nvts_growing: nvts_growing(rules, catalog),
    }
}

/// Recompute a config's counts from its current rules and persist them
pub fn refresh(conn: &Connection, catalog: &NvtCatalog, config: &ScanConfig) -> Result<SelectionCounts> {
    let rules = RuleSet::load(conn, config.selector_id)?;
    let counts = compute(&rules, catalog);
    store::write_counts(conn, config.id, &counts)?;

    if counts != config.counts {
        debug!(
            "Config {} counts: families {} -> {}, nvts {} -> {}",
            config.id,
            config.counts.family_count,
            counts.family_count,
            config.counts.nvt_count,
            counts.nvt_count
        );
    }
    Ok(counts)
}

/// Fail when a value about to be trusted disagrees with recomputation
pub fn expect_equal(
    config: &ScanConfig,
    field: &'static str,
    expected: i64,
    actual: i64,
) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    error!(
        "Count cache mismatch on config {} ({}): {}={} but rules give {}",
        config.id, config.name, field, expected, actual
    );
    Err(Error::CountMismatch {
        config_id: config.id.0,
        field,
        expected,
        actual,
    })
}

/// Check that the stored counts of a config match recomputation
pub fn verify(conn: &Connection, catalog: &NvtCatalog, config: &ScanConfig) -> Result<()> {
    let rules = RuleSet::load(conn, config.selector_id)?;
    let fresh = compute(&rules, catalog);
    let stored = config.counts;

    expect_equal(config, "family_count", stored.family_count.into(), fresh.family_count.into())?;
    expect_equal(config, "nvt_count", stored.nvt_count.into(), fresh.nvt_count.into())?;
    expect_equal(
        config,
        "families_growing",
        stored.families_growing.into(),
        fresh.families_growing.into(),
    )?;
    expect_equal(
        config,
        "nvts_growing",
        stored.nvts_growing.into(),
        fresh.nvts_growing.into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgescan_core::{NvtInfo, SelectorRule};

    fn catalog(extra: &[NvtInfo]) -> NvtCatalog {
        let mut nvts = vec![
            NvtInfo::new("n1", "", "A"),
            NvtInfo::new("n2", "", "A"),
            NvtInfo::new("n3", "", "A"),
            NvtInfo::new("n4", "", "B"),
            NvtInfo::new("n5", "", "B"),
        ];
        nvts.extend_from_slice(extra);
        NvtCatalog::from_nvts(nvts)
    }

    #[test]
    fn test_all_only_selector() {
        let catalog = catalog(&[]);
        let rules = RuleSet::from_rules(&[SelectorRule::all()]);
        assert_eq!(
            compute(&rules, &catalog),
            SelectionCounts {
                family_count: 2,
                nvt_count: 5,
                families_growing: true,
                nvts_growing: true,
            }
        );
    }

    #[test]
    fn test_excluded_family_with_include_and_catalog_growth() {
        let rules = RuleSet::from_rules(&[
            SelectorRule::all(),
            SelectorRule::family("A", true),
            SelectorRule::nvt("n1", "A", false),
        ]);

        let before = compute(&rules, &catalog(&[]));
        assert_eq!(before.family_count, 2);
        assert_eq!(before.nvt_count, 3);
        assert!(before.nvts_growing);

        // A new NVT in growing family B is picked up without touching the rules
        let grown = catalog(&[NvtInfo::new("n6", "", "B")]);
        assert_eq!(compute(&rules, &grown).nvt_count, 4);
        assert_eq!(nvt_count(&rules, &grown, Some("B")), 3);

        // A new NVT in static family A is not
        let grown_a = catalog(&[NvtInfo::new("n7", "", "A")]);
        assert_eq!(nvt_count(&rules, &grown_a, Some("A")), 1);
    }

    #[test]
    fn test_generating_counts() {
        let catalog = catalog(&[]);
        let rules = RuleSet::from_rules(&[
            SelectorRule::family("A", false),
            SelectorRule::nvt("n2", "A", true),
            SelectorRule::nvt("n4", "B", false),
        ]);
        assert_eq!(
            compute(&rules, &catalog),
            SelectionCounts {
                family_count: 2,
                nvt_count: 3,
                families_growing: false,
                nvts_growing: true,
            }
        );

        let empty = RuleSet::default();
        assert_eq!(compute(&empty, &catalog), SelectionCounts::default());
    }

    #[test]
    fn test_fully_excluded_growing_family_still_growing() {
        let catalog = catalog(&[]);
        let rules = RuleSet::from_rules(&[
            SelectorRule::family("B", false),
            SelectorRule::nvt("n4", "B", true),
            SelectorRule::nvt("n5", "B", true),
        ]);
        let counts = compute(&rules, &catalog);
        assert_eq!(counts.nvt_count, 0);
        assert_eq!(counts.family_count, 1);
        assert!(counts.nvts_growing);
    }

    #[test]
    fn test_retired_growing_family_is_not_counted() {
        let catalog = catalog(&[]);

        // Z left the feed; its leftover exclude must not make it a growing family
        let constraining = RuleSet::from_rules(&[
            SelectorRule::all(),
            SelectorRule::nvt("z1", "Z", true),
        ]);
        let counts = compute(&constraining, &catalog);
        assert_eq!(counts.family_count, 2);
        assert_eq!(counts.nvt_count, 5);

        let generating = RuleSet::from_rules(&[SelectorRule::family("Z", false)]);
        let counts = compute(&generating, &catalog);
        assert_eq!(counts.family_count, 0);
        assert!(!counts.nvts_growing);

        // A static list for a retired family still selects its OIDs
        let retired_static = RuleSet::from_rules(&[
            SelectorRule::all(),
            SelectorRule::family("Z", true),
            SelectorRule::nvt("z1", "Z", false),
        ]);
        let counts = compute(&retired_static, &catalog);
        assert_eq!(counts.family_count, 3);
        assert_eq!(counts.nvt_count, 6);
    }

    #[test]
    fn test_expect_equal_reports_negative_expectation() {
        let config = ScanConfig {
            id: forgescan_core::ConfigId(1),
            uuid: String::new(),
            name: String::from("test"),
            comment: String::new(),
            selector_id: forgescan_core::SelectorId(1),
            counts: SelectionCounts::default(),
            modified_at: 0,
        };
        assert!(expect_equal(&config, "nvt_count", 3, 3).is_ok());
        let err = expect_equal(&config, "nvt_count", -1, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::CountMismatch {
                expected: -1,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_constraining_everything_excluded() {
        let catalog = catalog(&[]);
        let rules = RuleSet::from_rules(&[
            SelectorRule::all(),
            SelectorRule::family("A", true),
            SelectorRule::family("B", true),
        ]);
        let counts = compute(&rules, &catalog);
        assert_eq!(counts.family_count, 0);
        assert_eq!(counts.nvt_count, 0);
        assert!(counts.families_growing);
        assert!(!counts.nvts_growing);
    }
}
