//! Family and NVT mutation - rewrite a config's selection family by family

use crate::catalog::NvtCatalog;
use crate::counts;
use crate::rules::{write_family_layout, FamilyLayout, RuleSet};
use crate::selection::FamilyCase;
use crate::switch::switch_representation;
use forgescan_core::{Error, Result, ScanConfig, SelectionCounts};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Desired family-level state of a config
///
/// Catalog families listed nowhere become static and keep whatever NVTs
/// they currently select.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySelection {
    /// Growing, every NVT selected
    #[serde(default)]
    pub growing_all: Vec<String>,
    /// Static, every NVT currently in the family selected
    #[serde(default)]
    pub static_all: Vec<String>,
    /// Growing, keeping the current per-NVT selection
    #[serde(default)]
    pub growing_rest: Vec<String>,
    /// New families are selected automatically (constraining mode)
    #[serde(default)]
    pub families_growing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyTarget {
    GrowingAll,
    StaticAll,
    Growing,
    Static,
}

impl FamilySelection {
    fn validate(&self, catalog: &NvtCatalog) -> Result<()> {
        for family in self
            .growing_all
            .iter()
            .chain(&self.static_all)
            .chain(&self.growing_rest)
        {
            if !catalog.has_family(family) {
                return Err(Error::UnknownFamily {
                    family: family.clone(),
                });
            }
        }

        let static_all: HashSet<&str> = self.static_all.iter().map(String::as_str).collect();
        if let Some(family) = self
            .growing_all
            .iter()
            .chain(&self.growing_rest)
            .find(|family| static_all.contains(family.as_str()))
        {
            return Err(Error::InvalidSelection(format!(
                "family '{}' cannot be both growing and static",
                family
            )));
        }
        Ok(())
    }

    fn target(&self, family: &str) -> FamilyTarget {
        let listed = |list: &[String]| list.iter().any(|f| f == family);
        if listed(&self.growing_all) {
            FamilyTarget::GrowingAll
        } else if listed(&self.static_all) {
            FamilyTarget::StaticAll
        } else if listed(&self.growing_rest) {
            FamilyTarget::Growing
        } else {
            FamilyTarget::Static
        }
    }
}

fn layout_size(layout: &FamilyLayout, all: &BTreeSet<String>) -> usize {
    match layout {
        FamilyLayout::Growing { excludes } => all.difference(excludes).count(),
        FamilyLayout::Static { includes } => includes.len(),
    }
}

/// Reconcile every catalog family of a config with the requested state
///
/// Switches the selector mode first when `families_growing` differs from it.
/// Families already in their target state keep their rules.
pub fn set_family_selection(
    conn: &Connection,
    catalog: &NvtCatalog,
    config: &ScanConfig,
    selection: &FamilySelection,
) -> Result<SelectionCounts> {
    selection.validate(catalog)?;

    let selector = config.selector_id;
    switch_representation(conn, catalog, selector, selection.families_growing)?;

    let rules = RuleSet::load(conn, selector)?;
    let constraining = rules.is_constraining();
    let base = i64::from(counts::nvt_count(&rules, catalog, None));
    let mut delta: i64 = 0;
    let mut rewritten = 0usize;

    for family in catalog.families() {
        let case = FamilyCase::classify(&rules, family);
        let growing = case.is_growing();
        let all = catalog.family_oids(family);
        let current = case.members(catalog, family);

        let layout = match selection.target(family) {
            FamilyTarget::GrowingAll => {
                if growing && current == *all {
                    continue;
                }
                FamilyLayout::Growing {
                    excludes: BTreeSet::new(),
                }
            }
            FamilyTarget::StaticAll => {
                if !growing && current == *all {
                    continue;
                }
                FamilyLayout::Static {
                    includes: all.clone(),
                }
            }
            FamilyTarget::Growing => {
                if growing {
                    continue;
                }
                FamilyLayout::Growing {
                    excludes: all.difference(&current).cloned().collect(),
                }
            }
            FamilyTarget::Static => {
                if !growing {
                    continue;
                }
                FamilyLayout::Static { includes: current.clone() }
            }
        };

        delta += layout_size(&layout, all) as i64 - current.len() as i64;
        write_family_layout(conn, selector, family, constraining, &layout)?;
        rewritten += 1;
    }

    let counts = counts::refresh(conn, catalog, config)?;
    counts::expect_equal(
        config,
        "nvt_count",
        base + delta,
        i64::from(counts.nvt_count),
    )?;

    info!(
        "Updated families of config {}: {} rewritten, {} NVTs selected",
        config.id, rewritten, counts.nvt_count
    );
    Ok(counts)
}

/// Replace the NVT selection of one family
///
/// Every OID must exist in the catalog and belong to `family`. A growing
/// family stays growing and stores the complement as excludes; a static
/// family stores the selection as explicit includes.
pub fn set_nvt_selection(
    conn: &Connection,
    catalog: &NvtCatalog,
    config: &ScanConfig,
    family: &str,
    selected: &[String],
) -> Result<SelectionCounts> {
    if !catalog.has_family(family) {
        return Err(Error::UnknownFamily {
            family: family.to_string(),
        });
    }

    let mut chosen = BTreeSet::new();
    for oid in selected {
        catalog.resolve_in_family(oid, family)?;
        chosen.insert(oid.clone());
    }

    let selector = config.selector_id;
    let rules = RuleSet::load(conn, selector)?;
    let case = FamilyCase::classify(&rules, family);

    let layout = if case.is_growing() {
        FamilyLayout::Growing {
            excludes: catalog.family_oids(family).difference(&chosen).cloned().collect(),
        }
    } else {
        FamilyLayout::Static {
            includes: chosen.clone(),
        }
    };
    debug!(
        "Config {} family '{}': {} of {} NVTs selected ({})",
        config.id,
        family,
        chosen.len(),
        catalog.family_size(family),
        if case.is_growing() { "growing" } else { "static" }
    );

    write_family_layout(conn, selector, family, rules.is_constraining(), &layout)?;
    let counts = counts::refresh(conn, catalog, config)?;

    let after = RuleSet::load(conn, selector)?;
    counts::expect_equal(
        config,
        "nvt_count",
        chosen.len() as i64,
        i64::from(counts::nvt_count(&after, catalog, Some(family))),
    )?;
    Ok(counts)
}
