//! Representation switcher - flip a selector between constraining and
//! generating without changing what it selects

use crate::catalog::NvtCatalog;
use crate::rules::{self, RuleSet};
use crate::selection::{mentioned_families, FamilyCase};
use forgescan_core::{Result, SelectorId, SelectorRule};
use rusqlite::Connection;
use tracing::{debug, info};

/// Rewrite family-level rules so the selector uses the requested mode
///
/// Returns `false` when the selector already is in that mode. NVT rules are
/// left alone; only the ALL rule and FAMILY rules change.
pub fn switch_representation(
    conn: &Connection,
    catalog: &NvtCatalog,
    selector: SelectorId,
    constraining: bool,
) -> Result<bool> {
    let current = RuleSet::load(conn, selector)?;
    if current.is_constraining() == constraining {
        return Ok(false);
    }

    let mut growing = 0usize;
    let families = mentioned_families(&current, catalog);
    for family in &families {
        let was_growing = FamilyCase::classify(&current, family).is_growing();
        if was_growing {
            growing += 1;
        }

        match (constraining, was_growing) {
            // Generating: growing families need an include, static ones nothing
            (false, true) => rules::insert_rule(conn, selector, &SelectorRule::family(family, false))?,
            (false, false) => rules::delete_family_rule(conn, selector, family)?,
            // Constraining: growing families are bare, static ones need an exclude
            (true, true) => rules::delete_family_rule(conn, selector, family)?,
            (true, false) => rules::insert_rule(conn, selector, &SelectorRule::family(family, true))?,
        }
    }

    if constraining {
        rules::insert_rule(conn, selector, &SelectorRule::all())?;
    } else {
        rules::delete_all_rule(conn, selector)?;
    }

    debug!(
        "Selector {}: {} of {} families growing across switch",
        selector,
        growing,
        families.len()
    );
    info!(
        "Switched selector {} to {} mode",
        selector,
        if constraining { "constraining" } else { "generating" }
    );
    Ok(true)
}
