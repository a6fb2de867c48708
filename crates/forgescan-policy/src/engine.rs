//! Policy engine - transactional facade over the store and catalog snapshot

use crate::catalog::NvtCatalog;
use crate::counts;
use crate::import::{self, ImportRule};
use crate::mutation::{self, FamilySelection};
use crate::rules::{self, RuleSet};
use crate::selection::{self, FamilyCase, FamilyState};
use crate::store::{self, Store};
use crate::switch;
use forgescan_common::DatabaseConfig;
use forgescan_core::{
    ConfigId, Error, NvtInfo, Result, ScanConfig, SelectionCounts, SelectorRule, TaskId,
};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// Scan-policy engine
///
/// Every mutation runs in one exclusive transaction and is refused before
/// any write when a task references the config. Clones share the store and
/// the catalog cell: operations hold the catalog read lock for their whole
/// transaction, a catalog swap holds the write lock until every config's
/// counts match the new snapshot.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    store: Store,
    catalog: Arc<RwLock<Arc<NvtCatalog>>>,
}

impl PolicyEngine {
    /// Create an engine over a store, loading the catalog it holds
    pub fn new(store: Store) -> Result<Self> {
        let catalog = NvtCatalog::load(&store)?;
        Ok(Self {
            store,
            catalog: Arc::new(RwLock::new(catalog)),
        })
    }

    /// Open the configured database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        Self::new(Store::open_with(config)?)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current catalog snapshot
    pub fn catalog(&self) -> Result<Arc<NvtCatalog>> {
        Ok(Arc::clone(&*self.snapshot()?))
    }

    fn snapshot(&self) -> Result<RwLockReadGuard<'_, Arc<NvtCatalog>>> {
        self.catalog
            .read()
            .map_err(|_| Error::Internal(String::from("catalog lock poisoned")))
    }

    fn snapshot_mut(&self) -> Result<RwLockWriteGuard<'_, Arc<NvtCatalog>>> {
        self.catalog
            .write()
            .map_err(|_| Error::Internal(String::from("catalog lock poisoned")))
    }

    /// Install a new catalog snapshot and refresh every config against it
    ///
    /// Returns the number of configs whose cached counts changed.
    pub fn replace_catalog(&self, catalog: Arc<NvtCatalog>) -> Result<usize> {
        let mut current = self.snapshot_mut()?;
        Self::install(&self.store, &mut current, catalog)
    }

    /// Rebuild the snapshot from the persisted catalog
    pub fn reload_catalog(&self) -> Result<usize> {
        let mut current = self.snapshot_mut()?;
        let catalog = NvtCatalog::load(&self.store)?;
        Self::install(&self.store, &mut current, catalog)
    }

    /// Publish feed entries: persist, reload the snapshot, refresh every config
    pub fn publish_nvts(&self, nvts: &[NvtInfo]) -> Result<usize> {
        let mut current = self.snapshot_mut()?;
        let written = self.store.upsert_nvts(nvts)?;
        let catalog = NvtCatalog::load(&self.store)?;
        Self::install(&self.store, &mut current, catalog)?;
        Ok(written)
    }

    fn install(store: &Store, current: &mut Arc<NvtCatalog>, catalog: Arc<NvtCatalog>) -> Result<usize> {
        info!(
            "Replacing NVT catalog: {} -> {} NVTs",
            current.len(),
            catalog.len()
        );
        let changed = Self::refresh_all(store, &catalog)?;
        *current = catalog;
        Ok(changed)
    }

    fn refresh_all(store: &Store, catalog: &NvtCatalog) -> Result<usize> {
        let changed = store.exclusive(|tx| {
            let mut changed = 0;
            for config in store::list_configs(tx)? {
                if counts::refresh(tx, catalog, &config)? != config.counts {
                    changed += 1;
                }
            }
            Ok(changed)
        })?;

        info!("Refreshed config counts: {} changed", changed);
        Ok(changed)
    }

    // Configs

    /// Create a config selecting nothing (generating) or everything (constraining)
    pub fn create_config(&self, name: &str, comment: &str, constraining: bool) -> Result<ScanConfig> {
        let initial = if constraining {
            vec![SelectorRule::all()]
        } else {
            Vec::new()
        };
        let catalog = self.snapshot()?;
        let config = self.store.exclusive(|tx| {
            let selector = store::insert_selector(tx, name)?;
            rules::insert_rules(tx, selector, &initial)?;
            let counts = counts::compute(&RuleSet::load(tx, selector)?, &catalog);
            let id = store::insert_config(tx, name, comment, selector, &counts)?;
            store::get_config(tx, id)
        })?;

        info!("Created scan config {} ({})", config.name, config.uuid);
        Ok(config)
    }

    /// Create a config from imported rules
    ///
    /// All rules are validated before anything is written. Returns the config
    /// and the OIDs skipped because the catalog does not know them.
    pub fn create_selector_from_import(
        &self,
        name: &str,
        comment: &str,
        rules: &[ImportRule],
    ) -> Result<(ScanConfig, Vec<String>)> {
        let catalog = self.snapshot()?;
        let outcome = import::validate(rules, &catalog)?;
        let config = self.store.exclusive(|tx| {
            let selector = store::insert_selector(tx, name)?;
            rules::insert_rules(tx, selector, &outcome.rules)?;
            let counts = counts::compute(&RuleSet::load(tx, selector)?, &catalog);
            let id = store::insert_config(tx, name, comment, selector, &counts)?;
            store::get_config(tx, id)
        })?;

        if !outcome.skipped.is_empty() {
            warn!(
                "Imported config {} without {} unknown NVTs",
                config.name,
                outcome.skipped.len()
            );
        }
        info!(
            "Imported scan config {} with {} rules",
            config.name,
            outcome.rules.len()
        );
        Ok((config, outcome.skipped))
    }

    /// Clone a config's rules and cached counts under a new name
    pub fn copy_config(&self, source: ConfigId, name: &str) -> Result<ScanConfig> {
        let _catalog = self.snapshot()?;
        let config = self.store.exclusive(|tx| {
            let original = store::get_config(tx, source)?;
            let selector = store::insert_selector(tx, name)?;
            let copied = rules::load_rules(tx, original.selector_id)?;
            rules::insert_rules(tx, selector, &copied)?;
            let id = store::insert_config(tx, name, &original.comment, selector, &original.counts)?;
            store::get_config(tx, id)
        })?;

        info!("Copied scan config {} to {}", source, config.name);
        Ok(config)
    }

    /// Delete a config with its selector and rules
    pub fn delete_config(&self, id: ConfigId) -> Result<()> {
        self.store.exclusive(|tx| {
            let config = store::get_config(tx, id)?;
            store::ensure_not_in_use(tx, id)?;
            store::delete_config(tx, &config)
        })?;
        info!("Deleted scan config {}", id);
        Ok(())
    }

    // Tasks

    /// Register a task referencing a config
    pub fn create_task(&self, name: &str, config: ConfigId) -> Result<TaskId> {
        self.store.exclusive(|tx| store::insert_task(tx, name, config))
    }

    pub fn delete_task(&self, task: TaskId) -> Result<()> {
        self.store.exclusive(|tx| store::delete_task(tx, task))
    }

    pub fn tasks_using(&self, config: ConfigId) -> Result<u32> {
        self.store.read(|conn| store::tasks_using(conn, config))
    }

    // Selection mutations

    /// Reconcile a config's families with the requested state
    pub fn set_family_selection(
        &self,
        id: ConfigId,
        selection: &FamilySelection,
    ) -> Result<SelectionCounts> {
        let catalog = self.snapshot()?;
        self.store.exclusive(|tx| {
            let config = store::get_config(tx, id)?;
            store::ensure_not_in_use(tx, id)?;
            mutation::set_family_selection(tx, &catalog, &config, selection)
        })
    }

    /// Replace the NVT selection of one family
    pub fn set_nvt_selection(
        &self,
        id: ConfigId,
        family: &str,
        selected: &[String],
    ) -> Result<SelectionCounts> {
        let catalog = self.snapshot()?;
        self.store.exclusive(|tx| {
            let config = store::get_config(tx, id)?;
            store::ensure_not_in_use(tx, id)?;
            mutation::set_nvt_selection(tx, &catalog, &config, family, selected)
        })
    }

    /// Flip a config between constraining and generating
    ///
    /// Returns `false` when it already is in the requested mode.
    pub fn switch_representation(&self, id: ConfigId, constraining: bool) -> Result<bool> {
        let catalog = self.snapshot()?;
        self.store.exclusive(|tx| {
            let config = store::get_config(tx, id)?;
            store::ensure_not_in_use(tx, id)?;

            let before = counts::compute(&RuleSet::load(tx, config.selector_id)?, &catalog);
            if !switch::switch_representation(tx, &catalog, config.selector_id, constraining)? {
                return Ok(false);
            }
            let after = counts::refresh(tx, &catalog, &config)?;

            counts::expect_equal(
                &config,
                "nvt_count",
                before.nvt_count.into(),
                after.nvt_count.into(),
            )?;
            counts::expect_equal(
                &config,
                "family_count",
                before.family_count.into(),
                after.family_count.into(),
            )?;
            Ok(true)
        })
    }

    // Count cache

    /// Recompute and store one config's counts
    pub fn recompute_counts(&self, id: ConfigId) -> Result<SelectionCounts> {
        let catalog = self.snapshot()?;
        self.store.exclusive(|tx| {
            let config = store::get_config(tx, id)?;
            counts::refresh(tx, &catalog, &config)
        })
    }

    /// Recompute every config against the current catalog
    ///
    /// Returns the number of configs whose cached counts changed.
    pub fn refresh_all_counts(&self) -> Result<usize> {
        let catalog = self.snapshot()?;
        Self::refresh_all(&self.store, &catalog)
    }

    /// Check a config's cached counts against recomputation
    pub fn verify_counts(&self, id: ConfigId) -> Result<()> {
        let catalog = self.snapshot()?;
        self.store.read(|conn| {
            let config = store::get_config(conn, id)?;
            counts::verify(conn, &catalog, &config)
        })
    }

    // Read accessors

    pub fn config(&self, id: ConfigId) -> Result<ScanConfig> {
        self.store.read(|conn| store::get_config(conn, id))
    }

    pub fn list_configs(&self) -> Result<Vec<ScanConfig>> {
        self.store.read(store::list_configs)
    }

    /// Raw rules of a config's selector
    pub fn rules(&self, id: ConfigId) -> Result<Vec<SelectorRule>> {
        self.store.read(|conn| {
            let config = store::get_config(conn, id)?;
            rules::load_rules(conn, config.selector_id)
        })
    }

    pub fn family_states(&self, id: ConfigId) -> Result<Vec<FamilyState>> {
        self.with_rule_set(id, selection::family_states)
    }

    /// Selected OIDs of one family, sorted
    pub fn family_members(&self, id: ConfigId, family: &str) -> Result<Vec<String>> {
        self.with_rule_set(id, |set, catalog| {
            FamilyCase::classify(set, family)
                .members(catalog, family)
                .into_iter()
                .collect()
        })
    }

    pub fn nvt_selected(&self, id: ConfigId, oid: &str) -> Result<bool> {
        self.with_rule_set(id, |set, catalog| selection::is_selected(set, catalog, oid))
    }

    /// Every selected OID, sorted; the list handed to a scan
    pub fn plugin_list(&self, id: ConfigId) -> Result<Vec<String>> {
        self.with_rule_set(id, selection::plugin_list)
    }

    fn with_rule_set<T>(
        &self,
        id: ConfigId,
        f: impl FnOnce(&RuleSet, &NvtCatalog) -> T,
    ) -> Result<T> {
        let catalog = self.snapshot()?;
        self.store.read(|conn| {
            let config = store::get_config(conn, id)?;
            let set = RuleSet::load(conn, config.selector_id)?;
            Ok(f(&set, &**catalog))
        })
    }
}

/// Import a rule document file as a new config
pub fn import_rules_file(
    engine: &PolicyEngine,
    path: impl AsRef<std::path::Path>,
) -> Result<(ScanConfig, Vec<String>)> {
    let document = import::load_rules_file(path)?;
    if document.name.trim().is_empty() {
        return Err(Error::InvalidSelection(String::from(
            "rule document has no name",
        )));
    }
    engine.create_selector_from_import(&document.name, &document.comment, &document.rules)
}
