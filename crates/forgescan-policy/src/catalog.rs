//! NVT catalog cache - immutable in-memory index of the feed
//!
//! A snapshot is built once from the persisted `nvts` table and shared as
//! `Arc<NvtCatalog>`. It is never mutated; a feed refresh builds a new one.

use crate::store::Store;
use forgescan_core::{Error, NvtInfo, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

static NO_OIDS: BTreeSet<String> = BTreeSet::new();

/// Read-only index of every known NVT
#[derive(Debug, Default)]
pub struct NvtCatalog {
    /// NVTs indexed by OID
    nvts: HashMap<String, NvtInfo>,
    /// OIDs grouped by family
    families: BTreeMap<String, BTreeSet<String>>,
}

impl NvtCatalog {
    /// Build a snapshot from catalog entries (later duplicates win)
    pub fn from_nvts(nvts: impl IntoIterator<Item = NvtInfo>) -> Self {
        let mut catalog = Self::default();
        for nvt in nvts {
            if let Some(previous) = catalog.nvts.remove(&nvt.oid) {
                if let Some(oids) = catalog.families.get_mut(&previous.family) {
                    oids.remove(&previous.oid);
                    if oids.is_empty() {
                        catalog.families.remove(&previous.family);
                    }
                }
            }
            catalog
                .families
                .entry(nvt.family.clone())
                .or_default()
                .insert(nvt.oid.clone());
            catalog.nvts.insert(nvt.oid.clone(), nvt);
        }
        catalog
    }

    /// Load a shared snapshot from the persisted catalog
    pub fn load(store: &Store) -> Result<Arc<Self>> {
        let catalog = Self::from_nvts(store.load_nvts()?);
        info!(
            "Loaded NVT catalog: {} NVTs in {} families",
            catalog.len(),
            catalog.family_count()
        );
        Ok(Arc::new(catalog))
    }

    /// Get an NVT by OID
    pub fn get(&self, oid: &str) -> Option<&NvtInfo> {
        self.nvts.get(oid)
    }

    /// Family an OID belongs to
    pub fn family_of(&self, oid: &str) -> Option<&str> {
        self.nvts.get(oid).map(|nvt| nvt.family.as_str())
    }

    /// Resolve an OID that must belong to `family`
    pub fn resolve_in_family(&self, oid: &str, family: &str) -> Result<&NvtInfo> {
        let nvt = self.get(oid).ok_or_else(|| Error::UnknownNvt {
            oid: oid.to_string(),
        })?;
        if nvt.family != family {
            return Err(Error::NvtFamilyMismatch {
                oid: oid.to_string(),
                expected: family.to_string(),
                actual: nvt.family.clone(),
            });
        }
        Ok(nvt)
    }

    pub fn has_family(&self, family: &str) -> bool {
        self.families.contains_key(family)
    }

    /// All family names, sorted
    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(|s| s.as_str())
    }

    /// OIDs currently in a family (empty for unknown families)
    pub fn family_oids(&self, family: &str) -> &BTreeSet<String> {
        self.families.get(family).unwrap_or(&NO_OIDS)
    }

    /// Number of NVTs currently in a family
    pub fn family_size(&self, family: &str) -> usize {
        self.family_oids(family).len()
    }

    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    pub fn len(&self) -> usize {
        self.nvts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nvts.is_empty()
    }
}

/// Feed export document: a list of NVTs
#[derive(Debug, Deserialize)]
struct FeedDocument {
    nvts: Vec<NvtInfo>,
}

/// Parse a YAML or JSON feed export
///
/// Accepts either a bare list of NVTs or a document with an `nvts` key.
/// Entries without an OID or family are skipped.
pub fn parse_feed(content: &str) -> Result<Vec<NvtInfo>> {
    let nvts = match serde_yaml::from_str::<Vec<NvtInfo>>(content) {
        Ok(nvts) => nvts,
        Err(_) => serde_yaml::from_str::<FeedDocument>(content)?.nvts,
    };

    let total = nvts.len();
    let valid: Vec<NvtInfo> = nvts
        .into_iter()
        .filter(|nvt| {
            let ok = !nvt.oid.trim().is_empty() && !nvt.family.trim().is_empty();
            if !ok {
                warn!("Skipping feed entry without OID or family: {:?}", nvt);
            }
            ok
        })
        .collect();

    if valid.len() < total {
        warn!("Skipped {} of {} feed entries", total - valid.len(), total);
    }
    Ok(valid)
}

/// Load a feed export from disk
pub fn load_feed_file(path: impl AsRef<Path>) -> Result<Vec<NvtInfo>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.display().to_string(),
        });
    }

    info!("Loading NVT feed from: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse_feed(&content)
}
