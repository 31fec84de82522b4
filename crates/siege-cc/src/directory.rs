//! Shard directory: which SCVs hold enabled streams of which target, and
//! which SCVs currently answer.
//!
//! The directory is a cache over the catalog's per-shard stream index. It is
//! rebuilt wholesale by [`ShardDirectory::refresh`] and patched in between by
//! the internal catalog endpoint as SCVs report changes. Fail counts live only
//! here; an SCV is online while its count is below `max_fails`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::Serialize;

use siege_catalog::{Catalog, ScvRecord};
use siege_core::{StreamStatus, TargetId};

use crate::error::Result;

#[derive(Debug, Clone)]
struct ScvSlot {
    record: ScvRecord,
    fail_count: u32,
}

/// Reachability of one SCV, as reported by `GET /scvs/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScvStatus {
    /// Externally reachable host.
    pub host: String,
    /// Whether the SCV is below the failure threshold.
    pub online: bool,
    /// Consecutive failed requests.
    pub fail_count: u32,
}

/// In-memory shard directory.
#[derive(Debug)]
pub struct ShardDirectory {
    shards: RwLock<HashMap<TargetId, BTreeSet<String>>>,
    scvs: RwLock<BTreeMap<String, ScvSlot>>,
    max_fails: u32,
}

impl ShardDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new(max_fails: u32) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            scvs: RwLock::new(BTreeMap::new()),
            max_fails,
        }
    }

    /// Rebuild the directory from the catalog. Fail counts of SCVs that are
    /// still registered survive the refresh. Returns the number of targets
    /// with at least one shard.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read; the directory is left
    /// untouched in that case.
    pub async fn refresh<C: Catalog + ?Sized>(&self, catalog: &C) -> Result<usize> {
        let records = catalog.list_scvs().await?;
        let mut shards: HashMap<TargetId, BTreeSet<String>> = HashMap::new();
        for record in &records {
            for entry in catalog.list_stream_entries(&record.name).await? {
                if entry.status == StreamStatus::Ok {
                    shards
                        .entry(entry.target_id)
                        .or_default()
                        .insert(record.name.clone());
                }
            }
        }

        {
            let mut scvs = self.scvs.write();
            let mut next = BTreeMap::new();
            for record in records {
                let fail_count = scvs.get(&record.name).map_or(0, |slot| slot.fail_count);
                next.insert(record.name.clone(), ScvSlot { record, fail_count });
            }
            *scvs = next;
        }
        let targets = shards.len();
        *self.shards.write() = shards;
        tracing::debug!(targets, "Shard directory refreshed");
        Ok(targets)
    }

    // =========================================================================
    // Target -> shards
    // =========================================================================

    /// Names of the SCVs holding enabled streams of a target.
    #[must_use]
    pub fn shards(&self, target: &TargetId) -> Vec<String> {
        self.shards
            .read()
            .get(target)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any SCV holds an enabled stream of the target.
    #[must_use]
    pub fn has_shards(&self, target: &TargetId) -> bool {
        self.shards.read().get(target).is_some_and(|set| !set.is_empty())
    }

    /// Record that an SCV holds an enabled stream of a target.
    pub fn add_shard(&self, target: TargetId, scv: &str) {
        self.shards
            .write()
            .entry(target)
            .or_default()
            .insert(scv.to_string());
    }

    /// Forget that an SCV holds streams of a target.
    pub fn remove_shard(&self, target: &TargetId, scv: &str) {
        let mut shards = self.shards.write();
        if let Some(set) = shards.get_mut(target) {
            set.remove(scv);
            if set.is_empty() {
                shards.remove(target);
            }
        }
    }

    // =========================================================================
    // SCV registry mirror
    // =========================================================================

    /// Insert or replace an SCV, keeping its fail count.
    pub fn upsert_scv(&self, record: ScvRecord) {
        let mut scvs = self.scvs.write();
        let fail_count = scvs.get(&record.name).map_or(0, |slot| slot.fail_count);
        scvs.insert(record.name.clone(), ScvSlot { record, fail_count });
    }

    /// Registry row of an SCV.
    #[must_use]
    pub fn scv(&self, name: &str) -> Option<ScvRecord> {
        self.scvs.read().get(name).map(|slot| slot.record.clone())
    }

    /// Every known SCV.
    #[must_use]
    pub fn scvs(&self) -> Vec<ScvRecord> {
        self.scvs
            .read()
            .values()
            .map(|slot| slot.record.clone())
            .collect()
    }

    /// Count a failed request. Returns the new count, or `None` for an
    /// unknown SCV.
    pub fn record_failure(&self, name: &str) -> Option<u32> {
        let mut scvs = self.scvs.write();
        let slot = scvs.get_mut(name)?;
        slot.fail_count = slot.fail_count.saturating_add(1);
        if slot.fail_count == self.max_fails {
            tracing::warn!(scv = %name, fail_count = slot.fail_count, "SCV marked offline");
        }
        Some(slot.fail_count)
    }

    /// Reset the fail count after a successful request.
    pub fn record_success(&self, name: &str) {
        if let Some(slot) = self.scvs.write().get_mut(name) {
            if slot.fail_count >= self.max_fails {
                tracing::info!(scv = %name, "SCV back online");
            }
            slot.fail_count = 0;
        }
    }

    /// Consecutive failures of an SCV.
    #[must_use]
    pub fn fail_count(&self, name: &str) -> Option<u32> {
        self.scvs.read().get(name).map(|slot| slot.fail_count)
    }

    /// Whether an SCV is known and below the failure threshold.
    #[must_use]
    pub fn is_online(&self, name: &str) -> bool {
        self.fail_count(name).is_some_and(|n| n < self.max_fails)
    }

    /// Reachability of every known SCV.
    #[must_use]
    pub fn status(&self) -> BTreeMap<String, ScvStatus> {
        self.scvs
            .read()
            .iter()
            .map(|(name, slot)| {
                let status = ScvStatus {
                    host: slot.record.host.clone(),
                    online: slot.fail_count < self.max_fails,
                    fail_count: slot.fail_count,
                };
                (name.clone(), status)
            })
            .collect()
    }
}
