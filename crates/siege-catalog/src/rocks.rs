//! `RocksDB` implementation of the catalog.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use siege_core::{StreamId, TargetId};

use crate::error::{CatalogError, Result};
use crate::schema::{all_column_families, cf, compound_key, compound_prefix};
use crate::types::{Donor, EngineKey, Fragment, Manager, ScvRecord, StreamEntry, Target};
use crate::{Catalog, ShardCatalog};

/// RocksDB-backed catalog.
///
/// Read-modify-write operations (shard sets, token rotation) are serialized
/// by an internal mutex so concurrent SCV calls never lose an update.
pub struct RocksCatalog {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksCatalog {
    /// Open or create a catalog database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CatalogError::Database(format!("column family not found: {name}")))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| CatalogError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| CatalogError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| CatalogError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| CatalogError::Database(e.to_string()))
    }

    fn put<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let data = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, data)
            .map_err(|e| CatalogError::Database(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| CatalogError::Database(e.to_string()))
    }

    /// Every `(key, value)` pair of a column family whose key starts with `prefix`.
    fn scan(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, Direction::Forward)
        };
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item.map_err(|e| CatalogError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn scan_values<T: serde::de::DeserializeOwned>(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<T>> {
        self.scan(cf_name, prefix)?
            .iter()
            .map(|(_, v)| Self::deserialize(v))
            .collect()
    }

    /// Apply `update` to a target under the write lock.
    fn modify_target(&self, id: &TargetId, update: impl FnOnce(&mut Target)) -> Result<()> {
        let _guard = self.write_lock.lock();
        let key = id.to_string();
        let mut target: Target = self
            .get(cf::TARGETS, key.as_bytes())?
            .ok_or_else(|| CatalogError::NotFound(format!("target {id}")))?;
        update(&mut target);
        self.put(cf::TARGETS, key.as_bytes(), &target)
    }

    /// Swap the token index entry of one account.
    fn reindex_token(
        batch: &mut WriteBatch,
        cf_index: &Arc<BoundColumnFamily<'_>>,
        old: Option<&str>,
        new: Option<&str>,
        owner: &str,
    ) {
        if old == new {
            return;
        }
        if let Some(old) = old {
            batch.delete_cf(cf_index, old.as_bytes());
        }
        if let Some(new) = new {
            batch.put_cf(cf_index, new.as_bytes(), owner.as_bytes());
        }
    }
}

#[async_trait]
impl ShardCatalog for RocksCatalog {
    async fn register_scv(&self, scv: &ScvRecord) -> Result<()> {
        self.put(cf::SCVS, scv.name.as_bytes(), scv)?;
        tracing::info!(scv = %scv.name, host = %scv.host, "Registered SCV");
        Ok(())
    }

    async fn get_target(&self, id: &TargetId) -> Result<Option<Target>> {
        self.get(cf::TARGETS, id.to_string().as_bytes())
    }

    async fn manager_by_token(&self, token: &str) -> Result<Option<Manager>> {
        let Some(email) = self.get_raw(cf::MANAGERS_BY_TOKEN, token.as_bytes())? else {
            return Ok(None);
        };
        self.get(cf::MANAGERS, &email)
    }

    async fn add_target_shard(&self, id: &TargetId, scv: &str) -> Result<()> {
        self.modify_target(id, |target| {
            if !target.shards.iter().any(|s| s == scv) {
                target.shards.push(scv.to_string());
            }
        })
    }

    async fn remove_target_shard(&self, id: &TargetId, scv: &str) -> Result<()> {
        match self.modify_target(id, |target| target.shards.retain(|s| s != scv)) {
            Err(CatalogError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn upsert_stream_entry(&self, scv: &str, entry: &StreamEntry) -> Result<()> {
        let cf_streams = self.cf(cf::STREAMS)?;
        let cf_by_target = self.cf(cf::STREAMS_BY_TARGET)?;
        let stream = entry.stream_id.to_string();
        let target = entry.target_id.to_string();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_streams, compound_key(&[scv, &stream]), Self::serialize(entry)?);
        batch.put_cf(&cf_by_target, compound_key(&[&target, scv, &stream]), []);
        self.write(batch)
    }

    async fn delete_stream_entry(&self, scv: &str, stream_id: &StreamId) -> Result<()> {
        let stream = stream_id.to_string();
        let key = compound_key(&[scv, &stream]);
        let Some(entry) = self.get::<StreamEntry>(cf::STREAMS, &key)? else {
            return Ok(());
        };
        let cf_streams = self.cf(cf::STREAMS)?;
        let cf_by_target = self.cf(cf::STREAMS_BY_TARGET)?;
        let target = entry.target_id.to_string();

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_streams, key);
        batch.delete_cf(&cf_by_target, compound_key(&[&target, scv, &stream]));
        self.write(batch)
    }

    async fn insert_fragment(&self, fragment: &Fragment) -> Result<()> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let micros = (fragment.end_time.max(0.0) * 1e6) as u64;
        let key = format!("{micros:020}-{}", uuid::Uuid::new_v4());
        self.put(cf::FRAGMENTS, key.as_bytes(), fragment)
    }
}

#[async_trait]
impl Catalog for RocksCatalog {
    // =========================================================================
    // Managers
    // =========================================================================

    async fn insert_manager(&self, manager: &Manager) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.get_raw(cf::MANAGERS, manager.email.as_bytes())?.is_some() {
            return Err(CatalogError::Conflict(format!("manager {}", manager.email)));
        }
        let cf_managers = self.cf(cf::MANAGERS)?;
        let cf_tokens = self.cf(cf::MANAGERS_BY_TOKEN)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_managers, manager.email.as_bytes(), Self::serialize(manager)?);
        Self::reindex_token(&mut batch, &cf_tokens, None, manager.token.as_deref(), &manager.email);
        self.write(batch)
    }

    async fn get_manager(&self, email: &str) -> Result<Option<Manager>> {
        self.get(cf::MANAGERS, email.as_bytes())
    }

    async fn update_manager(&self, manager: &Manager) -> Result<()> {
        let _guard = self.write_lock.lock();
        let old: Manager = self
            .get(cf::MANAGERS, manager.email.as_bytes())?
            .ok_or_else(|| CatalogError::NotFound(format!("manager {}", manager.email)))?;
        let cf_managers = self.cf(cf::MANAGERS)?;
        let cf_tokens = self.cf(cf::MANAGERS_BY_TOKEN)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_managers, manager.email.as_bytes(), Self::serialize(manager)?);
        Self::reindex_token(
            &mut batch,
            &cf_tokens,
            old.token.as_deref(),
            manager.token.as_deref(),
            &manager.email,
        );
        self.write(batch)
    }

    async fn list_managers(&self) -> Result<Vec<Manager>> {
        self.scan_values(cf::MANAGERS, &[])
    }

    // =========================================================================
    // Donors
    // =========================================================================

    async fn insert_donor(&self, donor: &Donor) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.get_raw(cf::DONORS, donor.username.as_bytes())?.is_some() {
            return Err(CatalogError::Conflict(format!("donor {}", donor.username)));
        }
        let cf_donors = self.cf(cf::DONORS)?;
        let cf_tokens = self.cf(cf::DONORS_BY_TOKEN)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_donors, donor.username.as_bytes(), Self::serialize(donor)?);
        Self::reindex_token(&mut batch, &cf_tokens, None, donor.token.as_deref(), &donor.username);
        self.write(batch)
    }

    async fn get_donor(&self, username: &str) -> Result<Option<Donor>> {
        self.get(cf::DONORS, username.as_bytes())
    }

    async fn update_donor(&self, donor: &Donor) -> Result<()> {
        let _guard = self.write_lock.lock();
        let old: Donor = self
            .get(cf::DONORS, donor.username.as_bytes())?
            .ok_or_else(|| CatalogError::NotFound(format!("donor {}", donor.username)))?;
        let cf_donors = self.cf(cf::DONORS)?;
        let cf_tokens = self.cf(cf::DONORS_BY_TOKEN)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_donors, donor.username.as_bytes(), Self::serialize(donor)?);
        Self::reindex_token(
            &mut batch,
            &cf_tokens,
            old.token.as_deref(),
            donor.token.as_deref(),
            &donor.username,
        );
        self.write(batch)
    }

    async fn donor_by_token(&self, token: &str) -> Result<Option<Donor>> {
        let Some(username) = self.get_raw(cf::DONORS_BY_TOKEN, token.as_bytes())? else {
            return Ok(None);
        };
        self.get(cf::DONORS, &username)
    }

    // =========================================================================
    // Engine keys
    // =========================================================================

    async fn insert_engine_key(&self, key: &EngineKey) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.get_raw(cf::ENGINE_KEYS, key.id.as_bytes())?.is_some() {
            return Err(CatalogError::Conflict("engine key".into()));
        }
        self.put(cf::ENGINE_KEYS, key.id.as_bytes(), key)
    }

    async fn get_engine_key(&self, id: &str) -> Result<Option<EngineKey>> {
        self.get(cf::ENGINE_KEYS, id.as_bytes())
    }

    async fn list_engine_keys(&self) -> Result<Vec<EngineKey>> {
        self.scan_values(cf::ENGINE_KEYS, &[])
    }

    async fn delete_engine_key(&self, id: &str) -> Result<()> {
        if self.get_raw(cf::ENGINE_KEYS, id.as_bytes())?.is_none() {
            return Err(CatalogError::NotFound(format!("engine key {id}")));
        }
        let cf = self.cf(cf::ENGINE_KEYS)?;
        self.db
            .delete_cf(&cf, id.as_bytes())
            .map_err(|e| CatalogError::Database(e.to_string()))
    }

    // =========================================================================
    // Targets
    // =========================================================================

    async fn insert_target(&self, target: &Target) -> Result<()> {
        let _guard = self.write_lock.lock();
        let id = target.id.to_string();
        if self.get_raw(cf::TARGETS, id.as_bytes())?.is_some() {
            return Err(CatalogError::Conflict(format!("target {id}")));
        }
        let cf_targets = self.cf(cf::TARGETS)?;
        let cf_by_owner = self.cf(cf::TARGETS_BY_OWNER)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_targets, id.as_bytes(), Self::serialize(target)?);
        batch.put_cf(&cf_by_owner, compound_key(&[&target.owner, &id]), []);
        self.write(batch)
    }

    async fn update_target(&self, target: &Target) -> Result<()> {
        let _guard = self.write_lock.lock();
        let id = target.id.to_string();
        let old: Target = self
            .get(cf::TARGETS, id.as_bytes())?
            .ok_or_else(|| CatalogError::NotFound(format!("target {id}")))?;
        let cf_targets = self.cf(cf::TARGETS)?;
        let cf_by_owner = self.cf(cf::TARGETS_BY_OWNER)?;
        // The shard set belongs to SCVs; keep the stored one.
        let mut record = target.clone();
        record.shards = old.shards;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_targets, id.as_bytes(), Self::serialize(&record)?);
        if old.owner != target.owner {
            batch.delete_cf(&cf_by_owner, compound_key(&[&old.owner, &id]));
            batch.put_cf(&cf_by_owner, compound_key(&[&target.owner, &id]), []);
        }
        self.write(batch)
    }

    async fn delete_target(&self, id: &TargetId) -> Result<()> {
        let _guard = self.write_lock.lock();
        let key = id.to_string();
        let old: Target = self
            .get(cf::TARGETS, key.as_bytes())?
            .ok_or_else(|| CatalogError::NotFound(format!("target {id}")))?;
        let cf_targets = self.cf(cf::TARGETS)?;
        let cf_by_owner = self.cf(cf::TARGETS_BY_OWNER)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_targets, key.as_bytes());
        batch.delete_cf(&cf_by_owner, compound_key(&[&old.owner, &key]));
        self.write(batch)
    }

    async fn list_targets(&self, owner: Option<&str>) -> Result<Vec<Target>> {
        let Some(owner) = owner else {
            return self.scan_values(cf::TARGETS, &[]);
        };
        let prefix = compound_prefix(&[owner]);
        let mut targets = Vec::new();
        for (key, _) in self.scan(cf::TARGETS_BY_OWNER, &prefix)? {
            if let Some(target) = self.get::<Target>(cf::TARGETS, &key[prefix.len()..])? {
                targets.push(target);
            }
        }
        Ok(targets)
    }

    // =========================================================================
    // SCVs, stream index, stats
    // =========================================================================

    async fn get_scv(&self, name: &str) -> Result<Option<ScvRecord>> {
        self.get(cf::SCVS, name.as_bytes())
    }

    async fn list_scvs(&self) -> Result<Vec<ScvRecord>> {
        self.scan_values(cf::SCVS, &[])
    }

    async fn list_stream_entries(&self, scv: &str) -> Result<Vec<StreamEntry>> {
        self.scan_values(cf::STREAMS, &compound_prefix(&[scv]))
    }

    async fn target_stream_entries(&self, id: &TargetId) -> Result<Vec<(String, StreamEntry)>> {
        let target = id.to_string();
        let prefix = compound_prefix(&[&target]);
        let mut out = Vec::new();
        for (key, _) in self.scan(cf::STREAMS_BY_TARGET, &prefix)? {
            let rest = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            let Some((scv, stream)) = rest.split_once('\0') else {
                continue;
            };
            if let Some(entry) = self.get::<StreamEntry>(cf::STREAMS, &compound_key(&[scv, stream]))? {
                out.push((scv.to_string(), entry));
            }
        }
        Ok(out)
    }

    async fn list_fragments(&self) -> Result<Vec<Fragment>> {
        self.scan_values(cf::FRAGMENTS, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siege_core::{Role, Stage, StreamStatus};
    use tempfile::TempDir;

    fn create_test_catalog() -> (RocksCatalog, TempDir) {
        let dir = TempDir::new().unwrap();
        let catalog = RocksCatalog::open(dir.path()).unwrap();
        (catalog, dir)
    }

    fn manager(email: &str, token: &str) -> Manager {
        Manager {
            email: email.to_string(),
            password_hash: "blake3$00$00".to_string(),
            token: Some(token.to_string()),
            role: Role::Manager,
            weight: 1.0,
        }
    }

    fn target(owner: &str) -> Target {
        Target {
            id: TargetId::generate(),
            owner: owner.to_string(),
            creation_date: 0.0,
            engines: vec!["openmm".to_string()],
            stage: Stage::Public,
            options: crate::Options::new(),
            weight: 1.0,
            shards: Vec::new(),
        }
    }

    #[tokio::test]
    async fn manager_token_rotation() {
        let (catalog, _dir) = create_test_catalog();
        let mut m = manager("a@x.org", "tok1");
        catalog.insert_manager(&m).await.unwrap();
        assert!(matches!(
            catalog.insert_manager(&m).await,
            Err(CatalogError::Conflict(_))
        ));

        assert_eq!(catalog.manager_by_token("tok1").await.unwrap(), Some(m.clone()));

        m.token = Some("tok2".to_string());
        catalog.update_manager(&m).await.unwrap();
        assert!(catalog.manager_by_token("tok1").await.unwrap().is_none());
        assert_eq!(
            catalog.manager_by_token("tok2").await.unwrap().unwrap().email,
            "a@x.org"
        );
    }

    #[tokio::test]
    async fn target_shards_and_owner_index() {
        let (catalog, _dir) = create_test_catalog();
        let t1 = target("a@x.org");
        let t2 = target("b@x.org");
        catalog.insert_target(&t1).await.unwrap();
        catalog.insert_target(&t2).await.unwrap();

        catalog.add_target_shard(&t1.id, "scv-1").await.unwrap();
        catalog.add_target_shard(&t1.id, "scv-1").await.unwrap();
        catalog.add_target_shard(&t1.id, "scv-2").await.unwrap();
        let stored = catalog.get_target(&t1.id).await.unwrap().unwrap();
        assert_eq!(stored.shards, vec!["scv-1".to_string(), "scv-2".to_string()]);

        // Manager updates never overwrite the shard set.
        let mut edit = stored.clone();
        edit.shards.clear();
        edit.weight = 3.0;
        catalog.update_target(&edit).await.unwrap();
        let stored = catalog.get_target(&t1.id).await.unwrap().unwrap();
        assert_eq!(stored.shards.len(), 2);
        assert!((stored.weight - 3.0).abs() < f64::EPSILON);

        catalog.remove_target_shard(&t1.id, "scv-1").await.unwrap();
        let stored = catalog.get_target(&t1.id).await.unwrap().unwrap();
        assert_eq!(stored.shards, vec!["scv-2".to_string()]);

        assert_eq!(catalog.list_targets(Some("a@x.org")).await.unwrap().len(), 1);
        assert_eq!(catalog.list_targets(None).await.unwrap().len(), 2);

        catalog.delete_target(&t2.id).await.unwrap();
        assert!(catalog.list_targets(Some("b@x.org")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_shard_to_missing_target_fails() {
        let (catalog, _dir) = create_test_catalog();
        let result = catalog.add_target_shard(&TargetId::generate(), "scv").await;
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
        catalog
            .remove_target_shard(&TargetId::generate(), "scv")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stream_index_per_shard_and_target() {
        let (catalog, _dir) = create_test_catalog();
        let t = TargetId::generate();
        let s1 = StreamId::generate("scv-1");
        let s2 = StreamId::generate("scv-2");
        for (scv, s) in [("scv-1", &s1), ("scv-2", &s2)] {
            catalog
                .upsert_stream_entry(
                    scv,
                    &StreamEntry {
                        stream_id: s.clone(),
                        target_id: t,
                        status: StreamStatus::Ok,
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(catalog.list_stream_entries("scv-1").await.unwrap().len(), 1);
        assert_eq!(catalog.target_stream_entries(&t).await.unwrap().len(), 2);

        catalog.delete_stream_entry("scv-1", &s1).await.unwrap();
        let rows = catalog.target_stream_entries(&t).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "scv-2");
        assert_eq!(rows[0].1.stream_id, s2);
    }

    #[tokio::test]
    async fn engine_keys_and_fragments() {
        let (catalog, _dir) = create_test_catalog();
        let key = EngineKey {
            id: "k1".to_string(),
            engine: "openmm".to_string(),
            description: "test".to_string(),
            creation_date: 1.0,
        };
        catalog.insert_engine_key(&key).await.unwrap();
        assert_eq!(catalog.get_engine_key("k1").await.unwrap(), Some(key));
        assert_eq!(catalog.list_engine_keys().await.unwrap().len(), 1);
        catalog.delete_engine_key("k1").await.unwrap();
        assert!(matches!(
            catalog.delete_engine_key("k1").await,
            Err(CatalogError::NotFound(_))
        ));

        for end in [20.0, 10.0] {
            catalog
                .insert_fragment(&Fragment {
                    engine: "openmm".to_string(),
                    user: None,
                    start_time: 0.0,
                    end_time: end,
                    frames: 5,
                    stream: StreamId::generate("scv"),
                })
                .await
                .unwrap();
        }
        let fragments = catalog.list_fragments().await.unwrap();
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].end_time < fragments[1].end_time);
    }

    #[tokio::test]
    async fn target_options_roundtrip_through_cbor() {
        let (catalog, _dir) = create_test_catalog();
        let mut t = target("a@x.org");
        t.options.insert("steps_per_frame".into(), serde_json::json!(50_000));
        t.options.insert("title".into(), serde_json::json!("villin"));
        catalog.insert_target(&t).await.unwrap();
        let stored = catalog.get_target(&t.id).await.unwrap().unwrap();
        assert_eq!(stored.options, t.options);
    }
}
