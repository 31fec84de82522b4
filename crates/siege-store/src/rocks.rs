//! `RocksDB` backend for the entity store.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::kv::{Kv, KvOp};

/// Column family names.
pub mod cf {
    /// Existence markers.
    pub const ENTITIES: &str = "entities";
    /// Hash fields.
    pub const FIELDS: &str = "fields";
    /// Set members and sorted-set scores/order.
    pub const COLLECTIONS: &str = "collections";
    /// Unique and multi-valued lookups.
    pub const LOOKUPS: &str = "lookups";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::ENTITIES, cf::FIELDS, cf::COLLECTIONS, cf::LOOKUPS]
}

fn cf_for_key(key: &[u8]) -> Result<&'static str> {
    match key.first() {
        Some(&keys::TAG_EXISTS) => Ok(cf::ENTITIES),
        Some(&keys::TAG_HASH) => Ok(cf::FIELDS),
        Some(&(keys::TAG_SET | keys::TAG_ZSCORE | keys::TAG_ZORDER)) => Ok(cf::COLLECTIONS),
        Some(&(keys::TAG_UNIQUE | keys::TAG_MULTI)) => Ok(cf::LOOKUPS),
        _ => Err(StoreError::Database("key without a known tag".into())),
    }
}

/// RocksDB-backed [`Kv`].
pub struct RocksKv {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksKv {
    /// Open or create a database at the given path.
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
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }
}

impl Kv for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_for_key(key)?)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_for_key(prefix)?)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn write(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            let cf = self.cf(cf_for_key(op.key())?)?;
            match op {
                KvOp::Put(key, value) => batch.put_cf(&cf, key, value),
                KvOp::Delete(key) => batch.delete_cf(&cf, key),
            }
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_kv() -> (RocksKv, TempDir) {
        let dir = TempDir::new().unwrap();
        let kv = RocksKv::open(dir.path()).unwrap();
        (kv, dir)
    }

    #[test]
    fn routes_keys_by_tag() {
        let (kv, _dir) = create_test_kv();
        let exists = keys::exists_key("stream", "a");
        let field = keys::hash_key("stream", "a", "frames");
        kv.write(vec![
            KvOp::Put(exists.clone(), vec![]),
            KvOp::Put(field.clone(), vec![1, 2]),
        ])
        .unwrap();

        assert_eq!(kv.get(&exists).unwrap(), Some(vec![]));
        assert_eq!(kv.get(&field).unwrap(), Some(vec![1, 2]));
        assert_eq!(kv.scan_prefix(&keys::exists_prefix("stream")).unwrap().len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let key = keys::set_key("target", "t", "streams", "s1");
        {
            let kv = RocksKv::open(dir.path()).unwrap();
            kv.write(vec![KvOp::Put(key.clone(), vec![])]).unwrap();
        }
        let kv = RocksKv::open(dir.path()).unwrap();
        assert!(kv.get(&key).unwrap().is_some());
    }

    #[test]
    fn rejects_untagged_key() {
        let (kv, _dir) = create_test_kv();
        assert!(kv.get(b"xyz").is_err());
    }
}
