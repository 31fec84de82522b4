//! Ordered byte key/value backends.
//!
//! The entity store only needs point reads, ordered prefix scans and an atomic
//! multi-key write. [`MemoryKv`] keeps everything in a `BTreeMap` and is used
//! for caches that are rebuilt on startup; [`RocksKv`](crate::RocksKv) persists.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::error::Result;

/// A single mutation in an atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Insert or overwrite a key.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key if present.
    Delete(Vec<u8>),
}

impl KvOp {
    /// The key this operation touches.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put(key, _) | Self::Delete(key) => key,
        }
    }
}

/// An ordered byte key/value store.
pub trait Kv: Send + Sync {
    /// Read a single key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Return every pair whose key starts with `prefix`, in ascending key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply all operations atomically, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails; in that case nothing is applied.
    fn write(&self, ops: Vec<KvOp>) -> Result<()>;
}

/// In-memory [`Kv`] backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Kv for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut map = self.map.write();
        for op in ops {
            match op {
                KvOp::Put(key, value) => {
                    map.insert(key, value);
                }
                KvOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let kv = MemoryKv::new();
        kv.write(vec![
            KvOp::Put(b"a\0b".to_vec(), b"1".to_vec()),
            KvOp::Put(b"a\0a".to_vec(), b"2".to_vec()),
            KvOp::Put(b"b\0a".to_vec(), b"3".to_vec()),
        ])
        .unwrap();

        let found = kv.scan_prefix(b"a\0").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, b"a\0a");
        assert_eq!(found[1].0, b"a\0b");
    }

    #[test]
    fn delete_removes_key() {
        let kv = MemoryKv::new();
        kv.write(vec![KvOp::Put(b"k".to_vec(), b"v".to_vec())]).unwrap();
        kv.write(vec![KvOp::Delete(b"k".to_vec())]).unwrap();
        assert!(kv.get(b"k").unwrap().is_none());
        assert!(kv.is_empty());
    }
}
