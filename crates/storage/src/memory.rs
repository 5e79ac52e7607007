//! MemoryStore: ordered in-memory backend
//!
//! This module implements the durable-store traits using:
//! - `BTreeMap<Vec<u8>, Vec<u8>>` for ordered key storage
//! - `parking_lot::RwLock` for thread-safe access
//!
//! # Design Notes
//!
//! - **Not persistent**: data lives as long as the store. Used for tests and
//!   for nodes that rebuild their index from scratch on every start.
//! - **Batch atomicity**: `write_batch` holds the write lock for the whole
//!   batch, so no reader can observe a partially applied batch.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use ledgerview_core::{
    BatchOp, DurableStore, IndexerResult, KeyRange, KvStore, ScanOrder, WriteBatch,
};

/// In-memory ordered store
///
/// Cloning is cheap and shares the same underlying map, which is how tests
/// model "a fresh cache over the same durable store".
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

fn bounds(range: &KeyRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lower = match &range.start {
        Some(s) => Bound::Included(s.clone()),
        None => Bound::Unbounded,
    };
    let upper = match &range.end {
        Some(e) => Bound::Excluded(e.clone()),
        None => Bound::Unbounded,
    };
    (lower, upper)
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> IndexerResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> IndexerResult<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> IndexerResult<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> IndexerResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan(
        &self,
        range: &KeyRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.data.read();
        let iter = data.range(bounds(range));
        let limit = limit.unwrap_or(usize::MAX);
        let out = match order {
            ScanOrder::Forward => iter
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ScanOrder::Reverse => iter
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(out)
    }

    fn delete_range(&self, range: &KeyRange) -> IndexerResult<usize> {
        if range.is_empty() {
            return Ok(0);
        }
        let mut data = self.data.write();
        let doomed: Vec<Vec<u8>> = data.range(bounds(range)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            data.remove(key);
        }
        Ok(doomed.len())
    }
}

impl DurableStore for MemoryStore {
    fn write_batch(&self, batch: WriteBatch) -> IndexerResult<()> {
        // Acquire the lock ONCE for the entire batch
        let mut data = self.data.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for k in [b"a", b"b", b"c", b"d"] {
            store.set(k, k).unwrap();
        }
        store
    }

    #[test]
    fn test_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get(b"k").unwrap(), None);
        store.set(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(store.has(b"k").unwrap());
        store.delete(b"k").unwrap();
        assert!(!store.has(b"k").unwrap());
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let store = MemoryStore::new();
        assert!(store.delete(b"missing").is_ok());
    }

    #[test]
    fn test_scan_forward_and_reverse() {
        let store = seeded();
        let range = KeyRange::new(Some(b"b".to_vec()), Some(b"d".to_vec()));

        let fwd = store.scan(&range, ScanOrder::Forward, None).unwrap();
        let keys: Vec<_> = fwd.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);

        let rev = store.scan(&range, ScanOrder::Reverse, None).unwrap();
        let keys: Vec<_> = rev.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_scan_limit() {
        let store = seeded();
        let out = store.scan(&KeyRange::all(), ScanOrder::Reverse, Some(1)).unwrap();
        assert_eq!(out, vec![(b"d".to_vec(), b"d".to_vec())]);
    }

    #[test]
    fn test_delete_range() {
        let store = seeded();
        let removed = store
            .delete_range(&KeyRange::new(Some(b"b".to_vec()), Some(b"d".to_vec())))
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.has(b"a").unwrap());
        assert!(!store.has(b"b").unwrap());
        assert!(!store.has(b"c").unwrap());
        assert!(store.has(b"d").unwrap());
    }

    #[test]
    fn test_write_batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.delete(b"k".to_vec());
        batch.put(b"j".to_vec(), b"2".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"k").unwrap(), None);
        assert_eq!(store.get(b"j").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_clone_shares_data() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set(b"shared", b"yes").unwrap();
        assert_eq!(other.get(b"shared").unwrap(), Some(b"yes".to_vec()));
    }
}
