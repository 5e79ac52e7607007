//! Write-behind cache over a durable store.
//!
//! The cache store absorbs a block's read/write traffic so submodules do not
//! pay a backend round trip per operation. Mutations are held as dirty
//! entries until `write()` flushes them as one batch at the commit boundary.
//!
//! # Entry states
//!
//! - **dirty**: written or deleted since the last flush. Held in an ordered
//!   map outside the LRU, so they are never evicted before they are durable.
//! - **clean**: read through from, or already flushed to, the durable store.
//!   Held in an LRU bounded by the configured capacity. Absent keys are cached
//!   too (negative cache).
//!
//! Reads consult dirty first, then clean, then the durable store. A delete is
//! a dirty tombstone, so a read after a delete returns `None` before any flush.
//!
//! # Concurrency
//!
//! All access goes through one mutex. The block thread is the main user; the
//! pruner shares the same handle and is serialized behind it.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, error};

use ledgerview_core::{
    DurableStore, IndexerResult, KeyRange, KvStore, ScanOrder, WriteBatch,
};

// ============================================================================
// Cached Values
// ============================================================================

/// Default number of clean entries kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Cached value - either present with data or confirmed absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CachedValue {
    /// Key exists with this value
    Present(Vec<u8>),
    /// Key confirmed to not exist
    Absent,
}

impl CachedValue {
    fn into_option(self) -> Option<Vec<u8>> {
        match self {
            CachedValue::Present(v) => Some(v),
            CachedValue::Absent => None,
        }
    }
}

impl From<Option<Vec<u8>>> for CachedValue {
    fn from(v: Option<Vec<u8>>) -> Self {
        match v {
            Some(v) => CachedValue::Present(v),
            None => CachedValue::Absent,
        }
    }
}

/// Cache counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from dirty or clean entries
    pub hits: u64,
    /// Reads that went to the durable store
    pub misses: u64,
    /// Number of successful flushes
    pub flushes: u64,
    /// Dirty entries currently pending
    pub dirty: usize,
    /// Clean entries currently cached
    pub cached: usize,
}

// ============================================================================
// CacheStore
// ============================================================================

struct CacheInner {
    clean: LruCache<Vec<u8>, CachedValue>,
    dirty: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    hits: u64,
    misses: u64,
    flushes: u64,
}

/// Bounded write-behind cache wrapping a durable store
pub struct CacheStore {
    durable: Arc<dyn DurableStore>,
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl CacheStore {
    /// Wrap `durable` with a cache holding at most `capacity` clean entries.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(durable: Arc<dyn DurableStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            durable,
            inner: Mutex::new(CacheInner {
                clean: LruCache::new(cap),
                dirty: BTreeMap::new(),
                hits: 0,
                misses: 0,
                flushes: 0,
            }),
            capacity,
        }
    }

    /// Wrap `durable` with the default capacity
    pub fn with_defaults(durable: Arc<dyn DurableStore>) -> Self {
        Self::new(durable, DEFAULT_CACHE_CAPACITY)
    }

    /// The wrapped durable store
    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    /// Maximum number of clean entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of unflushed entries
    pub fn dirty_len(&self) -> usize {
        self.inner.lock().dirty.len()
    }

    /// Counters snapshot
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            flushes: inner.flushes,
            dirty: inner.dirty.len(),
            cached: inner.clean.len(),
        }
    }

    // ========================================================================
    // Flush and Discard
    // ========================================================================

    /// Flush every dirty entry to the durable store as one batch.
    ///
    /// On success the flushed entries stay cached as clean entries. On failure
    /// nothing is marked clean and the error is returned; the dirty entries
    /// remain pending for the next attempt.
    pub fn write(&self) -> IndexerResult<usize> {
        let mut inner = self.inner.lock();
        if inner.dirty.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::with_capacity(inner.dirty.len());
        for (key, value) in inner.dirty.iter() {
            match value {
                Some(v) => batch.put(key.clone(), v.clone()),
                None => batch.delete(key.clone()),
            }
        }
        let count = batch.len();

        if let Err(e) = self.durable.write_batch(batch) {
            error!(
                backend = self.durable.backend_name(),
                entries = count,
                error = %e,
                "cache flush failed"
            );
            return Err(e);
        }

        let flushed = std::mem::take(&mut inner.dirty);
        for (key, value) in flushed {
            inner.clean.put(key, CachedValue::from(value));
        }
        inner.flushes += 1;
        debug!(entries = count, "flushed cache store");
        Ok(count)
    }

    /// Drop every unflushed entry without writing it.
    pub fn discard(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.dirty.len();
        inner.dirty.clear();
        n
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.durable.backend_name())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// KvStore Trait Implementation
// ============================================================================

impl KvStore for CacheStore {
    fn get(&self, key: &[u8]) -> IndexerResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.dirty.get(key).cloned() {
            inner.hits += 1;
            return Ok(value);
        }
        if let Some(value) = inner.clean.get(key).cloned() {
            inner.hits += 1;
            return Ok(value.into_option());
        }

        inner.misses += 1;
        let value = self.durable.get(key)?;
        inner
            .clean
            .put(key.to_vec(), CachedValue::from(value.clone()));
        Ok(value)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> IndexerResult<()> {
        let mut inner = self.inner.lock();
        inner.clean.pop(key);
        inner.dirty.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> IndexerResult<()> {
        let mut inner = self.inner.lock();
        inner.clean.pop(key);
        inner.dirty.insert(key.to_vec(), None);
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
        let inner = self.inner.lock();

        let overlay: Vec<(&Vec<u8>, &Option<Vec<u8>>)> = inner
            .dirty
            .iter()
            .filter(|(k, _)| range.contains(k))
            .collect();

        // Each tombstone can hide at most one durable row, so asking for
        // `limit + overlay` rows is enough to fill `limit` after merging.
        let durable_limit = limit.map(|l| l.saturating_add(overlay.len()));
        let durable_rows = self.durable.scan(range, order, durable_limit)?;

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = durable_rows.into_iter().collect();
        for (key, value) in overlay {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let limit = limit.unwrap_or(usize::MAX);
        let out = match order {
            ScanOrder::Forward => merged.into_iter().take(limit).collect(),
            ScanOrder::Reverse => merged.into_iter().rev().take(limit).collect(),
        };
        Ok(out)
    }

    fn delete_range(&self, range: &KeyRange) -> IndexerResult<usize> {
        if range.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let removed = self.durable.delete_range(range)?;

        let stale: Vec<Vec<u8>> = inner
            .clean
            .iter()
            .filter(|(k, _)| range.contains(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            inner.clean.pop(&key);
        }

        let mut tombstoned = 0;
        for (key, value) in inner.dirty.iter_mut() {
            if range.contains(key) && value.is_some() {
                *value = None;
                tombstoned += 1;
            }
        }
        Ok(removed + tombstoned)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> IndexerResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let mut batch = WriteBatch::with_capacity(keys.len());
        for key in keys {
            batch.delete(key.clone());
        }
        self.durable.write_batch(batch)?;

        for key in keys {
            inner.clean.pop(key);
            if let Some(value) = inner.dirty.get_mut(key) {
                *value = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use ledgerview_core::IndexerError;

    fn cache_over(mem: &MemoryStore, capacity: usize) -> CacheStore {
        CacheStore::new(Arc::new(mem.clone()), capacity)
    }

    /// Durable store whose batch writes always fail
    struct FailingStore {
        inner: MemoryStore,
    }

    impl KvStore for FailingStore {
        fn get(&self, key: &[u8]) -> IndexerResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&self, key: &[u8], value: &[u8]) -> IndexerResult<()> {
            self.inner.set(key, value)
        }
        fn delete(&self, key: &[u8]) -> IndexerResult<()> {
            self.inner.delete(key)
        }
        fn scan(
            &self,
            range: &KeyRange,
            order: ScanOrder,
            limit: Option<usize>,
        ) -> IndexerResult<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan(range, order, limit)
        }
        fn delete_range(&self, range: &KeyRange) -> IndexerResult<usize> {
            self.inner.delete_range(range)
        }
    }

    impl DurableStore for FailingStore {
        fn write_batch(&self, _batch: WriteBatch) -> IndexerResult<()> {
            Err(IndexerError::storage("disk on fire"))
        }
        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    // ========================================================================
    // Read and Flush Tests
    // ========================================================================

    #[test]
    fn test_read_your_write_before_flush() {
        let mem = MemoryStore::new();
        let cache = cache_over(&mem, 16);

        cache.set(b"k", b"v").unwrap();
        assert_eq!(cache.get(b"k").unwrap(), Some(b"v".to_vec()));
        // Durable store untouched
        assert_eq!(mem.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_delete_visible_before_flush() {
        let mem = MemoryStore::new();
        mem.set(b"k", b"old").unwrap();
        let cache = cache_over(&mem, 16);

        assert_eq!(cache.get(b"k").unwrap(), Some(b"old".to_vec()));
        cache.delete(b"k").unwrap();
        assert_eq!(cache.get(b"k").unwrap(), None);
        assert!(!cache.has(b"k").unwrap());
        assert_eq!(mem.get(b"k").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn test_flush_is_durable_for_fresh_cache() {
        let mem = MemoryStore::new();
        let cache = cache_over(&mem, 16);
        cache.set(b"k", b"v").unwrap();
        cache.delete(b"gone").unwrap();
        assert_eq!(cache.write().unwrap(), 2);
        assert_eq!(cache.dirty_len(), 0);

        let fresh = cache_over(&mem, 16);
        assert_eq!(fresh.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(fresh.get(b"gone").unwrap(), None);
    }

    #[test]
    fn test_write_with_nothing_dirty() {
        let mem = MemoryStore::new();
        let cache = cache_over(&mem, 16);
        assert_eq!(cache.write().unwrap(), 0);
        assert_eq!(cache.stats().flushes, 0);
    }

    #[test]
    fn test_dirty_entries_survive_capacity_pressure() {
        let mem = MemoryStore::new();
        let cache = cache_over(&mem, 2);

        for i in 0u8..50 {
            cache.set(&[i], &[i]).unwrap();
        }
        // Reads of other keys churn the clean LRU
        for i in 100u8..150 {
            cache.get(&[i]).unwrap();
        }
        assert_eq!(cache.dirty_len(), 50);
        assert!(cache.stats().cached <= 2);
        for i in 0u8..50 {
            assert_eq!(cache.get(&[i]).unwrap(), Some(vec![i]));
        }

        cache.write().unwrap();
        assert_eq!(mem.len(), 50);
    }

    #[test]
    fn test_negative_cache_hit() {
        let mem = MemoryStore::new();
        let cache = cache_over(&mem, 16);
        assert_eq!(cache.get(b"missing").unwrap(), None);
        assert_eq!(cache.get(b"missing").unwrap(), None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_flush_error_keeps_dirty_entries() {
        let durable = Arc::new(FailingStore {
            inner: MemoryStore::new(),
        });
        let cache = CacheStore::new(durable, 16);
        cache.set(b"k", b"v").unwrap();

        let err = cache.write().unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
        assert_eq!(cache.dirty_len(), 1);
        assert_eq!(cache.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    // ========================================================================
    // Scan and Range Delete Tests
    // ========================================================================

    #[test]
    fn test_scan_merges_dirty_overlay() {
        let mem = MemoryStore::new();
        mem.set(b"a", b"1").unwrap();
        mem.set(b"b", b"2").unwrap();
        mem.set(b"c", b"3").unwrap();
        let cache = cache_over(&mem, 16);

        cache.delete(b"b").unwrap();
        cache.set(b"bb", b"new").unwrap();
        cache.set(b"c", b"33").unwrap();

        let rows = cache.scan(&KeyRange::all(), ScanOrder::Forward, None).unwrap();
        assert_eq!(
            rows,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"bb".to_vec(), b"new".to_vec()),
                (b"c".to_vec(), b"33".to_vec()),
            ]
        );

        let rev = cache.scan(&KeyRange::all(), ScanOrder::Reverse, Some(2)).unwrap();
        assert_eq!(rev[0].0, b"c".to_vec());
        assert_eq!(rev[1].0, b"bb".to_vec());
    }

    #[test]
    fn test_scan_limit_with_tombstones() {
        let mem = MemoryStore::new();
        for i in 0u8..5 {
            mem.set(&[i], &[i]).unwrap();
        }
        let cache = cache_over(&mem, 16);
        cache.delete(&[0]).unwrap();
        cache.delete(&[1]).unwrap();

        let rows = cache.scan(&KeyRange::all(), ScanOrder::Forward, Some(2)).unwrap();
        assert_eq!(rows, vec![(vec![2], vec![2]), (vec![3], vec![3])]);
    }

    #[test]
    fn test_delete_range_hides_cached_and_dirty() {
        let mem = MemoryStore::new();
        mem.set(b"p1", b"x").unwrap();
        mem.set(b"p2", b"x").unwrap();
        mem.set(b"q1", b"x").unwrap();
        let cache = cache_over(&mem, 16);

        // Populate clean cache and one dirty entry in range
        cache.get(b"p1").unwrap();
        cache.set(b"p3", b"dirty").unwrap();

        let removed = cache.delete_range(&KeyRange::prefix(b"p")).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(cache.get(b"p1").unwrap(), None);
        assert_eq!(cache.get(b"p3").unwrap(), None);
        assert_eq!(cache.get(b"q1").unwrap(), Some(b"x".to_vec()));
        assert_eq!(mem.get(b"p2").unwrap(), None);
    }

    #[test]
    fn test_discard_drops_pending_writes() {
        let mem = MemoryStore::new();
        let cache = cache_over(&mem, 16);
        cache.set(b"k", b"v").unwrap();
        assert_eq!(cache.discard(), 1);
        assert_eq!(cache.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_delete_keys_is_durable_before_flush() {
        let mem = MemoryStore::new();
        mem.set(b"a", b"1").unwrap();
        mem.set(b"b", b"2").unwrap();
        let cache = cache_over(&mem, 16);
        cache.get(b"a").unwrap();
        cache.set(b"b", b"pending").unwrap();
        cache.set(b"c", b"other").unwrap();

        cache
            .delete_keys(&[b"a".to_vec(), b"b".to_vec()])
            .unwrap();
        assert_eq!(mem.get(b"a").unwrap(), None);
        assert_eq!(mem.get(b"b").unwrap(), None);
        assert_eq!(cache.get(b"a").unwrap(), None);
        assert_eq!(cache.get(b"b").unwrap(), None);

        // Dropping the rest of the block keeps the deletes
        cache.discard();
        assert_eq!(cache.get(b"a").unwrap(), None);
        assert_eq!(cache.get(b"b").unwrap(), None);
        assert_eq!(cache.get(b"c").unwrap(), None);
    }

    #[test]
    fn test_delete_keys_error_leaves_cache_untouched() {
        let failing = FailingStore {
            inner: MemoryStore::new(),
        };
        failing.inner.set(b"k", b"v").unwrap();
        let cache = CacheStore::new(Arc::new(failing), 16);
        cache.set(b"k", b"new").unwrap();

        assert!(cache.delete_keys(&[b"k".to_vec()]).is_err());
        assert_eq!(cache.get(b"k").unwrap(), Some(b"new".to_vec()));
    }
}
