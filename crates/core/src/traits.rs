//! Core traits for store abstraction
//!
//! This module defines the `KvStore` and `DurableStore` traits that let the
//! collection layer run over any ordered byte-keyed backend, and let the cache
//! store wrap any durable backend without the upper layers noticing.

use crate::batch::{BatchOp, WriteBatch};
use crate::error::IndexerResult;
use crate::range::{KeyRange, ScanOrder};

/// Ordered byte-keyed store
///
/// This is what collections read and write through. Implemented by the
/// durable backends and by the cache store that wraps them.
///
/// Thread safety: all methods take `&self`; implementations synchronize
/// internally (requires Send + Sync).
pub trait KvStore: Send + Sync {
    /// Get the value for `key`
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only if the underlying store fails.
    fn get(&self, key: &[u8]) -> IndexerResult<Option<Vec<u8>>>;

    /// Check whether `key` exists
    fn has(&self, key: &[u8]) -> IndexerResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Set `key` to `value`
    fn set(&self, key: &[u8], value: &[u8]) -> IndexerResult<()>;

    /// Remove `key`; removing a missing key is not an error
    fn delete(&self, key: &[u8]) -> IndexerResult<()>;

    /// Collect every entry in `range`, ordered by `order`
    ///
    /// `limit` caps the number of returned entries.
    fn scan(
        &self,
        range: &KeyRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Remove every key in `range` as one operation
    ///
    /// Returns the number of keys removed.
    fn delete_range(&self, range: &KeyRange) -> IndexerResult<usize>;

    /// Remove each of `keys` with the same durability as `delete_range`
    ///
    /// Stores that buffer writes apply these to their backend immediately
    /// instead of holding them for the next flush.
    fn delete_keys(&self, keys: &[Vec<u8>]) -> IndexerResult<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

/// A persistent backend that can apply a batch atomically
pub trait DurableStore: KvStore {
    /// Apply all operations of `batch` atomically
    ///
    /// Either every operation is durable after this returns `Ok`, or none is.
    fn write_batch(&self, batch: WriteBatch) -> IndexerResult<()>;

    /// Short backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Apply a batch through the single-key `KvStore` methods
///
/// Helper for backends whose atomicity comes from an outer lock.
pub fn apply_ops<S: KvStore + ?Sized>(store: &S, batch: WriteBatch) -> IndexerResult<()> {
    for op in batch.into_ops() {
        match op {
            BatchOp::Put { key, value } => store.set(&key, &value)?,
            BatchOp::Delete { key } => store.delete(&key)?,
        }
    }
    Ok(())
}
