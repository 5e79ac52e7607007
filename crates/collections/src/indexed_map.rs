//! Map with secondary indexes kept in step with every write
//!
//! An [`IndexedMap`] owns a primary [`Map`] and a value implementing
//! [`Indexes`]. Every `set` and `remove` reads the old value first and hands
//! both versions to the indexes, so index entries never point at stale rows.

use std::fmt;
use std::ops::RangeBounds;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use ledgerview_core::{IndexerResult, KvStore, ScanOrder};

use crate::codec::KeyCodec;
use crate::keyset::KeySet;
use crate::map::Map;

/// Secondary indexes over an [`IndexedMap`]
pub trait Indexes<K, V>: Send + Sync {
    /// Called before the primary row is written
    fn on_set(&self, store: &dyn KvStore, pk: &K, old: Option<&V>, new: &V) -> IndexerResult<()>;

    /// Called before the primary row is removed
    fn on_remove(&self, store: &dyn KvStore, pk: &K, old: &V) -> IndexerResult<()>;
}

impl<K, V> Indexes<K, V> for () {
    fn on_set(&self, _: &dyn KvStore, _: &K, _: Option<&V>, _: &V) -> IndexerResult<()> {
        Ok(())
    }

    fn on_remove(&self, _: &dyn KvStore, _: &K, _: &V) -> IndexerResult<()> {
        Ok(())
    }
}

/// Non-unique index from `IK` (derived from the value) to primary keys
///
/// Stored as a key set of `(IK, PK)`, so looking up all primary keys for one
/// index key is a single prefix scan.
pub struct MultiIndex<IK, PK, V> {
    entries: KeySet<(IK, PK)>,
    extract: fn(&V) -> IK,
}

impl<IK, PK, V> Clone for MultiIndex<IK, PK, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            extract: self.extract,
        }
    }
}

impl<IK, PK, V> fmt::Debug for MultiIndex<IK, PK, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiIndex")
            .field("entries", &self.entries)
            .finish()
    }
}

impl<IK, PK, V> MultiIndex<IK, PK, V>
where
    IK: KeyCodec + PartialEq,
    PK: KeyCodec + Clone,
{
    pub(crate) fn new(entries: KeySet<(IK, PK)>, extract: fn(&V) -> IK) -> Self {
        Self { entries, extract }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        self.entries.name()
    }

    /// Primary keys filed under `index_key`
    pub fn primary_keys(
        &self,
        store: &dyn KvStore,
        index_key: &IK,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<PK>> {
        Ok(self
            .entries
            .iterate_prefix(store, index_key, order, limit)?
            .into_iter()
            .map(|(_, pk)| pk)
            .collect())
    }

    /// Move the entry for `pk` from the old value's index key to the new one
    pub fn update(
        &self,
        store: &dyn KvStore,
        pk: &PK,
        old: Option<&V>,
        new: &V,
    ) -> IndexerResult<()> {
        let new_key = (self.extract)(new);
        if let Some(old) = old {
            let old_key = (self.extract)(old);
            if old_key == new_key {
                return Ok(());
            }
            self.entries.remove(store, &(old_key, pk.clone()))?;
        }
        self.entries.insert(store, &(new_key, pk.clone()))
    }

    /// Drop the entry for `pk`
    pub fn remove(&self, store: &dyn KvStore, pk: &PK, old: &V) -> IndexerResult<()> {
        self.entries.remove(store, &((self.extract)(old), pk.clone()))
    }
}

/// Map with secondary indexes
pub struct IndexedMap<K, V, I> {
    primary: Map<K, V>,
    indexes: Arc<I>,
}

impl<K, V, I> Clone for IndexedMap<K, V, I> {
    fn clone(&self) -> Self {
        Self {
            primary: self.primary.clone(),
            indexes: Arc::clone(&self.indexes),
        }
    }
}

impl<K, V, I> fmt::Debug for IndexedMap<K, V, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedMap")
            .field("primary", &self.primary)
            .finish()
    }
}

impl<K, V, I> IndexedMap<K, V, I>
where
    K: KeyCodec,
    V: Serialize + DeserializeOwned,
    I: Indexes<K, V>,
{
    pub(crate) fn new(primary: Map<K, V>, indexes: I) -> Self {
        Self {
            primary,
            indexes: Arc::new(indexes),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        self.primary.name()
    }

    /// The index set
    pub fn indexes(&self) -> &I {
        &self.indexes
    }

    /// Read-only view of the primary map
    pub fn primary(&self) -> &Map<K, V> {
        &self.primary
    }

    /// Get the value for `pk`; `NotFound` if absent
    pub fn get(&self, store: &dyn KvStore, pk: &K) -> IndexerResult<V> {
        self.primary.get(store, pk)
    }

    /// Get the value for `pk`, `None` if absent
    pub fn may_get(&self, store: &dyn KvStore, pk: &K) -> IndexerResult<Option<V>> {
        self.primary.may_get(store, pk)
    }

    /// Check whether `pk` exists
    pub fn has(&self, store: &dyn KvStore, pk: &K) -> IndexerResult<bool> {
        self.primary.has(store, pk)
    }

    /// Insert or overwrite, updating every index
    pub fn set(&self, store: &dyn KvStore, pk: &K, value: &V) -> IndexerResult<()> {
        let old = self.primary.may_get(store, pk)?;
        self.indexes.on_set(store, pk, old.as_ref(), value)?;
        self.primary.set(store, pk, value)
    }

    /// Remove `pk` and its index entries
    ///
    /// Returns the removed value, if there was one.
    pub fn remove(&self, store: &dyn KvStore, pk: &K) -> IndexerResult<Option<V>> {
        let old = match self.primary.may_get(store, pk)? {
            Some(old) => old,
            None => return Ok(None),
        };
        self.indexes.on_remove(store, pk, &old)?;
        self.primary.remove(store, pk)?;
        Ok(Some(old))
    }

    /// Primary entries in `range`
    pub fn iterate<R>(
        &self,
        store: &dyn KvStore,
        range: R,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<(K, V)>>
    where
        R: RangeBounds<K>,
    {
        self.primary.iterate(store, range, order, limit)
    }
}
