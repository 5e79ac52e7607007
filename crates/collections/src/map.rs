//! Typed map collection

use std::fmt;
use std::marker::PhantomData;
use std::ops::RangeBounds;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use ledgerview_core::{IndexerError, IndexerResult, KvStore, ScanOrder};

use crate::codec::{decode_value, encode_value, KeyCodec};
use crate::prefix::Prefix;
use crate::range::{key_range, sub_prefix_range};

/// Map from `K` to `V` stored under one prefix
///
/// Handles are cheap to clone and hold no data; every operation goes through
/// the store passed in.
pub struct Map<K, V> {
    prefix: Prefix,
    name: Arc<str>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for Map<K, V> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for Map<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<K, V> Map<K, V>
where
    K: KeyCodec,
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(prefix: Prefix, name: &str) -> Self {
        Self {
            prefix,
            name: Arc::from(name),
            _marker: PhantomData,
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection prefix
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    fn raw_key(&self, key: &K) -> Vec<u8> {
        self.prefix.join(&key.to_key_bytes())
    }

    /// Get the value for `key`
    ///
    /// # Errors
    ///
    /// `IndexerError::NotFound` if the key is absent.
    pub fn get(&self, store: &dyn KvStore, key: &K) -> IndexerResult<V> {
        self.may_get(store, key)?
            .ok_or_else(|| IndexerError::not_found(format!("{}: no such key", self.name)))
    }

    /// Get the value for `key`, `None` if absent
    pub fn may_get(&self, store: &dyn KvStore, key: &K) -> IndexerResult<Option<V>> {
        match store.get(&self.raw_key(key))? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether `key` exists
    pub fn has(&self, store: &dyn KvStore, key: &K) -> IndexerResult<bool> {
        store.has(&self.raw_key(key))
    }

    /// Insert or overwrite
    pub fn set(&self, store: &dyn KvStore, key: &K, value: &V) -> IndexerResult<()> {
        store.set(&self.raw_key(key), &encode_value(value)?)
    }

    /// Remove `key`; removing a missing key is not an error
    pub fn remove(&self, store: &dyn KvStore, key: &K) -> IndexerResult<()> {
        store.delete(&self.raw_key(key))
    }

    /// Remove each of `keys` as one store operation
    ///
    /// Goes through `KvStore::delete_keys`, so the removal is as durable as
    /// `clear` when the store buffers writes.
    pub fn remove_keys(&self, store: &dyn KvStore, keys: &[K]) -> IndexerResult<()> {
        let raw: Vec<Vec<u8>> = keys.iter().map(|k| self.raw_key(k)).collect();
        store.delete_keys(&raw)
    }

    /// Read-modify-write of one entry
    ///
    /// `f` receives the current value (if any) and returns the value to store.
    pub fn update<F>(&self, store: &dyn KvStore, key: &K, f: F) -> IndexerResult<V>
    where
        F: FnOnce(Option<V>) -> IndexerResult<V>,
    {
        let new = f(self.may_get(store, key)?)?;
        self.set(store, key, &new)?;
        Ok(new)
    }

    /// Entries whose keys fall in `range`
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
        let rows = store.scan(&key_range(&self.prefix, &range), order, limit)?;
        self.decode_rows(rows)
    }

    /// Keys in `range`
    pub fn keys<R>(
        &self,
        store: &dyn KvStore,
        range: R,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<K>>
    where
        R: RangeBounds<K>,
    {
        let rows = store.scan(&key_range(&self.prefix, &range), order, limit)?;
        rows.iter().map(|(k, _)| self.decode_key(k)).collect()
    }

    /// Remove every entry in `range` with one range delete
    ///
    /// Returns the number of entries removed.
    pub fn clear<R>(&self, store: &dyn KvStore, range: R) -> IndexerResult<usize>
    where
        R: RangeBounds<K>,
    {
        store.delete_range(&key_range(&self.prefix, &range))
    }

    fn decode_key(&self, raw: &[u8]) -> IndexerResult<K> {
        let suffix = self.prefix.strip(raw).ok_or_else(|| {
            IndexerError::codec(format!("{}: key outside collection prefix", self.name))
        })?;
        K::decode_key(suffix)
    }

    fn decode_rows(&self, rows: Vec<(Vec<u8>, Vec<u8>)>) -> IndexerResult<Vec<(K, V)>> {
        rows.into_iter()
            .map(|(k, v)| Ok((self.decode_key(&k)?, decode_value(&v)?)))
            .collect()
    }
}

impl<A, B, V> Map<(A, B), V>
where
    A: KeyCodec,
    B: KeyCodec,
    V: Serialize + DeserializeOwned,
{
    /// Entries whose first key component equals `head`
    pub fn iterate_prefix(
        &self,
        store: &dyn KvStore,
        head: &A,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<((A, B), V)>> {
        let mut buf = Vec::new();
        head.encode_non_terminal(&mut buf);
        let rows = store.scan(&sub_prefix_range(&self.prefix, &buf), order, limit)?;
        self.decode_rows(rows)
    }

    /// Remove every entry whose first key component equals `head`
    pub fn clear_prefix(&self, store: &dyn KvStore, head: &A) -> IndexerResult<usize> {
        let mut buf = Vec::new();
        head.encode_non_terminal(&mut buf);
        store.delete_range(&sub_prefix_range(&self.prefix, &buf))
    }
}
