//! Set of keys with no values

use std::fmt;
use std::marker::PhantomData;
use std::ops::RangeBounds;
use std::sync::Arc;

use ledgerview_core::{IndexerError, IndexerResult, KvStore, ScanOrder};

use crate::codec::KeyCodec;
use crate::prefix::Prefix;
use crate::range::{key_range, sub_prefix_range};

/// Set of `K` stored as keys with empty values
pub struct KeySet<K> {
    prefix: Prefix,
    name: Arc<str>,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Clone for KeySet<K> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<K> fmt::Debug for KeySet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<K: KeyCodec> KeySet<K> {
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

    /// Add `key`
    pub fn insert(&self, store: &dyn KvStore, key: &K) -> IndexerResult<()> {
        store.set(&self.prefix.join(&key.to_key_bytes()), &[])
    }

    /// Remove `key`
    pub fn remove(&self, store: &dyn KvStore, key: &K) -> IndexerResult<()> {
        store.delete(&self.prefix.join(&key.to_key_bytes()))
    }

    /// Membership test
    pub fn contains(&self, store: &dyn KvStore, key: &K) -> IndexerResult<bool> {
        store.has(&self.prefix.join(&key.to_key_bytes()))
    }

    /// Members in `range`
    pub fn iterate<R>(
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
        self.decode_keys(rows)
    }

    /// Remove every member in `range`
    pub fn clear<R>(&self, store: &dyn KvStore, range: R) -> IndexerResult<usize>
    where
        R: RangeBounds<K>,
    {
        store.delete_range(&key_range(&self.prefix, &range))
    }

    fn decode_keys(&self, rows: Vec<(Vec<u8>, Vec<u8>)>) -> IndexerResult<Vec<K>> {
        rows.iter()
            .map(|(raw, _)| {
                let suffix = self.prefix.strip(raw).ok_or_else(|| {
                    IndexerError::codec(format!("{}: key outside collection prefix", self.name))
                })?;
                K::decode_key(suffix)
            })
            .collect()
    }
}

impl<A: KeyCodec, B: KeyCodec> KeySet<(A, B)> {
    /// Members whose first component equals `head`
    pub fn iterate_prefix(
        &self,
        store: &dyn KvStore,
        head: &A,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<(A, B)>> {
        let mut buf = Vec::new();
        head.encode_non_terminal(&mut buf);
        let rows = store.scan(&sub_prefix_range(&self.prefix, &buf), order, limit)?;
        self.decode_keys(rows)
    }
}
