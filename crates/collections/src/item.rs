//! Single-value collection

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use ledgerview_core::{IndexerError, IndexerResult, KvStore};

use crate::codec::{decode_value, encode_value};
use crate::prefix::Prefix;

/// One value stored directly under its prefix
pub struct Item<V> {
    prefix: Prefix,
    name: Arc<str>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for Item<V> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<V> fmt::Debug for Item<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<V: Serialize + DeserializeOwned> Item<V> {
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

    /// Stored value
    ///
    /// # Errors
    ///
    /// `IndexerError::NotFound` if never set.
    pub fn get(&self, store: &dyn KvStore) -> IndexerResult<V> {
        self.may_get(store)?
            .ok_or_else(|| IndexerError::not_found(format!("{}: not set", self.name)))
    }

    /// Stored value, `None` if never set
    pub fn may_get(&self, store: &dyn KvStore) -> IndexerResult<Option<V>> {
        match store.get(self.prefix.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a value is stored
    pub fn exists(&self, store: &dyn KvStore) -> IndexerResult<bool> {
        store.has(self.prefix.as_bytes())
    }

    /// Store `value`
    pub fn set(&self, store: &dyn KvStore, value: &V) -> IndexerResult<()> {
        store.set(self.prefix.as_bytes(), &encode_value(value)?)
    }

    /// Clear the stored value
    pub fn remove(&self, store: &dyn KvStore) -> IndexerResult<()> {
        store.delete(self.prefix.as_bytes())
    }
}
