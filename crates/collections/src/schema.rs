//! Schema builder and sealed schema
//!
//! Submodules register their collections on a shared [`SchemaBuilder`] while
//! the indexer is being assembled. Sealing freezes the set of collections;
//! every later registration fails, so the byte layout is fixed before any
//! block is indexed.
//!
//! ## Registration rules
//!
//! - Collection names are unique (qualified as `namespace/name`)
//! - No two prefixes overlap (neither is a byte-prefix of the other)
//! - Nothing can be registered after `seal()`; `seal()` succeeds only once

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use ledgerview_core::{IndexerError, IndexerResult};

use crate::codec::KeyCodec;
use crate::indexed_map::{IndexedMap, Indexes, MultiIndex};
use crate::item::Item;
use crate::keyset::KeySet;
use crate::map::Map;
use crate::prefix::Prefix;
use crate::sequence::Sequence;

/// Collection variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// `Map<K, V>`
    Map,
    /// `Sequence`
    Sequence,
    /// `KeySet<K>`
    KeySet,
    /// Primary map of an `IndexedMap<K, V, I>`
    IndexedMap,
    /// `MultiIndex<IK, PK, V>`
    MultiIndex,
    /// `Item<V>`
    Item,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectionKind::Map => "map",
            CollectionKind::Sequence => "sequence",
            CollectionKind::KeySet => "keyset",
            CollectionKind::IndexedMap => "indexed_map",
            CollectionKind::MultiIndex => "multi_index",
            CollectionKind::Item => "item",
        };
        f.write_str(s)
    }
}

/// One registered collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Qualified name, `namespace/name`
    pub name: String,
    /// Byte prefix
    pub prefix: Prefix,
    /// Variant
    pub kind: CollectionKind,
    /// Key type name, `None` for items and sequences
    pub key_type: Option<&'static str>,
}

/// Immutable set of registered collections
#[derive(Debug, Clone)]
pub struct Schema {
    collections: Arc<[CollectionInfo]>,
}

impl Schema {
    /// Every collection in registration order
    pub fn collections(&self) -> &[CollectionInfo] {
        &self.collections
    }

    /// Look up a collection by qualified name
    pub fn collection(&self, name: &str) -> Option<&CollectionInfo> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Collections owned by `namespace`
    pub fn namespace(&self, namespace: &str) -> impl Iterator<Item = &CollectionInfo> + '_ {
        let namespace = namespace.to_string();
        self.collections
            .iter()
            .filter(move |c| c.prefix.namespace() == namespace)
    }

    /// Number of collections
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// True if nothing was registered
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[derive(Default)]
struct BuilderState {
    sealed: bool,
    collections: Vec<CollectionInfo>,
}

/// Collects collection registrations until sealed
#[derive(Default)]
pub struct SchemaBuilder {
    state: Mutex<BuilderState>,
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SchemaBuilder")
            .field("sealed", &state.sealed)
            .field("collections", &state.collections.len())
            .finish()
    }
}

impl SchemaBuilder {
    /// Empty, unsealed builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seal()` has been called
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    fn register(
        &self,
        prefix: &Prefix,
        name: &str,
        kind: CollectionKind,
        key_type: Option<&'static str>,
    ) -> IndexerResult<String> {
        let qualified = format!("{}/{}", prefix.namespace(), name);
        let mut state = self.state.lock();
        if state.sealed {
            return Err(IndexerError::SchemaSealed(qualified));
        }
        for existing in &state.collections {
            if existing.name == qualified {
                return Err(IndexerError::DuplicateCollection(qualified));
            }
            if existing.prefix.overlaps(prefix) {
                return Err(IndexerError::PrefixConflict {
                    existing: existing.name.clone(),
                    new: qualified,
                });
            }
        }
        debug!(collection = %qualified, kind = %kind, "registered collection");
        state.collections.push(CollectionInfo {
            name: qualified.clone(),
            prefix: prefix.clone(),
            kind,
            key_type,
        });
        Ok(qualified)
    }

    /// Register a `Map<K, V>`
    pub fn add_map<K, V>(&self, prefix: Prefix, name: &str) -> IndexerResult<Map<K, V>>
    where
        K: KeyCodec,
        V: Serialize + DeserializeOwned,
    {
        let name = self.register(&prefix, name, CollectionKind::Map, Some(K::type_name()))?;
        Ok(Map::new(prefix, &name))
    }

    /// Register a `Sequence`
    pub fn add_sequence(&self, prefix: Prefix, name: &str) -> IndexerResult<Sequence> {
        let name = self.register(&prefix, name, CollectionKind::Sequence, None)?;
        Ok(Sequence::new(prefix, &name))
    }

    /// Register a `KeySet<K>`
    pub fn add_key_set<K: KeyCodec>(&self, prefix: Prefix, name: &str) -> IndexerResult<KeySet<K>> {
        let name = self.register(&prefix, name, CollectionKind::KeySet, Some(K::type_name()))?;
        Ok(KeySet::new(prefix, &name))
    }

    /// Register an `Item<V>`
    pub fn add_item<V>(&self, prefix: Prefix, name: &str) -> IndexerResult<Item<V>>
    where
        V: Serialize + DeserializeOwned,
    {
        let name = self.register(&prefix, name, CollectionKind::Item, None)?;
        Ok(Item::new(prefix, &name))
    }

    /// Register a `MultiIndex` for use inside an `IndexedMap`'s index set
    pub fn add_multi_index<IK, PK, V>(
        &self,
        prefix: Prefix,
        name: &str,
        extract: fn(&V) -> IK,
    ) -> IndexerResult<MultiIndex<IK, PK, V>>
    where
        IK: KeyCodec + PartialEq,
        PK: KeyCodec + Clone,
    {
        let name = self.register(
            &prefix,
            name,
            CollectionKind::MultiIndex,
            Some(<(IK, PK)>::type_name()),
        )?;
        Ok(MultiIndex::new(KeySet::new(prefix, &name), extract))
    }

    /// Register the primary map of an `IndexedMap<K, V, I>`
    ///
    /// The indexes are registered separately (see [`add_multi_index`]).
    ///
    /// [`add_multi_index`]: SchemaBuilder::add_multi_index
    pub fn add_indexed_map<K, V, I>(
        &self,
        prefix: Prefix,
        name: &str,
        indexes: I,
    ) -> IndexerResult<IndexedMap<K, V, I>>
    where
        K: KeyCodec,
        V: Serialize + DeserializeOwned,
        I: Indexes<K, V>,
    {
        let name = self.register(
            &prefix,
            name,
            CollectionKind::IndexedMap,
            Some(K::type_name()),
        )?;
        Ok(IndexedMap::new(Map::new(prefix, &name), indexes))
    }

    /// Freeze the registered collections
    ///
    /// # Errors
    ///
    /// `IndexerError::AlreadySealed` on the second call.
    pub fn seal(&self) -> IndexerResult<Schema> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(IndexerError::AlreadySealed("schema".to_string()));
        }
        state.sealed = true;
        debug!(collections = state.collections.len(), "schema sealed");
        Ok(Schema {
            collections: Arc::from(state.collections.clone()),
        })
    }
}
