//! Submodule trait and hook context
//!
//! A submodule is one independent indexing unit. It registers its collections
//! on the schema builder when constructed, keeps the handles as fields, and
//! receives the block lifecycle through the hooks below.
//!
//! Hooks take `&self`: the pipeline holds submodules as `Arc<dyn Submodule>`
//! and the pruner calls `prune` from its own thread. State carried from
//! `finalize_block` to `commit` lives behind interior mutability.

use std::fmt;

use serde::de::DeserializeOwned;

use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, Height, IndexerError, IndexerResult, KvChange,
    KvStore,
};

/// What a hook can see: the shared store, the height, and its own config block
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    store: &'a dyn KvStore,
    height: Height,
    config: &'a toml::Table,
}

impl<'a> HookContext<'a> {
    /// Context for one hook call
    pub fn new(store: &'a dyn KvStore, height: Height, config: &'a toml::Table) -> Self {
        Self {
            store,
            height,
            config,
        }
    }

    /// The shared cache store
    pub fn store(&self) -> &'a dyn KvStore {
        self.store
    }

    /// Height being processed; 0 during setup hooks
    pub fn height(&self) -> Height {
        self.height
    }

    /// The submodule's `[submodules.<name>]` block
    pub fn config(&self) -> &'a toml::Table {
        self.config
    }

    /// Typed value from the submodule's config block, `None` if absent
    pub fn config_value<T: DeserializeOwned>(&self, key: &str) -> IndexerResult<Option<T>> {
        match self.config.get(key) {
            Some(value) => value.clone().try_into().map(Some).map_err(|e| {
                IndexerError::config(format!("invalid value for '{}': {}", key, e))
            }),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("height", &self.height)
            .field("config", &self.config)
            .finish()
    }
}

/// One pluggable indexing unit
pub trait Submodule: Send + Sync {
    /// Unique name; also the namespace of the submodule's collection prefixes
    fn name(&self) -> &str;

    /// Data version, used to gate one-shot migrations
    fn version(&self) -> &str;

    /// Read configuration and check preconditions; runs once after seal
    fn prepare(&self, _ctx: &HookContext<'_>) -> IndexerResult<()> {
        Ok(())
    }

    /// Bring stored data up to date (migrations); runs once after `prepare`
    fn initialize(&self, _ctx: &HookContext<'_>) -> IndexerResult<()> {
        Ok(())
    }

    /// Derive and stage index rows for a block
    ///
    /// Nothing written here is durable until the following `commit` flush.
    fn finalize_block(
        &self,
        ctx: &HookContext<'_>,
        req: &BlockRequest,
        res: &BlockResponse,
    ) -> IndexerResult<()>;

    /// Write index rows for the block just finalized
    fn commit(
        &self,
        ctx: &HookContext<'_>,
        res: &CommitResponse,
        changes: &[KvChange],
    ) -> IndexerResult<()>;

    /// Retire index data for heights `<= min_height`
    fn prune(&self, _ctx: &HookContext<'_>, _min_height: Height) -> IndexerResult<()> {
        Ok(())
    }
}
