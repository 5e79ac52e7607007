//! Backend selection
//!
//! Maps the `[backend]` configuration block onto a concrete durable store.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use ledgerview_core::{DurableStore, IndexerError, IndexerResult};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::memory::MemoryStore;
use crate::redb_store::RedbStore;

/// Default redb page cache (64 MiB)
pub const DEFAULT_BLOCK_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Durable engine kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-memory `BTreeMap`, lost on restart
    Memory,
    /// redb file on disk
    Redb,
}

impl FromStr for BackendKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "memdb" => Ok(BackendKind::Memory),
            "redb" => Ok(BackendKind::Redb),
            other => Err(IndexerError::config(format!(
                "unknown backend engine '{}'. Expected \"redb\" or \"memory\".",
                other
            ))),
        }
    }
}

/// `[backend]` configuration block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Engine name: `"redb"` or `"memory"`
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Database file, relative to the data directory
    #[serde(default = "default_path")]
    pub path: String,
    /// Clean entries kept by the cache store
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// redb page cache size in bytes
    #[serde(default = "default_block_cache_bytes")]
    pub block_cache_bytes: usize,
}

fn default_engine() -> String {
    "redb".to_string()
}

fn default_path() -> String {
    "indexer.redb".to_string()
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_block_cache_bytes() -> usize {
    DEFAULT_BLOCK_CACHE_BYTES
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            path: default_path(),
            cache_capacity: default_cache_capacity(),
            block_cache_bytes: default_block_cache_bytes(),
        }
    }
}

impl BackendConfig {
    /// In-memory backend, handy for tests
    pub fn memory() -> Self {
        Self {
            engine: "memory".to_string(),
            ..Default::default()
        }
    }

    /// Parse the engine name
    pub fn kind(&self) -> IndexerResult<BackendKind> {
        self.engine.parse()
    }

    /// Check the block for values that cannot work
    pub fn validate(&self) -> IndexerResult<()> {
        self.kind()?;
        if self.cache_capacity == 0 {
            return Err(IndexerError::config("backend.cache_capacity must be > 0"));
        }
        if self.path.trim().is_empty() {
            return Err(IndexerError::config("backend.path must not be empty"));
        }
        Ok(())
    }
}

/// Open the durable store described by `config`
///
/// Relative paths resolve against `data_dir`.
pub fn open_backend(config: &BackendConfig, data_dir: &Path) -> IndexerResult<Arc<dyn DurableStore>> {
    config.validate()?;
    match config.kind()? {
        BackendKind::Memory => {
            info!("opening in-memory index store");
            Ok(Arc::new(MemoryStore::new()))
        }
        BackendKind::Redb => {
            let path = data_dir.join(&config.path);
            info!(path = %path.display(), "opening redb index store");
            Ok(Arc::new(RedbStore::open(path, config.block_cache_bytes)?))
        }
    }
}
