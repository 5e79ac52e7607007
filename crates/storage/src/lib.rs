//! Storage layer for ledgerview
//!
//! This crate implements the durable backends and the cache in front of them:
//! - MemoryStore: BTreeMap-based store with RwLock
//! - RedbStore: persistent single-table redb store
//! - CacheStore: bounded write-behind cache flushed once per block
//! - open_backend: engine selection from the `[backend]` config block

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cache;
pub mod memory;
pub mod redb_store;

pub use backend::{open_backend, BackendConfig, BackendKind, DEFAULT_BLOCK_CACHE_BYTES};
pub use cache::{CacheStats, CacheStore, CachedValue, DEFAULT_CACHE_CAPACITY};
pub use memory::MemoryStore;
pub use redb_store::RedbStore;
