//! ledgerview - secondary indexing for block-based state machines
//!
//! ledgerview sits next to a consensus host, receives each finalized block,
//! and maintains derived indexes (blocks by height, transactions by account,
//! NFT ownership, asset pairings) in its own key-value store.
//!
//! # Quick Start
//!
//! ```ignore
//! use ledgerview::{start_default, BlockRequest, BlockResponse, CommitResponse};
//!
//! let (mut indexer, modules) = start_default("./data")?;
//! indexer.finalize_block(&req, &res)?;
//! indexer.commit(&CommitResponse::default(), &changes)?;
//!
//! let store = indexer.store()?;
//! let block = modules.block.block(store.as_ref(), req.height)?;
//! ```
//!
//! # Architecture
//!
//! Submodules register typed collections on a schema builder, the schema is
//! sealed, and every block flows through `finalize_block` and `commit` on
//! each enabled submodule. Writes land in a write-behind cache that is
//! flushed as one batch per block; a background pruner retires data older
//! than the retention window.

use std::path::Path;

use tracing::info;

pub use ledgerview_collections::{
    decode_value, encode_value, CollectionInfo, CollectionKind, IndexedMap, Indexes, Item,
    KeyCodec, KeySet, Map, MultiIndex, Prefix, Schema, SchemaBuilder, Sequence,
};
pub use ledgerview_core::{
    key_successor, prefix_end, BatchOp, BlockRequest, BlockResponse, CommitResponse, DurableStore,
    Event, EventAttribute, Height, IndexerError, IndexerResult, KeyRange, KvChange, KvStore,
    ScanOrder, TxResult, WriteBatch,
};
pub use ledgerview_engine::{
    init_logging, walk, walk_range, DataVersion, DispatchReport, HeightCheckpoints, HookContext,
    HookFailure, Indexer, IndexerConfig, LogFormat, LoggingConfig, MigrationGate,
    MigrationOutcome, OwnerCheckpoints, Phase, Pipeline, PipelineState, PruneStats, Pruner,
    PrunerStats, Submodule, SubmoduleEntry, CONFIG_FILE_NAME, ENABLED_KEY,
};
pub use ledgerview_indexers::{block, nft, pair, tx};
pub use ledgerview_indexers::{
    default_submodules, BlockSubmodule, DefaultSubmodules, IndexedBlock, IndexedNft, IndexedTx,
    NftSubmodule, PairInfo, PairSubmodule, TxSubmodule,
};
pub use ledgerview_storage::{
    open_backend, BackendConfig, BackendKind, CacheStats, CacheStore, MemoryStore, RedbStore,
};

/// Open `data_dir`, install logging, and start the built-in submodules
///
/// Reads (or creates) `indexer.toml` in `data_dir`. The returned handles
/// serve reads against `indexer.store()`.
pub fn start_default(data_dir: impl AsRef<Path>) -> IndexerResult<(Indexer, DefaultSubmodules)> {
    let mut indexer = Indexer::open(data_dir)?;
    init_logging(&indexer.config().logging)?;
    let modules = default_submodules(indexer.schema_builder())?;
    modules.register(&mut indexer)?;
    indexer.seal()?;
    indexer.start()?;
    info!(submodules = ?indexer.submodule_versions(), "ledgerview started");
    Ok((indexer, modules))
}
