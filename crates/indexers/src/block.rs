//! Block summaries by height

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use ledgerview_collections::{Item, Map, Prefix, SchemaBuilder};
use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, Height, IndexerResult, KvChange, KvStore,
    ScanOrder,
};
use ledgerview_engine::{HookContext, Submodule};

/// Submodule name and collection namespace
pub const NAME: &str = "block";
/// Data version
pub const VERSION: &str = "1.0.0";

/// One indexed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedBlock {
    /// Height
    pub height: Height,
    /// Hex SHA-256 over the tx hashes and the height
    pub hash: String,
    /// Proposer address
    pub proposer: String,
    /// Block timestamp, Unix ms
    pub time_ms: u64,
    /// Milliseconds since the previous indexed block, 0 for the first
    pub block_time_ms: u64,
    /// Number of transactions
    pub tx_count: u64,
    /// Sum of gas used
    pub gas_used: u64,
    /// Sum of gas wanted
    pub gas_wanted: u64,
}

/// Deterministic block digest: `sha256(sha256(tx_0) ‖ .. ‖ sha256(tx_n) ‖ height_be)`
pub fn block_hash(req: &BlockRequest) -> String {
    let mut hasher = Sha256::new();
    for tx in &req.txs {
        hasher.update(Sha256::digest(tx));
    }
    hasher.update(req.height.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Indexes one summary row per block
pub struct BlockSubmodule {
    blocks: Map<u64, IndexedBlock>,
    last_time: Item<u64>,
    staged: Mutex<Option<IndexedBlock>>,
}

impl BlockSubmodule {
    /// Register the block collections
    pub fn new(builder: &SchemaBuilder) -> IndexerResult<Self> {
        Ok(Self {
            blocks: builder.add_map(Prefix::new(NAME, 0), "by_height")?,
            last_time: builder.add_item(Prefix::new(NAME, 1), "last_time")?,
            staged: Mutex::new(None),
        })
    }

    /// Block at `height`; `NotFound` if never indexed or pruned
    pub fn block(&self, store: &dyn KvStore, height: Height) -> IndexerResult<IndexedBlock> {
        self.blocks.get(store, &height)
    }

    /// Most recent blocks, newest first
    pub fn latest_blocks(&self, store: &dyn KvStore, limit: usize) -> IndexerResult<Vec<IndexedBlock>> {
        Ok(self
            .blocks
            .iterate(store, .., ScanOrder::Reverse, Some(limit))?
            .into_iter()
            .map(|(_, b)| b)
            .collect())
    }
}

impl Submodule for BlockSubmodule {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn finalize_block(
        &self,
        _ctx: &HookContext<'_>,
        req: &BlockRequest,
        res: &BlockResponse,
    ) -> IndexerResult<()> {
        let (gas_used, gas_wanted) = res
            .tx_results
            .iter()
            .fold((0u64, 0u64), |(used, wanted), r| {
                (used.saturating_add(r.gas_used), wanted.saturating_add(r.gas_wanted))
            });
        *self.staged.lock() = Some(IndexedBlock {
            height: req.height,
            hash: block_hash(req),
            proposer: req.proposer.clone(),
            time_ms: req.time_ms,
            block_time_ms: 0,
            tx_count: req.txs.len() as u64,
            gas_used,
            gas_wanted,
        });
        Ok(())
    }

    fn commit(
        &self,
        ctx: &HookContext<'_>,
        _res: &CommitResponse,
        _changes: &[KvChange],
    ) -> IndexerResult<()> {
        let Some(mut block) = self.staged.lock().take() else {
            return Ok(());
        };
        let store = ctx.store();
        if let Some(previous) = self.last_time.may_get(store)? {
            block.block_time_ms = block.time_ms.saturating_sub(previous);
        }
        self.blocks.set(store, &block.height, &block)?;
        self.last_time.set(store, &block.time_ms)?;
        debug!(height = block.height, txs = block.tx_count, "indexed block");
        Ok(())
    }

    fn prune(&self, ctx: &HookContext<'_>, min_height: Height) -> IndexerResult<()> {
        let removed = self.blocks.clear(ctx.store(), ..=min_height)?;
        debug!(min_height, removed, "pruned blocks");
        Ok(())
    }
}
