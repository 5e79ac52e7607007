//! Transactions by global sequence, by hash, and by account
//!
//! Every indexed transaction gets the next value of a global sequence and one
//! row per involved account keyed `(account, account_sequence)`. Both families
//! carry height checkpoints so pruning is a bounded range clear.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use ledgerview_collections::{Map, Prefix, SchemaBuilder, Sequence};
use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, Height, IndexerResult, KvChange, KvStore,
    ScanOrder, TxResult,
};
use ledgerview_engine::{
    walk_range, HeightCheckpoints, HookContext, OwnerCheckpoints, Submodule, WALK_BATCH,
};

/// Submodule name and collection namespace
pub const NAME: &str = "tx";
/// Data version
pub const VERSION: &str = "1.0.0";

/// Event attribute keys whose values name an involved account
pub const ACCOUNT_ATTRIBUTES: [&str; 5] = ["sender", "recipient", "signer", "spender", "receiver"];

/// One indexed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedTx {
    /// Global sequence
    pub sequence: u64,
    /// Block height
    pub height: Height,
    /// Position in the block
    pub index: u32,
    /// Hex SHA-256 of the raw tx bytes
    pub hash: String,
    /// Result code
    pub code: u32,
    /// Gas requested
    pub gas_wanted: u64,
    /// Gas consumed
    pub gas_used: u64,
    /// Execution log
    pub log: String,
    /// Distinct involved accounts, sorted
    pub accounts: Vec<String>,
}

/// Distinct account values across the events of one result
pub fn involved_accounts(result: &TxResult) -> BTreeSet<String> {
    result
        .events
        .iter()
        .flat_map(|ev| ev.attributes.iter())
        .filter(|attr| ACCOUNT_ATTRIBUTES.contains(&attr.key.as_str()) && !attr.value.is_empty())
        .map(|attr| attr.value.clone())
        .collect()
}

struct StagedTx {
    hash: Vec<u8>,
    tx: IndexedTx,
}

/// Transaction index
pub struct TxSubmodule {
    sequence: Sequence,
    txs: Map<u64, IndexedTx>,
    by_hash: Map<Vec<u8>, u64>,
    checkpoints: HeightCheckpoints,
    account_sequences: Map<String, u64>,
    account_txs: Map<(String, u64), u64>,
    account_checkpoints: OwnerCheckpoints,
    staged: Mutex<Option<(Height, Vec<StagedTx>)>>,
}

impl TxSubmodule {
    /// Register the tx collections
    pub fn new(builder: &SchemaBuilder) -> IndexerResult<Self> {
        Ok(Self {
            sequence: builder.add_sequence(Prefix::new(NAME, 0), "sequence")?,
            txs: builder.add_map(Prefix::new(NAME, 1), "by_sequence")?,
            by_hash: builder.add_map(Prefix::new(NAME, 2), "by_hash")?,
            checkpoints: HeightCheckpoints::new(
                builder.add_map(Prefix::new(NAME, 3), "height_checkpoints")?,
            ),
            account_sequences: builder.add_map(Prefix::new(NAME, 4), "account_sequences")?,
            account_txs: builder.add_map(Prefix::new(NAME, 5), "account_txs")?,
            account_checkpoints: OwnerCheckpoints::new(
                builder.add_map(Prefix::new(NAME, 6), "account_checkpoints")?,
            ),
            staged: Mutex::new(None),
        })
    }

    /// Transaction by raw 32-byte hash
    pub fn tx_by_hash(&self, store: &dyn KvStore, hash: &[u8]) -> IndexerResult<Option<IndexedTx>> {
        match self.by_hash.may_get(store, &hash.to_vec())? {
            Some(sequence) => self.txs.may_get(store, &sequence),
            None => Ok(None),
        }
    }

    /// Transaction by global sequence; `NotFound` if absent or pruned
    pub fn tx_by_sequence(&self, store: &dyn KvStore, sequence: u64) -> IndexerResult<IndexedTx> {
        self.txs.get(store, &sequence)
    }

    /// Most recent transactions involving `account`, newest first
    pub fn txs_by_account(
        &self,
        store: &dyn KvStore,
        account: &str,
        limit: usize,
    ) -> IndexerResult<Vec<IndexedTx>> {
        let rows = self.account_txs.iterate_prefix(
            store,
            &account.to_string(),
            ScanOrder::Reverse,
            Some(limit),
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for (_, sequence) in rows {
            if let Some(tx) = self.txs.may_get(store, &sequence)? {
                out.push(tx);
            }
        }
        Ok(out)
    }

    /// Next global sequence to be assigned
    pub fn next_sequence(&self, store: &dyn KvStore) -> IndexerResult<u64> {
        self.sequence.peek(store)
    }
}

impl Submodule for TxSubmodule {
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
        if res.tx_results.len() != req.txs.len() {
            warn!(
                height = req.height,
                txs = req.txs.len(),
                results = res.tx_results.len(),
                "tx/result count mismatch"
            );
        }
        let missing = TxResult::default();
        let staged = req
            .txs
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let result = res.tx_results.get(i).unwrap_or(&missing);
                let hash = Sha256::digest(raw).to_vec();
                StagedTx {
                    tx: IndexedTx {
                        sequence: 0,
                        height: req.height,
                        index: i as u32,
                        hash: hex::encode(&hash),
                        code: result.code,
                        gas_wanted: result.gas_wanted,
                        gas_used: result.gas_used,
                        log: result.log.clone(),
                        accounts: involved_accounts(result).into_iter().collect(),
                    },
                    hash,
                }
            })
            .collect();
        *self.staged.lock() = Some((req.height, staged));
        Ok(())
    }

    fn commit(
        &self,
        ctx: &HookContext<'_>,
        _res: &CommitResponse,
        _changes: &[KvChange],
    ) -> IndexerResult<()> {
        let Some((height, staged)) = self.staged.lock().take() else {
            return Ok(());
        };
        let store = ctx.store();
        let count = staged.len();

        let mut touched: BTreeMap<String, u64> = BTreeMap::new();
        for StagedTx { hash, mut tx } in staged {
            tx.sequence = self.sequence.next(store)?;
            for account in &tx.accounts {
                let account_seq = match touched.get(account) {
                    Some(next) => *next,
                    None => self.account_sequences.may_get(store, account)?.unwrap_or(0),
                };
                self.account_txs
                    .set(store, &(account.clone(), account_seq), &tx.sequence)?;
                touched.insert(account.clone(), account_seq + 1);
            }
            self.by_hash.set(store, &hash, &tx.sequence)?;
            self.txs.set(store, &tx.sequence, &tx)?;
        }

        for (account, next) in &touched {
            self.account_sequences.set(store, account, next)?;
            self.account_checkpoints.record(store, height, account, *next)?;
        }
        self.checkpoints
            .record(store, height, self.sequence.peek(store)?)?;
        debug!(height, txs = count, accounts = touched.len(), "indexed transactions");
        Ok(())
    }

    fn prune(&self, ctx: &HookContext<'_>, min_height: Height) -> IndexerResult<()> {
        let store = ctx.store();
        // Hash deletes must be durable before any checkpoint is cleared.
        let mut hashes = 0usize;
        if let Some(hw) = self.checkpoints.high_water_mark(store, min_height)? {
            let mut pending: Vec<Vec<u8>> = Vec::new();
            let bounds = (Bound::Included(0), Bound::Included(hw));
            walk_range(store, &self.txs, bounds, |store, sequence, tx| {
                let hash = match hex::decode(&tx.hash) {
                    Ok(hash) => hash,
                    Err(e) => {
                        warn!(sequence, error = %e, "bad stored tx hash");
                        return Ok(());
                    }
                };
                // Identical tx bytes at a later height own the entry now.
                if self.by_hash.may_get(store, &hash)? == Some(sequence) {
                    pending.push(hash);
                }
                if pending.len() >= WALK_BATCH {
                    hashes += pending.len();
                    self.by_hash.remove_keys(store, &pending)?;
                    pending.clear();
                }
                Ok(())
            })?;
            hashes += pending.len();
            self.by_hash.remove_keys(store, &pending)?;
        }
        let global = self.checkpoints.prune(store, &self.txs, min_height)?;
        let accounts = self
            .account_checkpoints
            .prune(store, &self.account_txs, min_height)?;
        debug!(
            min_height,
            txs = global.rows,
            hashes,
            account_rows = accounts.rows,
            "pruned transactions"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_core::Event;
    use ledgerview_storage::{CacheStore, MemoryStore};
    use std::sync::Arc;

    fn transfer(from: &str, to: &str) -> TxResult {
        TxResult {
            gas_used: 5,
            gas_wanted: 10,
            events: vec![Event::new("transfer")
                .with_attr("sender", from)
                .with_attr("recipient", to)
                .with_attr("amount", "10uinit")],
            ..Default::default()
        }
    }

    fn index(module: &TxSubmodule, store: &dyn KvStore, height: Height, results: Vec<TxResult>) {
        let req = BlockRequest {
            height,
            time_ms: height * 1_000,
            proposer: String::new(),
            txs: (0..results.len())
                .map(|i| format!("tx-{}-{}", height, i).into_bytes())
                .collect(),
        };
        let res = BlockResponse {
            tx_results: results,
            events: Vec::new(),
        };
        let config = toml::Table::new();
        let ctx = HookContext::new(store, height, &config);
        module.finalize_block(&ctx, &req, &res).unwrap();
        module.commit(&ctx, &CommitResponse::default(), &[]).unwrap();
    }

    #[test]
    fn test_accounts_deduplicated_per_tx() {
        let result = TxResult {
            events: vec![
                Event::new("transfer").with_attr("sender", "alice").with_attr("recipient", "bob"),
                Event::new("message").with_attr("signer", "alice"),
            ],
            ..Default::default()
        };
        let accounts: Vec<String> = involved_accounts(&result).into_iter().collect();
        assert_eq!(accounts, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_lookup_by_hash_sequence_and_account() {
        let store = MemoryStore::new();
        let module = TxSubmodule::new(&SchemaBuilder::new()).unwrap();
        index(&module, &store, 1, vec![transfer("alice", "bob"), transfer("bob", "carol")]);
        index(&module, &store, 2, vec![transfer("alice", "alice")]);

        assert_eq!(module.next_sequence(&store).unwrap(), 3);
        let first = module.tx_by_sequence(&store, 0).unwrap();
        assert_eq!(first.height, 1);
        assert_eq!(first.accounts, vec!["alice".to_string(), "bob".to_string()]);

        let hash = Sha256::digest(b"tx-1-1").to_vec();
        let found = module.tx_by_hash(&store, &hash).unwrap().unwrap();
        assert_eq!(found.sequence, 1);
        assert_eq!(found.hash, hex::encode(&hash));

        let alice: Vec<u64> = module
            .txs_by_account(&store, "alice", 10)
            .unwrap()
            .iter()
            .map(|t| t.sequence)
            .collect();
        assert_eq!(alice, vec![2, 0]);
        assert_eq!(
            module.account_sequences.may_get(&store, &"alice".to_string()).unwrap(),
            Some(2)
        );
        assert_eq!(module.txs_by_account(&store, "carol", 10).unwrap().len(), 1);
        assert!(module.txs_by_account(&store, "dave", 10).unwrap().is_empty());
    }

    #[test]
    fn test_prune_drops_old_heights_everywhere() {
        let store = MemoryStore::new();
        let module = TxSubmodule::new(&SchemaBuilder::new()).unwrap();
        for h in 1..=100u64 {
            let results = (0..(h % 3)).map(|_| transfer("alice", "bob")).collect();
            index(&module, &store, h, results);
        }
        let old_hash = Sha256::digest(b"tx-49-0").to_vec();
        assert!(module.tx_by_hash(&store, &old_hash).unwrap().is_some());

        let config = toml::Table::new();
        module.prune(&HookContext::new(&store, 100, &config), 50).unwrap();

        let left = module.txs.iterate(&store, .., ScanOrder::Forward, None).unwrap();
        assert!(left.iter().all(|(_, tx)| tx.height > 50));
        let expected: u64 = (51..=100u64).map(|h| h % 3).sum();
        assert_eq!(left.len() as u64, expected);
        assert!(module.tx_by_hash(&store, &old_hash).unwrap().is_none());
        assert_eq!(module.by_hash.keys(&store, .., ScanOrder::Forward, None).unwrap().len() as u64, expected);

        let alice = module.txs_by_account(&store, "alice", 1_000).unwrap();
        assert_eq!(alice.len() as u64, expected);
        let account_rows = module
            .account_txs
            .iterate_prefix(&store, &"bob".to_string(), ScanOrder::Forward, None)
            .unwrap();
        assert_eq!(account_rows.len() as u64, expected);
        assert!(module.checkpoints.get(&store, 50).unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_hash_of_later_duplicate() {
        let store = MemoryStore::new();
        let module = TxSubmodule::new(&SchemaBuilder::new()).unwrap();
        let config = toml::Table::new();
        let replay = BlockRequest {
            height: 1,
            txs: vec![b"same-bytes".to_vec()],
            ..Default::default()
        };
        let res = BlockResponse {
            tx_results: vec![transfer("alice", "bob")],
            events: Vec::new(),
        };
        for height in [1, 2] {
            let req = BlockRequest {
                height,
                ..replay.clone()
            };
            let ctx = HookContext::new(&store, height, &config);
            module.finalize_block(&ctx, &req, &res).unwrap();
            module.commit(&ctx, &CommitResponse::default(), &[]).unwrap();
        }

        module.prune(&HookContext::new(&store, 2, &config), 1).unwrap();

        let hash = Sha256::digest(b"same-bytes").to_vec();
        let found = module.tx_by_hash(&store, &hash).unwrap().unwrap();
        assert_eq!(found.height, 2);
        assert_eq!(found.sequence, 1);
    }

    #[test]
    fn test_prune_hash_deletes_survive_discard() {
        let durable = MemoryStore::new();
        let cache = CacheStore::new(Arc::new(durable.clone()), 64);
        let module = TxSubmodule::new(&SchemaBuilder::new()).unwrap();
        for h in 1..=5u64 {
            index(&module, &cache, h, vec![transfer("alice", "bob")]);
            cache.write().unwrap();
        }

        let config = toml::Table::new();
        module.prune(&HookContext::new(&cache, 5, &config), 4).unwrap();
        // The next block is abandoned before its flush
        cache.discard();

        let txs = module.txs.keys(&durable, .., ScanOrder::Forward, None).unwrap();
        let hashes = module.by_hash.keys(&durable, .., ScanOrder::Forward, None).unwrap();
        assert_eq!(txs, vec![4]);
        assert_eq!(hashes.len(), txs.len());
        let old = Sha256::digest(b"tx-3-0").to_vec();
        assert!(module.tx_by_hash(&durable, &old).unwrap().is_none());
    }
}
