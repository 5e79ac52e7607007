//! End-to-end lifecycle tests for the indexer
//!
//! Drives a small sequence-keyed submodule through seal, start, many blocks,
//! pruning, failure isolation and flush failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ledgerview_collections::{Map, Prefix, SchemaBuilder, Sequence};
use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, DurableStore, Height, IndexerError,
    IndexerResult, KeyRange, KvChange, KvStore, ScanOrder, WriteBatch,
};
use ledgerview_engine::{HeightCheckpoints, HookContext, Indexer, IndexerConfig, Submodule};
use ledgerview_storage::MemoryStore;
use parking_lot::Mutex;

/// One row per transaction, keyed by a global sequence, value = height
struct Rows {
    sequence: Sequence,
    rows: Map<u64, u64>,
    checkpoints: HeightCheckpoints,
    staged: Mutex<Option<(Height, usize)>>,
}

impl Rows {
    fn new(builder: &SchemaBuilder) -> IndexerResult<Self> {
        Ok(Self {
            sequence: builder.add_sequence(Prefix::new("rows", 0), "sequence")?,
            rows: builder.add_map(Prefix::new("rows", 1), "by_sequence")?,
            checkpoints: HeightCheckpoints::new(builder.add_map(Prefix::new("rows", 2), "checkpoints")?),
            staged: Mutex::new(None),
        })
    }
}

impl Submodule for Rows {
    fn name(&self) -> &str {
        "rows"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn finalize_block(&self, _ctx: &HookContext<'_>, req: &BlockRequest, _res: &BlockResponse) -> IndexerResult<()> {
        *self.staged.lock() = Some((req.height, req.txs.len()));
        Ok(())
    }

    fn commit(&self, ctx: &HookContext<'_>, _res: &CommitResponse, _changes: &[KvChange]) -> IndexerResult<()> {
        let Some((height, count)) = self.staged.lock().take() else {
            return Ok(());
        };
        let store = ctx.store();
        for _ in 0..count {
            let seq = self.sequence.next(store)?;
            self.rows.set(store, &seq, &height)?;
        }
        self.checkpoints.record(store, height, self.sequence.peek(store)?)
    }

    fn prune(&self, ctx: &HookContext<'_>, min_height: Height) -> IndexerResult<()> {
        self.checkpoints.prune(ctx.store(), &self.rows, min_height)?;
        Ok(())
    }
}

/// Fails or panics in `finalize_block` on demand
struct Flaky {
    panic: bool,
}

impl Submodule for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn finalize_block(&self, _: &HookContext<'_>, req: &BlockRequest, _: &BlockResponse) -> IndexerResult<()> {
        if self.panic {
            panic!("flaky panicked at {}", req.height);
        }
        Err(IndexerError::storage("flaky failed"))
    }

    fn commit(&self, _: &HookContext<'_>, _: &CommitResponse, _: &[KvChange]) -> IndexerResult<()> {
        Ok(())
    }
}

fn block(height: Height, txs: usize) -> BlockRequest {
    BlockRequest {
        height,
        time_ms: height * 1_000,
        proposer: "val".to_string(),
        txs: (0..txs).map(|i| vec![i as u8]).collect(),
    }
}

fn run_block(indexer: &mut Indexer, height: Height, txs: usize) {
    indexer
        .finalize_block(&block(height, txs), &BlockResponse::default())
        .unwrap();
    indexer.commit(&CommitResponse::default(), &[]).unwrap();
    indexer.pruner().wait();
}

#[test]
fn test_pruning_retires_heights_outside_retention() {
    let mut config = IndexerConfig::in_memory();
    config.retain_height = 50;
    let mut indexer = Indexer::new(config, ".").unwrap();
    let rows = Arc::new(Rows::new(indexer.schema_builder()).unwrap());
    indexer.register_submodule(rows.clone()).unwrap();
    indexer.seal().unwrap();
    indexer.start().unwrap();

    for h in 1..=100u64 {
        run_block(&mut indexer, h, (h % 4) as usize);
    }

    let store = indexer.store().unwrap().clone();
    let left = rows.rows.iterate(store.as_ref(), .., ScanOrder::Forward, None).unwrap();
    assert!(left.iter().all(|(_, h)| *h > 50));
    let expected: u64 = (51..=100u64).map(|h| h % 4).sum();
    assert_eq!(left.len() as u64, expected);
    assert_eq!(rows.checkpoints.get(store.as_ref(), 50).unwrap(), None);
    assert!(rows.checkpoints.get(store.as_ref(), 51).unwrap().is_some());
    assert!(indexer.pruner().stats().passes >= 1);
}

#[test]
fn test_no_pruning_when_retain_height_zero() {
    let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
    let rows = Arc::new(Rows::new(indexer.schema_builder()).unwrap());
    indexer.register_submodule(rows.clone()).unwrap();
    indexer.seal().unwrap();
    indexer.start().unwrap();

    for h in 1..=20u64 {
        run_block(&mut indexer, h, 1);
    }
    assert_eq!(indexer.pruner().stats().passes, 0);
    let store = indexer.store().unwrap().clone();
    assert_eq!(rows.rows.keys(store.as_ref(), .., ScanOrder::Forward, None).unwrap().len(), 20);
}

#[test]
fn test_failing_submodules_do_not_block_later_ones() {
    let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
    indexer.register_submodule(Arc::new(Flaky { panic: false })).unwrap();
    let rows = Arc::new(Rows::new(indexer.schema_builder()).unwrap());
    indexer.register_submodule(rows.clone()).unwrap();
    indexer.seal().unwrap();
    indexer.start().unwrap();

    let report = indexer
        .finalize_block(&block(1, 2), &BlockResponse::default())
        .unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].submodule, "flaky");
    indexer.commit(&CommitResponse::default(), &[]).unwrap();

    let store = indexer.store().unwrap().clone();
    assert_eq!(rows.sequence.peek(store.as_ref()).unwrap(), 2);
}

#[test]
fn test_panicking_submodule_is_contained() {
    let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
    indexer.register_submodule(Arc::new(Flaky { panic: true })).unwrap();
    let rows = Arc::new(Rows::new(indexer.schema_builder()).unwrap());
    indexer.register_submodule(rows.clone()).unwrap();
    indexer.seal().unwrap();
    indexer.start().unwrap();

    for h in 1..=3 {
        let report = indexer
            .finalize_block(&block(h, 1), &BlockResponse::default())
            .unwrap();
        let failure = report.failure("flaky").unwrap();
        assert!(failure.panicked);
        assert!(failure.message.contains(&format!("at {}", h)));
        indexer.commit(&CommitResponse::default(), &[]).unwrap();
    }
    let store = indexer.store().unwrap().clone();
    assert_eq!(rows.sequence.peek(store.as_ref()).unwrap(), 3);
}

#[test]
fn test_disabled_submodule_from_config() {
    let mut config = IndexerConfig::in_memory();
    let mut table = toml::Table::new();
    table.insert("enabled".into(), toml::Value::Boolean(false));
    config.submodules.insert("flaky".into(), table);

    let mut indexer = Indexer::new(config, ".").unwrap();
    indexer.register_submodule(Arc::new(Flaky { panic: true })).unwrap();
    indexer.seal().unwrap();
    indexer.start().unwrap();
    let report = indexer
        .finalize_block(&block(1, 0), &BlockResponse::default())
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.dispatched, 0);
}

/// Durable store whose batch writes fail while `broken` is set
struct Flappy {
    inner: MemoryStore,
    broken: AtomicBool,
}

impl KvStore for Flappy {
    fn get(&self, key: &[u8]) -> IndexerResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }
    fn set(&self, key: &[u8], value: &[u8]) -> IndexerResult<()> {
        self.inner.set(key, value)
    }
    fn delete(&self, key: &[u8]) -> IndexerResult<()> {
        self.inner.delete(key)
    }
    fn scan(&self, range: &KeyRange, order: ScanOrder, limit: Option<usize>) -> IndexerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan(range, order, limit)
    }
    fn delete_range(&self, range: &KeyRange) -> IndexerResult<usize> {
        self.inner.delete_range(range)
    }
}

impl DurableStore for Flappy {
    fn write_batch(&self, batch: WriteBatch) -> IndexerResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(IndexerError::storage("disk full"));
        }
        self.inner.write_batch(batch)
    }

    fn backend_name(&self) -> &'static str {
        "flappy"
    }
}

#[test]
fn test_flush_error_reaches_commit_caller() {
    let durable = Arc::new(Flappy {
        inner: MemoryStore::new(),
        broken: AtomicBool::new(false),
    });
    let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
    let rows = Arc::new(Rows::new(indexer.schema_builder()).unwrap());
    indexer.register_submodule(rows.clone()).unwrap();
    indexer.seal_with(durable.clone()).unwrap();
    indexer.start().unwrap();

    run_block(&mut indexer, 1, 1);

    durable.broken.store(true, Ordering::SeqCst);
    indexer
        .finalize_block(&block(2, 1), &BlockResponse::default())
        .unwrap();
    let err = indexer.commit(&CommitResponse::default(), &[]).unwrap_err();
    assert!(matches!(err, IndexerError::Storage(_)));
    assert_eq!(indexer.last_committed_height(), Some(1));
    assert!(rows.rows.may_get(&durable.inner, &1).unwrap().is_none());

    // The engine keeps running; the pending rows go out with the next flush.
    durable.broken.store(false, Ordering::SeqCst);
    run_block(&mut indexer, 3, 1);
    assert_eq!(rows.rows.get(&durable.inner, &1).unwrap(), 2);
    assert_eq!(rows.rows.get(&durable.inner, &2).unwrap(), 3);
}
