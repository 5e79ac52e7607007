//! Indexer facade
//!
//! Owns the schema builder, the submodule pipeline, the cache store and the
//! pruner, and drives them through the block lifecycle:
//!
//! ```text
//! new -> register_submodule* -> seal -> start -> (finalize_block -> commit)* -> close
//! ```
//!
//! `commit` dispatches the commit hook, flushes the cache store as one batch,
//! and then triggers a background prune pass once the height is past the
//! retention window.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use ledgerview_collections::{Schema, SchemaBuilder};
use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, DurableStore, Height, IndexerError,
    IndexerResult, KvChange,
};
use ledgerview_storage::{open_backend, CacheStore};

use crate::config::{IndexerConfig, CONFIG_FILE_NAME};
use crate::pipeline::{DispatchReport, Phase, Pipeline, PipelineState};
use crate::pruning::Pruner;
use crate::submodule::Submodule;

/// The indexing engine
pub struct Indexer {
    config: IndexerConfig,
    data_dir: PathBuf,
    schema_builder: SchemaBuilder,
    schema: Option<Schema>,
    store: Option<Arc<CacheStore>>,
    pipeline: Pipeline,
    pruner: Pruner,
    pending_height: Option<Height>,
    last_committed: Option<Height>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("data_dir", &self.data_dir)
            .field("enabled", &self.config.enabled)
            .field("sealed", &self.store.is_some())
            .field("pipeline", &self.pipeline)
            .field("last_committed", &self.last_committed)
            .finish()
    }
}

impl Indexer {
    /// Indexer with `config`, keeping its files under `data_dir`
    pub fn new(config: IndexerConfig, data_dir: impl Into<PathBuf>) -> IndexerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            data_dir: data_dir.into(),
            schema_builder: SchemaBuilder::new(),
            schema: None,
            store: None,
            pipeline: Pipeline::new(),
            pruner: Pruner::new(),
            pending_height: None,
            last_committed: None,
        })
    }

    /// Indexer configured from `<data_dir>/indexer.toml`
    ///
    /// A commented default file is written first if none exists.
    pub fn open(data_dir: impl AsRef<Path>) -> IndexerResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(CONFIG_FILE_NAME);
        IndexerConfig::write_default_if_missing(&path)?;
        let config = IndexerConfig::from_file(&path)?;
        Self::new(config, data_dir)
    }

    /// Active configuration
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Whether block hooks run at all
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Builder submodules register their collections on
    pub fn schema_builder(&self) -> &SchemaBuilder {
        &self.schema_builder
    }

    /// Sealed schema, `None` before `seal`
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// The shared cache store
    ///
    /// # Errors
    ///
    /// `InvalidState` before `seal`.
    pub fn store(&self) -> IndexerResult<&Arc<CacheStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| IndexerError::invalid_state("indexer is not sealed"))
    }

    /// The background pruner
    pub fn pruner(&self) -> &Pruner {
        &self.pruner
    }

    /// Last height whose commit flushed successfully
    pub fn last_committed_height(&self) -> Option<Height> {
        self.last_committed
    }

    /// `(name, version)` of every registered submodule
    pub fn submodule_versions(&self) -> Vec<(String, String)> {
        self.pipeline
            .entries()
            .iter()
            .map(|e| (e.name().to_string(), e.version().to_string()))
            .collect()
    }

    /// Add a submodule; its `[submodules.<name>]` block is attached here
    pub fn register_submodule(&mut self, module: Arc<dyn Submodule>) -> IndexerResult<()> {
        if self.store.is_some() {
            return Err(IndexerError::invalid_state(
                "submodules must be registered before seal",
            ));
        }
        let name = module.name().to_string();
        let enabled = self.config.submodule_enabled(&name);
        self.pipeline
            .register(module, self.config.submodule_config(&name), enabled)
    }

    /// Freeze the schema and open the configured durable backend
    pub fn seal(&mut self) -> IndexerResult<()> {
        self.ensure_unsealed()?;
        let durable = open_backend(&self.config.backend, &self.data_dir)?;
        self.seal_with(durable)
    }

    /// Freeze the schema over a caller-supplied durable store
    pub fn seal_with(&mut self, durable: Arc<dyn DurableStore>) -> IndexerResult<()> {
        self.ensure_unsealed()?;
        let schema = self.schema_builder.seal()?;
        info!(
            backend = durable.backend_name(),
            collections = schema.len(),
            submodules = self.pipeline.entries().len(),
            "indexer sealed"
        );
        self.store = Some(Arc::new(CacheStore::new(
            durable,
            self.config.backend.cache_capacity,
        )));
        self.schema = Some(schema);
        Ok(())
    }

    fn ensure_unsealed(&self) -> IndexerResult<()> {
        if self.store.is_some() {
            return Err(IndexerError::AlreadySealed("indexer".to_string()));
        }
        Ok(())
    }

    /// Run `prepare` then `initialize` on every enabled submodule
    ///
    /// Writes made by `initialize` (migrations) are flushed before returning.
    /// On failure they are discarded so nothing half-migrated is persisted.
    pub fn start(&mut self) -> IndexerResult<()> {
        let store = Arc::clone(self.store()?);
        self.pipeline.prepare(store.as_ref())?;
        if let Err(e) = self.pipeline.initialize(store.as_ref()) {
            let dropped = store.discard();
            error!(error = %e, dropped, "submodule initialization failed");
            return Err(e);
        }
        store.write()?;
        info!(submodules = self.pipeline.enabled_entries().len(), "indexer started");
        Ok(())
    }

    /// Dispatch `finalize_block` for `req.height`
    pub fn finalize_block(
        &mut self,
        req: &BlockRequest,
        res: &BlockResponse,
    ) -> IndexerResult<DispatchReport> {
        if !self.config.enabled {
            return Ok(DispatchReport::skipped(Phase::FinalizeBlock, req.height));
        }
        if let Some(pending) = self.pending_height {
            return Err(IndexerError::invalid_state(format!(
                "height {} finalized but not committed",
                pending
            )));
        }
        let store = Arc::clone(self.store()?);
        let report = self.pipeline.finalize_block(store.as_ref(), req, res)?;
        self.pending_height = Some(req.height);
        Ok(report)
    }

    /// Dispatch `commit`, flush the cache store, and maybe start pruning
    ///
    /// # Errors
    ///
    /// Returns the flush error if the durable write fails; unflushed entries
    /// stay in the cache for the next flush.
    pub fn commit(
        &mut self,
        res: &CommitResponse,
        changes: &[KvChange],
    ) -> IndexerResult<DispatchReport> {
        let height = match self.pending_height.take() {
            Some(height) => height,
            None if !self.config.enabled => return Ok(DispatchReport::skipped(Phase::Commit, 0)),
            None => {
                return Err(IndexerError::invalid_state(
                    "commit without a finalized block",
                ))
            }
        };
        let store = Arc::clone(self.store()?);
        let report = self.pipeline.commit(store.as_ref(), height, res, changes)?;

        match store.write() {
            Ok(flushed) => debug!(height, flushed, "committed block"),
            Err(e) => {
                error!(height, error = %e, "failed to flush index writes");
                return Err(e);
            }
        }
        self.last_committed = Some(height);

        let retain = self.config.retain_height;
        if retain > 0 && height > retain {
            let min_height = height - retain;
            if !self
                .pruner
                .trigger(store, self.pipeline.enabled_entries(), height, min_height)
            {
                debug!(height, min_height, "prune pass still running");
            }
        }
        Ok(report)
    }

    /// Wait for pruning, flush what is pending, and stop dispatching
    pub fn close(&mut self) -> IndexerResult<()> {
        if self.pipeline.state() == PipelineState::Closed {
            return Ok(());
        }
        self.pruner.wait();
        if let Some(store) = &self.store {
            if self.pending_height.take().is_some() {
                let dropped = store.discard();
                warn!(dropped, "closing with an uncommitted block, staged writes dropped");
            }
            store.write()?;
        }
        self.pipeline.close();
        info!("indexer closed");
        Ok(())
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.pruner.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submodule::HookContext;
    use ledgerview_storage::MemoryStore;

    struct Noop(&'static str);

    impl Submodule for Noop {
        fn name(&self) -> &str {
            self.0
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn finalize_block(&self, _: &HookContext<'_>, _: &BlockRequest, _: &BlockResponse) -> IndexerResult<()> {
            Ok(())
        }
        fn commit(&self, _: &HookContext<'_>, _: &CommitResponse, _: &[KvChange]) -> IndexerResult<()> {
            Ok(())
        }
    }

    fn block(height: Height) -> BlockRequest {
        BlockRequest {
            height,
            ..Default::default()
        }
    }

    #[test]
    fn test_seal_twice_fails() {
        let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
        indexer.seal().unwrap();
        assert!(matches!(indexer.seal(), Err(IndexerError::AlreadySealed(_))));
        assert!(matches!(
            indexer.seal_with(Arc::new(MemoryStore::new())),
            Err(IndexerError::AlreadySealed(_))
        ));
    }

    #[test]
    fn test_register_after_seal_fails() {
        let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
        indexer.seal().unwrap();
        assert!(indexer.register_submodule(Arc::new(Noop("late"))).is_err());
    }

    #[test]
    fn test_block_before_start_fails() {
        let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
        assert!(indexer.finalize_block(&block(1), &BlockResponse::default()).is_err());
        indexer.seal().unwrap();
        assert!(indexer.finalize_block(&block(1), &BlockResponse::default()).is_err());
    }

    #[test]
    fn test_commit_requires_finalize() {
        let mut indexer = Indexer::new(IndexerConfig::in_memory(), ".").unwrap();
        indexer.register_submodule(Arc::new(Noop("a"))).unwrap();
        indexer.seal().unwrap();
        indexer.start().unwrap();

        assert!(matches!(
            indexer.commit(&CommitResponse::default(), &[]),
            Err(IndexerError::InvalidState(_))
        ));
        indexer.finalize_block(&block(1), &BlockResponse::default()).unwrap();
        assert!(indexer.finalize_block(&block(2), &BlockResponse::default()).is_err());
        indexer.commit(&CommitResponse::default(), &[]).unwrap();
        assert_eq!(indexer.last_committed_height(), Some(1));
    }

    #[test]
    fn test_disabled_indexer_skips_blocks() {
        let mut config = IndexerConfig::in_memory();
        config.enabled = false;
        let mut indexer = Indexer::new(config, ".").unwrap();
        indexer.register_submodule(Arc::new(Noop("a"))).unwrap();
        indexer.seal().unwrap();
        indexer.start().unwrap();

        let report = indexer.finalize_block(&block(1), &BlockResponse::default()).unwrap();
        assert_eq!(report.dispatched, 0);
        let report = indexer.commit(&CommitResponse::default(), &[]).unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(indexer.last_committed_height(), None);
    }

    #[test]
    fn test_open_writes_default_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let indexer = Indexer::open(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(indexer.config().backend.engine, "redb");
    }
}
