//! Indexing engine for ledgerview
//!
//! This crate drives submodules through the block lifecycle:
//! - Indexer: facade owning the schema, cache store, pipeline and pruner
//! - Pipeline: ordered dispatch with per-submodule failure isolation
//! - Submodule: the trait every indexing unit implements
//! - Pruner: single-flight background pruning over height checkpoints
//! - MigrationGate: run-once-per-data-version migrations
//! - IndexerConfig: `indexer.toml` loading and validation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod indexer;
pub mod logging;
pub mod migration;
pub mod pipeline;
pub mod pruning;
pub mod submodule;

pub use config::{IndexerConfig, CONFIG_FILE_NAME, ENABLED_KEY};
pub use indexer::Indexer;
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use migration::{walk, walk_range, DataVersion, MigrationGate, MigrationOutcome, WALK_BATCH};
pub use pipeline::{DispatchReport, HookFailure, Phase, Pipeline, PipelineState, SubmoduleEntry};
pub use pruning::{HeightCheckpoints, OwnerCheckpoints, PruneStats, Pruner, PrunerStats};
pub use submodule::{HookContext, Submodule};
