//! Core types and traits for ledgerview
//!
//! This crate defines the foundational types used throughout the system:
//! - IndexerError: Error type hierarchy
//! - KvStore / DurableStore: Store traits collections and caches build on
//! - KeyRange / ScanOrder: Byte ranges for scans and range clears
//! - WriteBatch: Unit of atomic durability
//! - Host inputs: BlockRequest, BlockResponse, TxResult, CommitResponse, KvChange

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod error;
pub mod range;
pub mod traits;
pub mod types;

pub use batch::{BatchOp, WriteBatch};
pub use error::{IndexerError, IndexerResult};
pub use range::{key_successor, prefix_end, KeyRange, ScanOrder};
pub use traits::{apply_ops, DurableStore, KvStore};
pub use types::{
    BlockRequest, BlockResponse, CommitResponse, Event, EventAttribute, Height, KvChange, TxResult,
};
