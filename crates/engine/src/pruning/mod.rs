//! Height-indexed pruning
//!
//! - `checkpoint`: the range-clear algorithm over height checkpoints
//! - `scheduler`: the single-flight background pass

pub mod checkpoint;
pub mod scheduler;

pub use checkpoint::{HeightCheckpoints, OwnerCheckpoints, PruneStats};
pub use scheduler::{Pruner, PrunerStats};
