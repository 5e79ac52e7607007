//! Indexing submodules for ledgerview
//!
//! - block: one summary row per block, with block time
//! - tx: transactions by sequence, hash and account, height-pruned
//! - nft: token ownership mirrored from the `nft` change-set store
//! - pair: L1/L2 denom pairings from `register_pair` events

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

use ledgerview_collections::SchemaBuilder;
use ledgerview_core::IndexerResult;
use ledgerview_engine::{Indexer, Submodule};

pub mod block;
pub mod nft;
pub mod pair;
pub mod tx;

pub use block::{BlockSubmodule, IndexedBlock};
pub use nft::{IndexedNft, NftIndexes, NftSubmodule};
pub use pair::{PairInfo, PairSubmodule};
pub use tx::{IndexedTx, TxSubmodule};

/// Handles to the four built-in submodules
///
/// Keep this around after registration to serve reads.
#[derive(Clone)]
pub struct DefaultSubmodules {
    /// Block summaries
    pub block: Arc<BlockSubmodule>,
    /// Transactions
    pub tx: Arc<TxSubmodule>,
    /// NFT ownership
    pub nft: Arc<NftSubmodule>,
    /// Denom pairings
    pub pair: Arc<PairSubmodule>,
}

impl DefaultSubmodules {
    /// All four, in dispatch order
    pub fn to_vec(&self) -> Vec<Arc<dyn Submodule>> {
        vec![
            self.block.clone(),
            self.tx.clone(),
            self.nft.clone(),
            self.pair.clone(),
        ]
    }

    /// Register all four with `indexer`
    pub fn register(&self, indexer: &mut Indexer) -> IndexerResult<()> {
        for module in self.to_vec() {
            indexer.register_submodule(module)?;
        }
        Ok(())
    }
}

/// Build the built-in submodules, registering their collections on `builder`
pub fn default_submodules(builder: &SchemaBuilder) -> IndexerResult<DefaultSubmodules> {
    Ok(DefaultSubmodules {
        block: Arc::new(BlockSubmodule::new(builder)?),
        tx: Arc::new(TxSubmodule::new(builder)?),
        nft: Arc::new(NftSubmodule::new(builder)?),
        pair: Arc::new(PairSubmodule::new(builder)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_submodules_share_one_schema() {
        let builder = SchemaBuilder::new();
        let modules = default_submodules(&builder).unwrap();
        let names: Vec<String> = modules.to_vec().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["block", "tx", "nft", "pair"]);

        let schema = builder.seal().unwrap();
        assert_eq!(schema.namespace("tx").count(), 7);
        assert!(schema.collection("nft/migration_version").is_some());
    }

    #[test]
    fn test_building_twice_conflicts() {
        let builder = SchemaBuilder::new();
        default_submodules(&builder).unwrap();
        assert!(default_submodules(&builder).is_err());
    }
}
