//! L1/L2 denom pairings from `register_pair` events

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ledgerview_collections::{Map, Prefix, SchemaBuilder};
use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, Event, Height, IndexerResult, KvChange, KvStore,
    ScanOrder,
};
use ledgerview_engine::{HookContext, Submodule};

/// Submodule name and collection namespace
pub const NAME: &str = "pair";
/// Data version
pub const VERSION: &str = "1.0.0";
/// Event type announcing a pairing
pub const REGISTER_PAIR_EVENT: &str = "register_pair";

/// One registered pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairInfo {
    /// Denom on the settlement layer
    pub l1_denom: String,
    /// Denom on the execution layer
    pub l2_denom: String,
    /// Height the pairing was registered at
    pub height: Height,
}

fn pair_from_event(event: &Event, height: Height) -> Option<PairInfo> {
    if event.kind != REGISTER_PAIR_EVENT {
        return None;
    }
    match (event.attr("l1_denom"), event.attr("l2_denom")) {
        (Some(l1), Some(l2)) if !l1.is_empty() && !l2.is_empty() => Some(PairInfo {
            l1_denom: l1.to_string(),
            l2_denom: l2.to_string(),
            height,
        }),
        _ => {
            warn!(height, "register_pair event without both denoms, skipped");
            None
        }
    }
}

/// Pairing index, keyed by L2 denom with a reverse lookup by L1 denom
pub struct PairSubmodule {
    pairs: Map<String, PairInfo>,
    by_l1: Map<String, String>,
    staged: Mutex<Vec<PairInfo>>,
}

impl PairSubmodule {
    /// Register the pair collections
    pub fn new(builder: &SchemaBuilder) -> IndexerResult<Self> {
        Ok(Self {
            pairs: builder.add_map(Prefix::new(NAME, 0), "by_l2")?,
            by_l1: builder.add_map(Prefix::new(NAME, 1), "by_l1")?,
            staged: Mutex::new(Vec::new()),
        })
    }

    /// Pairing for an L2 denom
    pub fn pair(&self, store: &dyn KvStore, l2_denom: &str) -> IndexerResult<Option<PairInfo>> {
        self.pairs.may_get(store, &l2_denom.to_string())
    }

    /// Pairing for an L1 denom
    pub fn pair_by_l1(&self, store: &dyn KvStore, l1_denom: &str) -> IndexerResult<Option<PairInfo>> {
        match self.by_l1.may_get(store, &l1_denom.to_string())? {
            Some(l2) => self.pairs.may_get(store, &l2),
            None => Ok(None),
        }
    }

    /// All pairings in L2 denom order
    pub fn pairs(&self, store: &dyn KvStore, limit: Option<usize>) -> IndexerResult<Vec<PairInfo>> {
        Ok(self
            .pairs
            .iterate(store, .., ScanOrder::Forward, limit)?
            .into_iter()
            .map(|(_, p)| p)
            .collect())
    }
}

impl Submodule for PairSubmodule {
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
        let tx_events = res
            .tx_results
            .iter()
            .filter(|r| r.is_ok())
            .flat_map(|r| r.events.iter());
        let found: Vec<PairInfo> = res
            .events
            .iter()
            .chain(tx_events)
            .filter_map(|ev| pair_from_event(ev, req.height))
            .collect();
        *self.staged.lock() = found;
        Ok(())
    }

    fn commit(
        &self,
        ctx: &HookContext<'_>,
        _res: &CommitResponse,
        _changes: &[KvChange],
    ) -> IndexerResult<()> {
        let staged = std::mem::take(&mut *self.staged.lock());
        let store = ctx.store();
        for pair in &staged {
            // A re-registration replaces the old L1 side.
            if let Some(previous) = self.pairs.may_get(store, &pair.l2_denom)? {
                if previous.l1_denom != pair.l1_denom {
                    self.by_l1.remove(store, &previous.l1_denom)?;
                }
            }
            self.pairs.set(store, &pair.l2_denom, pair)?;
            self.by_l1.set(store, &pair.l1_denom, &pair.l2_denom)?;
            debug!(l1 = %pair.l1_denom, l2 = %pair.l2_denom, height = pair.height, "registered pair");
        }
        Ok(())
    }
}
