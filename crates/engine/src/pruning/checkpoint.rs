//! Height checkpoints for sequence-keyed collections
//!
//! A family of rows keyed by a global monotonic sequence keeps a side map
//! `height -> next sequence after that height's commit`. To retire everything
//! written at or below `min_height`, walk the checkpoints in `[1, min_height]`,
//! take the largest value `c`, and range-clear sequences `[0, c - 1]`. Cost is
//! bounded by the number of pruned heights plus one range delete, independent
//! of how many rows survive.
//!
//! The per-owner variant does the same for `(owner, sequence)` keys: a
//! `(height, owner) -> next owner sequence` map is walked over the same height
//! range and each owner discovered gets its own range clear.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use ledgerview_collections::Map;
use ledgerview_core::{Height, IndexerResult, KvStore};

use crate::migration::walk_range;

/// Counts from one family prune
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Checkpoints removed
    pub checkpoints: usize,
    /// Primary rows removed
    pub rows: usize,
}

fn checkpoint_range(min_height: Height) -> (Bound<u64>, Bound<u64>) {
    (Bound::Included(1), Bound::Included(min_height))
}

/// `height -> next sequence` checkpoints of one sequence-keyed family
#[derive(Debug, Clone)]
pub struct HeightCheckpoints {
    map: Map<u64, u64>,
}

impl HeightCheckpoints {
    /// Wrap a registered checkpoint map
    pub fn new(map: Map<u64, u64>) -> Self {
        Self { map }
    }

    /// Record the sequence counter value after `height` committed
    pub fn record(&self, store: &dyn KvStore, height: Height, next_sequence: u64) -> IndexerResult<()> {
        self.map.set(store, &height, &next_sequence)
    }

    /// Checkpoint recorded for `height`
    pub fn get(&self, store: &dyn KvStore, height: Height) -> IndexerResult<Option<u64>> {
        self.map.may_get(store, &height)
    }

    /// Largest sequence written at or below `min_height`
    ///
    /// `None` when nothing at or below `min_height` remains.
    pub fn high_water_mark(&self, store: &dyn KvStore, min_height: Height) -> IndexerResult<Option<u64>> {
        if min_height == 0 {
            return Ok(None);
        }
        let mut max_next: Option<u64> = None;
        walk_range(store, &self.map, checkpoint_range(min_height), |_, _, next| {
            max_next = Some(max_next.map_or(next, |m| m.max(next)));
            Ok(())
        })?;
        Ok(max_next.and_then(|next| next.checked_sub(1)))
    }

    /// Drop checkpoints in `[1, min_height]`
    pub fn clear(&self, store: &dyn KvStore, min_height: Height) -> IndexerResult<usize> {
        if min_height == 0 {
            return Ok(0);
        }
        self.map.clear(store, checkpoint_range(min_height))
    }

    /// Retire every row of `primary` written at or below `min_height`
    ///
    /// The primary range is cleared before the checkpoints, so a pass that
    /// fails midway is redone in full by the next trigger.
    pub fn prune<V>(&self, store: &dyn KvStore, primary: &Map<u64, V>, min_height: Height) -> IndexerResult<PruneStats>
    where
        V: Serialize + DeserializeOwned,
    {
        let mut stats = PruneStats::default();
        if let Some(hw) = self.high_water_mark(store, min_height)? {
            stats.rows = primary.clear(store, ..=hw)?;
        }
        stats.checkpoints = self.clear(store, min_height)?;
        debug!(
            collection = primary.name(),
            min_height,
            rows = stats.rows,
            checkpoints = stats.checkpoints,
            "pruned sequence family"
        );
        Ok(stats)
    }
}

/// `(height, owner) -> next owner sequence` checkpoints
#[derive(Debug, Clone)]
pub struct OwnerCheckpoints {
    map: Map<(u64, String), u64>,
}

impl OwnerCheckpoints {
    /// Wrap a registered checkpoint map
    pub fn new(map: Map<(u64, String), u64>) -> Self {
        Self { map }
    }

    /// Record `owner`'s sequence counter after `height` committed
    pub fn record(
        &self,
        store: &dyn KvStore,
        height: Height,
        owner: &str,
        next_sequence: u64,
    ) -> IndexerResult<()> {
        self.map.set(store, &(height, owner.to_string()), &next_sequence)
    }

    fn range(min_height: Height) -> (Bound<(u64, String)>, Bound<(u64, String)>) {
        let end = match min_height.checked_add(1) {
            Some(next) => Bound::Excluded((next, String::new())),
            None => Bound::Unbounded,
        };
        (Bound::Included((1, String::new())), end)
    }

    /// Per-owner largest sequence written at or below `min_height`
    pub fn high_water_marks(
        &self,
        store: &dyn KvStore,
        min_height: Height,
    ) -> IndexerResult<BTreeMap<String, u64>> {
        let mut marks: BTreeMap<String, u64> = BTreeMap::new();
        if min_height == 0 {
            return Ok(marks);
        }
        walk_range(store, &self.map, Self::range(min_height), |_, (_, owner), next| {
            let mark = marks.entry(owner).or_insert(0);
            *mark = (*mark).max(next);
            Ok(())
        })?;
        marks.retain(|_, next| *next > 0);
        for next in marks.values_mut() {
            *next -= 1;
        }
        Ok(marks)
    }

    /// Retire `(owner, sequence)` rows written at or below `min_height`
    pub fn prune<V>(
        &self,
        store: &dyn KvStore,
        primary: &Map<(String, u64), V>,
        min_height: Height,
    ) -> IndexerResult<PruneStats>
    where
        V: Serialize + DeserializeOwned,
    {
        let mut stats = PruneStats::default();
        if min_height == 0 {
            return Ok(stats);
        }
        let marks = self.high_water_marks(store, min_height)?;
        for (owner, hw) in &marks {
            let lo = (owner.clone(), 0u64);
            let hi = (owner.clone(), *hw);
            stats.rows += primary.clear(store, lo..=hi)?;
        }
        stats.checkpoints = self.map.clear(store, Self::range(min_height))?;
        debug!(
            collection = primary.name(),
            min_height,
            owners = marks.len(),
            rows = stats.rows,
            "pruned per-owner family"
        );
        Ok(stats)
    }
}
