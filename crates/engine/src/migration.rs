//! One-shot data migrations
//!
//! A [`MigrationGate`] stores the data version a submodule's collections were
//! last migrated to. `run` compares it to the target version and, if older,
//! runs the migration body and then records the target. Within a process an
//! additional mutex-guarded flag makes every later call a no-op.
//!
//! A migration that fails leaves the stored version untouched, so the next
//! process start retries it. The body runs against the cache store; the new
//! marker becomes durable with the same flush as the rows it wrote.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use ledgerview_collections::{Item, KeyCodec, Map, Prefix, SchemaBuilder};
use ledgerview_core::{IndexerError, IndexerResult, KvStore, ScanOrder};

/// Page size of [`walk`] and [`walk_range`]
pub const WALK_BATCH: usize = 1024;

/// Parsed `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataVersion {
    /// Major
    pub major: u64,
    /// Minor
    pub minor: u64,
    /// Patch
    pub patch: u64,
}

impl DataVersion {
    /// Parse `"1.2.3"`, `"v1.2"` or `"1"`; missing parts are 0 and
    /// pre-release or build suffixes are ignored
    pub fn parse(s: &str) -> IndexerResult<Self> {
        let trimmed = s.trim().trim_start_matches('v');
        let core = trimmed
            .split(|c: char| c == '-' || c == '+')
            .next()
            .unwrap_or_default();
        let mut parts = [0u64; 3];
        let mut count = 0;
        for (i, part) in core.split('.').enumerate() {
            if i >= 3 {
                return Err(IndexerError::Migration(format!("invalid version '{}'", s)));
            }
            parts[i] = part
                .parse()
                .map_err(|_| IndexerError::Migration(format!("invalid version '{}'", s)))?;
            count += 1;
        }
        if count == 0 {
            return Err(IndexerError::Migration(format!("invalid version '{}'", s)));
        }
        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
        })
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What `run` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The body ran and the marker now holds the target version
    Migrated {
        /// Version stored before, `None` on a fresh store
        from: Option<String>,
        /// Version stored now
        to: String,
    },
    /// Stored data already at or above the target
    UpToDate,
}

/// Persisted version marker plus in-process run-once guard
pub struct MigrationGate {
    marker: Item<String>,
    done: Mutex<bool>,
}

impl fmt::Debug for MigrationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationGate")
            .field("marker", &self.marker)
            .field("done", &*self.done.lock())
            .finish()
    }
}

impl MigrationGate {
    /// Gate over an already registered marker item
    pub fn new(marker: Item<String>) -> Self {
        Self {
            marker,
            done: Mutex::new(false),
        }
    }

    /// Register the marker item as `namespace/migration_version` under `id`
    pub fn register(builder: &SchemaBuilder, namespace: &str, id: u8) -> IndexerResult<Self> {
        let marker = builder.add_item(Prefix::new(namespace, id), "migration_version")?;
        Ok(Self::new(marker))
    }

    /// Version currently recorded in the store
    pub fn stored_version(&self, store: &dyn KvStore) -> IndexerResult<Option<String>> {
        self.marker.may_get(store)
    }

    /// Run `migrate` once if the stored version is older than `target`
    ///
    /// # Errors
    ///
    /// `IndexerError::Migration` if `target` does not parse or the body fails;
    /// the marker is not written in either case.
    pub fn run<F>(&self, store: &dyn KvStore, target: &str, migrate: F) -> IndexerResult<MigrationOutcome>
    where
        F: FnOnce(&dyn KvStore) -> IndexerResult<()>,
    {
        let target_version = DataVersion::parse(target)?;
        let mut done = self.done.lock();
        if *done {
            return Ok(MigrationOutcome::UpToDate);
        }

        let stored = self.marker.may_get(store)?;
        if let Some(stored) = &stored {
            match DataVersion::parse(stored) {
                Ok(v) if v.cmp(&target_version) != Ordering::Less => {
                    *done = true;
                    return Ok(MigrationOutcome::UpToDate);
                }
                Ok(_) => {}
                Err(_) => {
                    warn!(marker = self.marker.name(), stored = %stored, "unparseable data version, migrating");
                }
            }
        }

        info!(
            marker = self.marker.name(),
            from = stored.as_deref().unwrap_or("(none)"),
            to = target,
            "running data migration"
        );
        migrate(store).map_err(|e| match e {
            IndexerError::Migration(_) => e,
            other => IndexerError::Migration(format!("{}: {}", self.marker.name(), other)),
        })?;
        self.marker.set(store, &target.to_string())?;
        *done = true;
        Ok(MigrationOutcome::Migrated {
            from: stored,
            to: target.to_string(),
        })
    }

    /// Migration whose body is a full walk of `map`
    ///
    /// `visit` is called once per entry in key order.
    pub fn run_walk<K, V, F>(
        &self,
        store: &dyn KvStore,
        target: &str,
        map: &Map<K, V>,
        visit: F,
    ) -> IndexerResult<MigrationOutcome>
    where
        K: KeyCodec + Clone,
        V: Serialize + DeserializeOwned,
        F: FnMut(&dyn KvStore, K, V) -> IndexerResult<()>,
    {
        self.run(store, target, |store| walk(store, map, visit).map(|_| ()))
    }
}

/// Visit every entry of `map` in key order, [`WALK_BATCH`] entries per scan
///
/// Returns the number of entries visited.
pub fn walk<K, V, F>(store: &dyn KvStore, map: &Map<K, V>, visit: F) -> IndexerResult<u64>
where
    K: KeyCodec + Clone,
    V: Serialize + DeserializeOwned,
    F: FnMut(&dyn KvStore, K, V) -> IndexerResult<()>,
{
    let visited = walk_range(store, map, (Bound::Unbounded, Bound::Unbounded), visit)?;
    info!(collection = map.name(), visited, "migration walk finished");
    Ok(visited)
}

/// Visit the entries of `map` between `bounds` in key order
///
/// Pages like [`walk`]: no more than [`WALK_BATCH`] rows are held at once and
/// the store is free between pages. `visit` may write to the store, but must
/// not insert keys ahead of the cursor inside `bounds`.
pub fn walk_range<K, V, F>(
    store: &dyn KvStore,
    map: &Map<K, V>,
    bounds: (Bound<K>, Bound<K>),
    mut visit: F,
) -> IndexerResult<u64>
where
    K: KeyCodec + Clone,
    V: Serialize + DeserializeOwned,
    F: FnMut(&dyn KvStore, K, V) -> IndexerResult<()>,
{
    let (mut from, to) = bounds;
    let mut visited = 0u64;
    loop {
        let page = map.iterate(
            store,
            (from.clone(), to.clone()),
            ScanOrder::Forward,
            Some(WALK_BATCH),
        )?;
        let full = page.len() == WALK_BATCH;
        for (key, value) in page {
            from = Bound::Excluded(key.clone());
            visit(store, key, value)?;
            visited += 1;
        }
        if !full {
            break;
        }
    }
    Ok(visited)
}
