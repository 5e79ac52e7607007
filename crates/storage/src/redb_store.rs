//! RedbStore: persistent backend on top of `redb`
//!
//! All index data lives in a single redb table keyed by raw bytes. Collection
//! prefixes already partition the keyspace, so one table keeps range scans and
//! range clears simple.
//!
//! # Durability
//!
//! Every `write_batch` and `delete_range` is one redb write transaction,
//! committed with redb's default immediate durability. A crash mid-batch leaves
//! the store at the previous commit.

use std::ops::Bound;
use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use ledgerview_core::{
    BatchOp, DurableStore, IndexerError, IndexerResult, KeyRange, KvStore, ScanOrder, WriteBatch,
};

const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ledgerview_index");

fn backend_err<E: std::fmt::Display>(e: E) -> IndexerError {
    IndexerError::storage(format!("redb: {}", e))
}

fn bounds(range: &KeyRange) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let lower = match &range.start {
        Some(s) => Bound::Included(s.as_slice()),
        None => Bound::Unbounded,
    };
    let upper = match &range.end {
        Some(e) => Bound::Excluded(e.as_slice()),
        None => Bound::Unbounded,
    };
    (lower, upper)
}

/// Persistent ordered store backed by a redb file
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open (or create) the database file at `path`
    ///
    /// `cache_bytes` sets redb's page cache size.
    pub fn open(path: impl AsRef<Path>, cache_bytes: usize) -> IndexerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = redb::Builder::new()
            .set_cache_size(cache_bytes)
            .create(&path)
            .map_err(backend_err)?;

        // Make sure the table exists so read transactions never fail on a
        // fresh file.
        let txn = db.begin_write().map_err(backend_err)?;
        {
            txn.open_table(INDEX_TABLE).map_err(backend_err)?;
        }
        txn.commit().map_err(backend_err)?;

        debug!(path = %path.display(), cache_bytes, "opened redb index store");
        Ok(Self { db, path })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply(&self, ops: Vec<BatchOp>) -> IndexerResult<()> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = txn.open_table(INDEX_TABLE).map_err(backend_err)?;
            for op in &ops {
                match op {
                    BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(backend_err)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(backend_err)?;
                    }
                }
            }
        }
        txn.commit().map_err(backend_err)
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &[u8]) -> IndexerResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(INDEX_TABLE).map_err(backend_err)?;
        let value = table.get(key).map_err(backend_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> IndexerResult<()> {
        self.apply(vec![BatchOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    fn delete(&self, key: &[u8]) -> IndexerResult<()> {
        self.apply(vec![BatchOp::Delete { key: key.to_vec() }])
    }

    fn scan(
        &self,
        range: &KeyRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(INDEX_TABLE).map_err(backend_err)?;
        let iter = table.range::<&[u8]>(bounds(range)).map_err(backend_err)?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        match order {
            ScanOrder::Forward => {
                for item in iter.take(limit) {
                    let (k, v) = item.map_err(backend_err)?;
                    out.push((k.value().to_vec(), v.value().to_vec()));
                }
            }
            ScanOrder::Reverse => {
                for item in iter.rev().take(limit) {
                    let (k, v) = item.map_err(backend_err)?;
                    out.push((k.value().to_vec(), v.value().to_vec()));
                }
            }
        }
        Ok(out)
    }

    fn delete_range(&self, range: &KeyRange) -> IndexerResult<usize> {
        if range.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(backend_err)?;
        let removed = {
            let mut table = txn.open_table(INDEX_TABLE).map_err(backend_err)?;
            let mut doomed = Vec::new();
            for item in table.range::<&[u8]>(bounds(range)).map_err(backend_err)? {
                let (k, _) = item.map_err(backend_err)?;
                doomed.push(k.value().to_vec());
            }
            for key in &doomed {
                table.remove(key.as_slice()).map_err(backend_err)?;
            }
            doomed.len()
        };
        txn.commit().map_err(backend_err)?;
        Ok(removed)
    }
}

impl DurableStore for RedbStore {
    fn write_batch(&self, batch: WriteBatch) -> IndexerResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.apply(batch.into_ops())
    }

    fn backend_name(&self) -> &'static str {
        "redb"
    }
}
