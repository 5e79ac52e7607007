//! Single-flight background pruner
//!
//! A pass runs on its own named thread and calls `prune` on every enabled
//! submodule in registration order. At most one pass exists at a time: a
//! trigger while a pass is running returns `false` and is dropped, not
//! queued. The next commit past the retention window triggers again, so a
//! skipped or failed pass is simply retried later.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use ledgerview_core::{Height, KvStore};
use ledgerview_storage::CacheStore;

use crate::pipeline::{Phase, SubmoduleEntry};

#[derive(Default)]
struct PrunerInner {
    running: AtomicBool,
    passes: AtomicU64,
    failures: AtomicU64,
}

/// Clears the running flag when a pass ends, even if the pass panics.
struct RunningGuard<'a> {
    inner: &'a PrunerInner,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.inner.passes.fetch_add(1, Ordering::Relaxed);
        self.inner.running.store(false, Ordering::Release);
    }
}

/// Snapshot of pruner counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunerStats {
    /// A pass is in flight
    pub running: bool,
    /// Passes finished since creation
    pub passes: u64,
    /// Submodule prune hooks that errored or panicked
    pub failures: u64,
}

/// Background prune pass launcher
#[derive(Default)]
pub struct Pruner {
    inner: Arc<PrunerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Pruner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pruner").field("stats", &self.stats()).finish()
    }
}

impl Pruner {
    /// Idle pruner
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a pass is in flight
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Counter snapshot
    pub fn stats(&self) -> PrunerStats {
        PrunerStats {
            running: self.is_running(),
            passes: self.inner.passes.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }

    /// Start a pass retiring data at or below `min_height`
    ///
    /// Returns `false` without doing anything if a pass is already running.
    pub fn trigger(
        &self,
        store: Arc<CacheStore>,
        targets: Vec<SubmoduleEntry>,
        height: Height,
        min_height: Height,
    ) -> bool {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(height, min_height, "prune pass already running, trigger dropped");
            return false;
        }

        // Reap the previous, already finished, pass.
        if let Some(previous) = self.handle.lock().take() {
            let _ = previous.join();
        }

        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("ledgerview-prune".to_string())
            .spawn(move || {
                let _guard = RunningGuard { inner: &inner };
                run_pass(&inner, store.as_ref(), &targets, height, min_height);
            });

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn prune thread");
                self.inner.running.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Block until the current pass, if any, has finished
    pub fn wait(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("prune thread terminated abnormally");
            }
        }
    }
}

fn run_pass(
    inner: &PrunerInner,
    store: &dyn KvStore,
    targets: &[SubmoduleEntry],
    height: Height,
    min_height: Height,
) {
    info!(height, min_height, submodules = targets.len(), "prune pass started");
    let mut failed = 0u64;
    for entry in targets {
        if entry.run(Phase::Prune, height, store, |m, ctx| m.prune(ctx, min_height)).is_some() {
            failed += 1;
        }
    }
    inner.failures.fetch_add(failed, Ordering::Relaxed);
    info!(height, min_height, failed, "prune pass finished");
}
