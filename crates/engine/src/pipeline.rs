//! Submodule pipeline
//!
//! Holds the registered submodules in registration order and dispatches each
//! lifecycle hook to every enabled one.
//!
//! ## Failure isolation
//!
//! Dispatch is best-effort: a hook that returns `Err` or panics is logged,
//! recorded in the [`DispatchReport`], and the next submodule still runs.
//! Panics are caught at the hook boundary with `catch_unwind`; the backtrace
//! is captured by a panic hook installed once per process.
//!
//! ## Lifecycle
//!
//! ```text
//! Registered -> Prepared -> Initialized -> {FinalizeBlock, Commit}* -> Closed
//! ```
//!
//! Hooks called out of order fail with `IndexerError::InvalidState`.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, Height, IndexerError, IndexerResult, KvChange,
    KvStore,
};

use crate::submodule::{HookContext, Submodule};

// ============================================================================
// Phases and States
// ============================================================================

/// Lifecycle hook being dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `Submodule::prepare`
    Prepare,
    /// `Submodule::initialize`
    Initialize,
    /// `Submodule::finalize_block`
    FinalizeBlock,
    /// `Submodule::commit`
    Commit,
    /// `Submodule::prune`
    Prune,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Prepare => "prepare",
            Phase::Initialize => "initialize",
            Phase::FinalizeBlock => "finalize_block",
            Phase::Commit => "commit",
            Phase::Prune => "prune",
        };
        f.write_str(s)
    }
}

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting registrations
    Registered,
    /// `prepare` ran on every submodule
    Prepared,
    /// `initialize` ran; block hooks allowed
    Initialized,
    /// Shut down; nothing is dispatched
    Closed,
}

// ============================================================================
// Dispatch Reports
// ============================================================================

/// One failed hook call
#[derive(Debug, Clone)]
pub struct HookFailure {
    /// Submodule name
    pub submodule: String,
    /// Error message or panic payload
    pub message: String,
    /// True if the hook panicked
    pub panicked: bool,
    /// Backtrace captured at the panic site
    pub backtrace: Option<String>,
}

/// Outcome of dispatching one hook to every enabled submodule
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Hook dispatched
    pub phase: Phase,
    /// Height the hook ran for
    pub height: Height,
    /// Number of submodules the hook was called on
    pub dispatched: usize,
    /// Hooks that errored or panicked
    pub failures: Vec<HookFailure>,
}

impl DispatchReport {
    fn new(phase: Phase, height: Height) -> Self {
        Self {
            phase,
            height,
            dispatched: 0,
            failures: Vec::new(),
        }
    }

    /// Report for a dispatch that was skipped entirely
    pub fn skipped(phase: Phase, height: Height) -> Self {
        Self::new(phase, height)
    }

    /// True if every hook succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure recorded for `submodule`, if any
    pub fn failure(&self, submodule: &str) -> Option<&HookFailure> {
        self.failures.iter().find(|f| f.submodule == submodule)
    }

    fn into_setup_result(self) -> IndexerResult<Self> {
        match self.failures.first() {
            Some(first) => Err(IndexerError::submodule(
                first.submodule.clone(),
                format!("{} failed: {}", self.phase, first.message),
            )),
            None => Ok(self),
        }
    }
}

// ============================================================================
// Registered Submodules
// ============================================================================

/// A registered submodule with its config block
#[derive(Clone)]
pub struct SubmoduleEntry {
    module: Arc<dyn Submodule>,
    config: Arc<toml::Table>,
    enabled: bool,
}

impl SubmoduleEntry {
    /// Submodule name
    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// Submodule version
    pub fn version(&self) -> &str {
        self.module.version()
    }

    /// Whether hooks are dispatched to it
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Call one hook with panic containment
    pub(crate) fn run<F>(&self, phase: Phase, height: Height, store: &dyn KvStore, hook: F) -> Option<HookFailure>
    where
        F: FnOnce(&dyn Submodule, &HookContext<'_>) -> IndexerResult<()>,
    {
        let ctx = HookContext::new(store, height, &self.config);
        let name = self.module.name();
        match catch_hook_panic(|| hook(self.module.as_ref(), &ctx)) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!(submodule = %name, phase = %phase, height, error = %e, "submodule hook failed");
                Some(HookFailure {
                    submodule: name.to_string(),
                    message: e.to_string(),
                    panicked: false,
                    backtrace: None,
                })
            }
            Err((message, backtrace)) => {
                error!(
                    submodule = %name,
                    phase = %phase,
                    height,
                    panic = %message,
                    backtrace = backtrace.as_deref().unwrap_or("(unavailable)"),
                    "submodule hook panicked"
                );
                Some(HookFailure {
                    submodule: name.to_string(),
                    message,
                    panicked: true,
                    backtrace,
                })
            }
        }
    }
}

impl fmt::Debug for SubmoduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmoduleEntry")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ============================================================================
// Panic Capture
// ============================================================================

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Install a panic hook that records backtraces for panics inside hooks.
///
/// Panics outside a hook call go to the previously installed hook.
fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(|c| c.get()) {
                let trace = Backtrace::force_capture().to_string();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}

/// Run `f`, turning a panic into `Err((message, backtrace))`
pub(crate) fn catch_hook_panic<T, F>(f: F) -> Result<T, (String, Option<String>)>
where
    F: FnOnce() -> T,
{
    install_panic_hook();
    let was_capturing = CAPTURING.with(|c| c.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|c| c.set(was_capturing));
    result.map_err(|payload| {
        let backtrace = LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());
        (panic_message(payload.as_ref()), backtrace)
    })
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered registry of submodules
pub struct Pipeline {
    entries: Vec<SubmoduleEntry>,
    state: PipelineState,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("entries", &self.entries)
            .finish()
    }
}

impl Pipeline {
    /// Empty pipeline accepting registrations
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            state: PipelineState::Registered,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Registered submodules in dispatch order
    pub fn entries(&self) -> &[SubmoduleEntry] {
        &self.entries
    }

    /// Enabled submodules in dispatch order
    pub fn enabled_entries(&self) -> Vec<SubmoduleEntry> {
        self.entries.iter().filter(|e| e.enabled).cloned().collect()
    }

    /// Add a submodule at the end of the dispatch order
    ///
    /// # Errors
    ///
    /// - `InvalidState` once `prepare` has run
    /// - `PrefixConflict` if the name is a string-prefix of an existing name
    ///   or vice versa (this includes duplicates)
    pub fn register(
        &mut self,
        module: Arc<dyn Submodule>,
        config: toml::Table,
        enabled: bool,
    ) -> IndexerResult<()> {
        self.expect_state(PipelineState::Registered, "register a submodule")?;
        let name = module.name().to_string();
        if name.is_empty() {
            return Err(IndexerError::config("submodule name must not be empty"));
        }
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.name().starts_with(&name) || name.starts_with(e.name()))
        {
            return Err(IndexerError::PrefixConflict {
                existing: existing.name().to_string(),
                new: name,
            });
        }
        info!(submodule = %name, version = module.version(), enabled, "registered submodule");
        self.entries.push(SubmoduleEntry {
            module,
            config: Arc::new(config),
            enabled,
        });
        Ok(())
    }

    // ========================================================================
    // Dispatch Internals
    // ========================================================================

    fn expect_state(&self, want: PipelineState, action: &str) -> IndexerResult<()> {
        if self.state != want {
            return Err(IndexerError::invalid_state(format!(
                "cannot {} in state {:?}",
                action, self.state
            )));
        }
        Ok(())
    }

    fn dispatch<F>(&self, phase: Phase, height: Height, store: &dyn KvStore, hook: F) -> DispatchReport
    where
        F: Fn(&dyn Submodule, &HookContext<'_>) -> IndexerResult<()>,
    {
        let mut report = DispatchReport::new(phase, height);
        for entry in self.entries.iter().filter(|e| e.enabled) {
            report.dispatched += 1;
            if let Some(failure) = entry.run(phase, height, store, &hook) {
                report.failures.push(failure);
            }
        }
        debug!(
            phase = %phase,
            height,
            dispatched = report.dispatched,
            failed = report.failures.len(),
            "dispatched hook"
        );
        report
    }

    /// Run `prepare` on every enabled submodule
    ///
    /// Any failure aborts setup.
    pub fn prepare(&mut self, store: &dyn KvStore) -> IndexerResult<DispatchReport> {
        self.expect_state(PipelineState::Registered, "prepare")?;
        let report = self
            .dispatch(Phase::Prepare, 0, store, |m, ctx| m.prepare(ctx))
            .into_setup_result()?;
        self.state = PipelineState::Prepared;
        Ok(report)
    }

    /// Run `initialize` on every enabled submodule
    ///
    /// Any failure aborts setup.
    pub fn initialize(&mut self, store: &dyn KvStore) -> IndexerResult<DispatchReport> {
        self.expect_state(PipelineState::Prepared, "initialize")?;
        let report = self
            .dispatch(Phase::Initialize, 0, store, |m, ctx| m.initialize(ctx))
            .into_setup_result()?;
        self.state = PipelineState::Initialized;
        Ok(report)
    }

    /// Dispatch `finalize_block`
    pub fn finalize_block(
        &self,
        store: &dyn KvStore,
        req: &BlockRequest,
        res: &BlockResponse,
    ) -> IndexerResult<DispatchReport> {
        self.expect_state(PipelineState::Initialized, "finalize a block")?;
        Ok(self.dispatch(Phase::FinalizeBlock, req.height, store, |m, ctx| {
            m.finalize_block(ctx, req, res)
        }))
    }

    /// Dispatch `commit`
    pub fn commit(
        &self,
        store: &dyn KvStore,
        height: Height,
        res: &CommitResponse,
        changes: &[KvChange],
    ) -> IndexerResult<DispatchReport> {
        self.expect_state(PipelineState::Initialized, "commit a block")?;
        Ok(self.dispatch(Phase::Commit, height, store, |m, ctx| {
            m.commit(ctx, res, changes)
        }))
    }

    /// Stop dispatching
    pub fn close(&mut self) {
        self.state = PipelineState::Closed;
    }
}
