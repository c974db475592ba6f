//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computed
//! values and effects. It owns the dependency graph, the batch context, the
//! owner tree and the tracking stack, and schedules updates when signals
//! change.
//!
//! # How It Works
//!
//! 1. When a computation reads a signal, the runtime records the edge on
//!    both sides of the dependency graph.
//!
//! 2. When a signal's value changes, the runtime:
//!    a. Queues the signal in the batch context (opening an implicit batch
//!       if none is active)
//!    b. At the end of the outermost batch, flushes:
//!       - invalidates the signal's dependents
//!       - runs pending computed values in topological order
//!       - runs pending effects by priority
//!       - runs listener callbacks
//!
//! 3. Reading a computed value that is still stale recomputes it on the
//!    spot, so reads never observe a half-propagated graph.
//!
//! # Thread Safety
//!
//! None. A runtime lives on one thread; all state sits behind a single
//! `RefCell` that is never borrowed while user code runs.

use std::cell::{RefCell, RefMut};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexSet;
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::computation::{ComputationNode, ErrorHandler, SchedulerFn};
use super::computation::Runnable;
use super::context::TrackingStack;
use super::owner::{OwnedNode, OwnerNode};
use super::resolver::{Admission, CycleResolver};
use super::signal::SignalCell;
use crate::config::RuntimeConfig;
use crate::error::{panic_message, CircularDependencyError, ExecutionError};
use crate::graph::{
    BatchContext, ComputationId, ComputationState, DependencyGraph, NodeKind, OwnerId, Priority,
    SignalId,
};

/// Everything one runtime knows.
pub(crate) struct State {
    pub signals: SlotMap<SignalId, SignalCell>,
    pub computations: SlotMap<ComputationId, ComputationNode>,
    pub owners: SlotMap<OwnerId, OwnerNode>,
    /// Root owners in creation order.
    pub roots: IndexSet<OwnerId>,
    pub graph: DependencyGraph,
    pub batch: BatchContext,
    pub tracking: TrackingStack,
    /// Owner new nodes attach to.
    pub owner: Option<OwnerId>,
    pub resolver: CycleResolver,
    /// Incremented at the start of every flush pass.
    pub flush_version: u64,
    /// Nesting of immediate (unbatched) effect runs.
    pub invalidation_depth: usize,
    /// Runs postponed by the loop-breaker, drained by `tick`.
    pub deferred: IndexSet<ComputationId>,
    /// Nesting of pull-on-read scopes.
    pub pull_depth: usize,
    /// Computed values already brought up to date by the open pull.
    pub pulled: IndexSet<ComputationId>,
}

impl State {
    fn new(config: &RuntimeConfig) -> Self {
        Self {
            signals: SlotMap::with_key(),
            computations: SlotMap::with_key(),
            owners: SlotMap::with_key(),
            roots: IndexSet::new(),
            graph: DependencyGraph::new(),
            batch: BatchContext::new(),
            tracking: TrackingStack::new(),
            owner: None,
            resolver: CycleResolver::new(config.cycle_history),
            flush_version: 0,
            invalidation_depth: 0,
            deferred: IndexSet::new(),
            pull_depth: 0,
            pulled: IndexSet::new(),
        }
    }

    /// Nearest error boundary at or above `owner`.
    pub fn boundary_for(&self, mut owner: Option<OwnerId>) -> Option<ErrorHandler> {
        while let Some(id) = owner {
            let node = self.owners.get(id)?;
            if let Some(handler) = &node.error_handler {
                return Some(handler.clone());
            }
            owner = node.parent;
        }
        None
    }

    /// Drop a disposed node from its owner's children, if the owner is
    /// still alive.
    pub fn release_child(&mut self, owner: OwnerId, child: OwnedNode) {
        if let Some(owner) = self.owners.get_mut(owner) {
            owner.children.retain(|c| *c != child);
        }
    }
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    state: RefCell<State>,
}

/// A reactive runtime.
///
/// Every signal, computation and owner belongs to exactly one runtime.
/// Cloning a `Runtime` is cheap and yields another handle to the same
/// instance, so independent runtimes (one per test, say) never interact.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let b = rt.create_signal(2);
/// let bc = rt.create_computed({
///     let b = b.clone();
///     move || b.get() * 2
/// });
/// assert_eq!(bc.get(), 4);
///
/// b.set(3);
/// assert_eq!(bc.get(), 6);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let state = RefCell::new(State::new(&config));
        Self {
            inner: Rc::new(RuntimeInner { config, state }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn state(&self) -> RefMut<'_, State> {
        self.inner.state.borrow_mut()
    }

    /// For drop guards, which must not panic while unwinding.
    pub(crate) fn try_state(&self) -> Option<RefMut<'_, State>> {
        self.inner.state.try_borrow_mut().ok()
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Run `f` with writes coalesced; flush when the outermost batch ends.
    ///
    /// Nested calls only adjust the depth counter.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = BatchGuard::open(self);
        let result = f();
        guard.close();
        result
    }

    /// Whether writes are currently being queued.
    pub fn is_batching(&self) -> bool {
        self.state().batch.is_active()
    }

    /// Whether a signal read right now would be recorded as a dependency.
    pub fn is_tracking(&self) -> bool {
        self.state().tracking.is_tracking()
    }

    /// Run `f` without recording dependencies for the current computation.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = FrameGuard::push(self, None);
        f()
    }

    /// Run work the loop-breaker deferred.
    ///
    /// Hosts with an event loop call this once per turn. Returns how many
    /// computations were picked up.
    pub fn tick(&self) -> usize {
        let deferred: Vec<ComputationId> = self.state().deferred.drain(..).collect();
        if deferred.is_empty() {
            return 0;
        }

        let count = deferred.len();
        tracing::trace!(count, "resuming deferred computations");
        self.batch(|| {
            let mut st = self.state();
            let st = &mut *st;
            for id in deferred {
                let Some(node) = st.computations.get(id) else {
                    continue;
                };
                if node.state != ComputationState::Stale {
                    continue;
                }
                match node.kind {
                    NodeKind::Computed => st.batch.queue_computed(id),
                    _ => st.batch.queue_effect(id),
                };
            }
        });
        count
    }

    /// Whether the loop-breaker left work for [`tick`](Self::tick).
    pub fn has_deferred(&self) -> bool {
        !self.state().deferred.is_empty()
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Record a read of `signal` by the current computation, if any.
    pub(crate) fn track(&self, signal: SignalId) {
        let mut st = self.state();
        if let Some(computation) = st.tracking.current() {
            st.graph.link(signal, computation);
        }
    }

    /// Queue a changed signal, flushing right away when no batch is open.
    pub(crate) fn signal_changed(&self, signal: SignalId) {
        let guard = BatchGuard::open(self);
        self.state().batch.signal_changed(signal);
        guard.close();
    }

    /// Bring a computed value up to date before it is read.
    ///
    /// While changes are still queued, the producers `id` read last time
    /// are settled first so that `id` learns whether it is stale.
    pub(crate) fn ensure_fresh(&self, id: ComputationId) {
        if !self.state().batch.has_pending_changes() {
            self.refresh(id);
            return;
        }
        let _pull = PullScope::enter(self);
        self.pull_upstream(id);
        self.refresh(id);
    }

    /// Settle every computed value upstream of `id`, producers first.
    ///
    /// The walk uses an explicit worklist so chain length never turns into
    /// stack depth. Nodes settled earlier in the same pull are not walked
    /// again, which keeps the nested reads made by each refresh shallow.
    fn pull_upstream(&self, id: ComputationId) {
        self.propagate_signals();
        let upstream = {
            let mut st = self.state();
            let st = &mut *st;
            if !st.pulled.insert(id) {
                return;
            }

            let mut upstream = IndexSet::new();
            let mut stack: SmallVec<[ComputationId; 8]> = SmallVec::new();
            stack.push(id);
            while let Some(node) = stack.pop() {
                for signal in st.graph.sources(node) {
                    let Some(producer) = st.signals.get(signal).and_then(|cell| cell.producer)
                    else {
                        continue;
                    };
                    let computed = st
                        .computations
                        .get(producer)
                        .is_some_and(|node| node.kind == NodeKind::Computed);
                    if !computed
                        || st.pulled.contains(&producer)
                        || st.resolver.in_flight().contains(&producer)
                    {
                        continue;
                    }
                    if upstream.insert(producer) {
                        stack.push(producer);
                    }
                }
            }
            let st = &*st;
            st.graph.order_pending(&upstream, |signal| {
                st.signals.get(signal).and_then(|cell| cell.producer)
            })
        };

        for producer in upstream {
            self.state().pulled.insert(producer);
            self.propagate_signals();
            self.refresh(producer);
        }
        self.propagate_signals();
    }

    fn refresh(&self, id: ComputationId) {
        let state = self.computation_state(id);
        if !matches!(state, ComputationState::Stale | ComputationState::Running) {
            return;
        }

        if let Err(err) = self.run_computation(id) {
            let unclaimed = self.state().tracking.record_error(err);
            if let Err(err) = unclaimed {
                self.report_error(id, err.into());
            }
        }
    }

    /// Fail the current run if a cycle was rejected while it was reading.
    pub(crate) fn check_frame(&self) -> Result<(), ExecutionError> {
        match self.state().tracking.take_error() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// A dependency of `id` changed.
    pub(crate) fn invalidate(&self, id: ComputationId) {
        enum Next {
            Nothing,
            Run,
            Schedule(SchedulerFn),
        }

        let max_depth = self.inner.config.max_reentrant_depth;
        let next = {
            let mut st = self.state();
            let st = &mut *st;
            let batching = st.batch.is_active();
            let depth = st.invalidation_depth;
            let Some(node) = st.computations.get_mut(id) else {
                return;
            };
            if matches!(node.state, ComputationState::Stale | ComputationState::Disposed) {
                return;
            }
            node.state = ComputationState::Stale;

            match node.kind {
                NodeKind::Computed if batching => {
                    st.batch.queue_computed(id);
                    Next::Nothing
                }
                NodeKind::Computed => Next::Run,
                NodeKind::Effect | NodeKind::Resource => {
                    if batching {
                        st.batch.queue_effect(id);
                        Next::Nothing
                    } else if let Some(scheduler) = node.scheduler.clone() {
                        Next::Schedule(scheduler)
                    } else if depth >= max_depth {
                        tracing::warn!(
                            computation = ?id,
                            depth,
                            "re-entrant invalidation too deep, deferring run to the next tick"
                        );
                        st.deferred.insert(id);
                        Next::Nothing
                    } else {
                        Next::Run
                    }
                }
                NodeKind::Signal => Next::Nothing,
            }
        };

        match next {
            Next::Nothing => {}
            Next::Run => self.with_invalidation_depth(|| {
                if let Err(err) = self.run_computation(id) {
                    self.report_error(id, err.into());
                }
            }),
            Next::Schedule(scheduler) => scheduler(Runnable::new(self.clone(), id)),
        }
    }

    pub(crate) fn with_invalidation_depth(&self, f: impl FnOnce()) {
        self.state().invalidation_depth += 1;
        f();
        let mut st = self.state();
        st.invalidation_depth = st.invalidation_depth.saturating_sub(1);
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    /// Drain every pending phase. Only the outermost batch calls this.
    fn flush(&self) {
        {
            let mut st = self.state();
            if st.batch.is_flushing() {
                return;
            }
            st.batch.set_flushing(true);
        }
        let _flushing = FlushGuard { runtime: self };

        let max_passes = self.inner.config.max_flush_passes;
        let mut passes = 0;
        loop {
            let version = {
                let mut st = self.state();
                st.flush_version += 1;
                st.flush_version
            };
            tracing::trace!(version, "flush pass");

            // (a) + (b): propagate signal changes and settle computed values
            loop {
                self.propagate_signals();
                let order = {
                    let mut st = self.state();
                    let pending = st.batch.take_computed();
                    if pending.is_empty() {
                        break;
                    }
                    let st = &*st;
                    st.graph.order_pending(&pending, |signal| {
                        st.signals.get(signal).and_then(|cell| cell.producer)
                    })
                };
                for id in order {
                    self.run_scheduled(id, version);
                }
            }

            // (c): effects by priority
            let effects = {
                let mut st = self.state();
                let st = &mut *st;
                let computations = &st.computations;
                st.batch.take_effects(|id| {
                    computations
                        .get(id)
                        .map_or(Priority::Idle, |node| node.priority)
                })
            };
            for id in effects {
                self.run_scheduled(id, version);
            }

            // (d): listener callbacks
            let callbacks = self.state().batch.take_callbacks();
            for callback in callbacks {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                    tracing::error!(
                        error = %panic_message(payload.as_ref()),
                        "signal listener panicked"
                    );
                }
            }

            if self.state().batch.is_empty() {
                break;
            }
            passes += 1;
            if passes >= max_passes {
                self.defer_pending(passes);
                break;
            }
        }
    }

    /// Phase (a): invalidate the dependents of every changed signal and
    /// queue its listeners.
    fn propagate_signals(&self) {
        let signals = self.state().batch.take_signals();
        for signal in signals {
            // Collect dependents, then release the borrow before invalidating
            let subscribers = {
                let mut st = self.state();
                let st = &mut *st;
                if let Some(cell) = st.signals.get(signal) {
                    for (&id, callback) in &cell.listeners {
                        st.batch.queue_callback(id, callback.clone());
                    }
                }
                st.graph.subscribers(signal)
            };
            for computation in subscribers {
                self.invalidate(computation);
            }
        }
    }

    /// Loop-breaker for flushes that keep producing work.
    fn defer_pending(&self, passes: usize) {
        self.propagate_signals();
        let mut st = self.state();
        let pending = st.batch.drain_computations();
        let callbacks = st.batch.take_callbacks();
        tracing::warn!(
            passes,
            deferred = pending.len(),
            "flush did not settle, deferring remaining work to the next tick"
        );
        st.deferred.extend(pending);
        drop(st);
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                tracing::error!(error = %panic_message(payload.as_ref()), "signal listener panicked");
            }
        }
    }

    /// Run a computation the flush picked up, unless it already ran in
    /// this flush version.
    ///
    /// Effects with a custom scheduler are handed to it and stay stale
    /// until the scheduler runs them.
    fn run_scheduled(&self, id: ComputationId, version: u64) {
        let scheduler = {
            let mut st = self.state();
            let Some(node) = st.computations.get_mut(id) else {
                return;
            };
            if node.state != ComputationState::Stale {
                return;
            }
            if node.last_flush_version == version {
                node.state = ComputationState::Idle;
                tracing::trace!(computation = ?id, version, "already ran in this flush, skipping");
                return;
            }
            if node.kind.is_effect_like() {
                node.scheduler.clone()
            } else {
                None
            }
        };
        match scheduler {
            Some(scheduler) => scheduler(Runnable::new(self.clone(), id)),
            None => {
                if let Err(err) = self.run_computation(id) {
                    self.report_error(id, err.into());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute a computation's work.
    ///
    /// Returns an error only when the resolver rejected the run because the
    /// computation is already in flight; the caller decides who sees it.
    /// Errors raised by the work itself are reported here.
    pub(crate) fn run_computation(&self, id: ComputationId) -> Result<(), CircularDependencyError> {
        let admission = {
            let mut st = self.state();
            let st = &mut *st;
            let Some(node) = st.computations.get(id) else {
                return Ok(());
            };
            st.resolver
                .enter(id, node.optional, self.inner.config.cycle_policy)
        };
        match admission {
            Admission::Proceed => {}
            Admission::Skip => return Ok(()),
            Admission::Reject(err) => return Err(err),
        }
        let exit = ResolverExit {
            runtime: self,
            id,
            done: false,
        };

        let prepared = {
            let mut st = self.state();
            let version = st.flush_version;
            match st.computations.get_mut(id) {
                Some(node) => node.work.clone().map(|work| {
                    node.state = ComputationState::Running;
                    node.last_flush_version = version;
                    node.run_count += 1;
                    (work, node.sub_owner.take())
                }),
                None => None,
            }
        };
        let Some((work, previous)) = prepared else {
            return Ok(());
        };

        // Cleanups registered by the previous run go first
        if let Some(previous) = previous {
            self.dispose_owner_logged(previous);
        }

        let outer_owner = {
            let mut st = self.state();
            let st = &mut *st;
            st.graph.clear_sources(id);
            let parent = st.computations.get(id).and_then(|node| node.owner);
            let sub_owner = st.owners.insert(OwnerNode::new(parent));
            if let Some(node) = st.computations.get_mut(id) {
                node.sub_owner = Some(sub_owner);
            }
            st.tracking.push(Some(id));
            std::mem::replace(&mut st.owner, Some(sub_owner))
        };

        tracing::trace!(computation = ?id, "running computation");
        let batch = BatchGuard::open(self);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut work = work.borrow_mut();
            (&mut *work)()
        }));

        let circular = {
            let mut st = self.state();
            st.owner = outer_owner;
            let frame = st.tracking.pop();
            if let Some(node) = st.computations.get_mut(id) {
                if node.state == ComputationState::Running {
                    node.state = ComputationState::Idle;
                }
            }
            frame.and_then(|frame| frame.error)
        };
        exit.finish();

        let error = match outcome {
            Ok(Ok(())) => circular.map(ExecutionError::from),
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(ExecutionError::Panicked(panic_message(payload.as_ref()))),
        };
        if let Some(err) = error {
            self.report_error(id, err);
        }

        batch.close();
        Ok(())
    }

    /// Route an execution error to the computation's handler, else the
    /// nearest owner boundary, else the log.
    pub(crate) fn report_error(&self, id: ComputationId, err: ExecutionError) {
        let handler = {
            let st = self.state();
            st.computations.get(id).and_then(|node| {
                node.error_handler
                    .clone()
                    .or_else(|| st.boundary_for(node.owner))
            })
        };

        match handler {
            Some(handler) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(&err))) {
                    tracing::error!(
                        computation = ?id,
                        error = %err,
                        panic = %panic_message(payload.as_ref()),
                        "error handler panicked"
                    );
                }
            }
            None => tracing::error!(
                computation = ?id,
                error = %err,
                "unhandled error in reactive computation"
            ),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.state.try_borrow() {
            Ok(st) => f
                .debug_struct("Runtime")
                .field("signals", &st.signals.len())
                .field("computations", &st.computations.len())
                .field("owners", &st.owners.len())
                .field("tracking_depth", &st.tracking.depth())
                .field("batch", &st.batch)
                .finish(),
            Err(_) => f.debug_struct("Runtime").finish_non_exhaustive(),
        }
    }
}

// ----------------------------------------------------------------------------
// Guards
// ----------------------------------------------------------------------------

/// Holds a batch level open. `close` flushes if it was the outermost;
/// dropping without closing (a panic) only restores the depth.
struct BatchGuard<'a> {
    runtime: &'a Runtime,
    armed: bool,
}

impl<'a> BatchGuard<'a> {
    fn open(runtime: &'a Runtime) -> Self {
        runtime.state().batch.enter();
        Self {
            runtime,
            armed: true,
        }
    }

    fn close(mut self) {
        self.armed = false;
        let flush = self.runtime.state().batch.exit();
        if flush {
            self.runtime.flush();
        }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut st) = self.runtime.inner.state.try_borrow_mut() {
                st.batch.exit();
            }
        }
    }
}

/// Clears the flushing flag even if a flush unwinds.
struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut st) = self.runtime.inner.state.try_borrow_mut() {
            st.batch.set_flushing(false);
        }
    }
}

/// Pops a tracking frame on drop.
pub(crate) struct FrameGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> FrameGuard<'a> {
    pub(crate) fn push(runtime: &'a Runtime, computation: Option<ComputationId>) -> Self {
        runtime.state().tracking.push(computation);
        Self { runtime }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut st) = self.runtime.inner.state.try_borrow_mut() {
            st.tracking.pop();
        }
    }
}

/// Scopes the set of computed values a pull has already settled.
struct PullScope<'a> {
    runtime: &'a Runtime,
}

impl<'a> PullScope<'a> {
    fn enter(runtime: &'a Runtime) -> Self {
        runtime.state().pull_depth += 1;
        Self { runtime }
    }
}

impl Drop for PullScope<'_> {
    fn drop(&mut self) {
        if let Ok(mut st) = self.runtime.inner.state.try_borrow_mut() {
            st.pull_depth = st.pull_depth.saturating_sub(1);
            if st.pull_depth == 0 {
                st.pulled.clear();
            }
        }
    }
}

/// Pops the resolver stack whether or not the run succeeded.
struct ResolverExit<'a> {
    runtime: &'a Runtime,
    id: ComputationId,
    done: bool,
}

impl ResolverExit<'_> {
    fn finish(mut self) {
        self.done = true;
        self.runtime.state().resolver.exit(self.id);
    }
}

impl Drop for ResolverExit<'_> {
    fn drop(&mut self) {
        if !self.done {
            if let Ok(mut st) = self.runtime.inner.state.try_borrow_mut() {
                st.resolver.exit(self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::cell::Cell;

    #[test]
    fn nested_batches_flush_once_at_the_outermost() {
        let rt = Runtime::new();
        let signal = rt.create_signal(0);
        let runs = Rc::new(Cell::new(0));

        let s = signal.clone();
        let r = runs.clone();
        let _effect = rt.create_effect(move || {
            s.get();
            r.set(r.get() + 1);
        });

        rt.batch(|| {
            signal.set(1);
            rt.batch(|| signal.set(2));
            assert_eq!(runs.get(), 1, "inner batch must not flush");
            assert!(rt.is_batching());
        });

        assert_eq!(runs.get(), 2);
        assert!(!rt.is_batching());
    }

    #[test]
    fn untrack_does_not_record_dependencies() {
        let rt = Runtime::new();
        let tracked = rt.create_signal(1);
        let hidden = rt.create_signal(10);

        let t = tracked.clone();
        let h = hidden.clone();
        let rt2 = rt.clone();
        let sum = rt.create_computed(move || {
            assert!(rt2.is_tracking());
            t.get() + rt2.untrack(|| h.get())
        });
        assert_eq!(sum.get(), 11);

        hidden.set(20);
        assert_eq!(sum.get(), 11);
        assert_eq!(hidden.subscriber_count(), 0);

        tracked.set(2);
        assert_eq!(sum.get(), 22);
    }

    #[test]
    fn deep_immediate_invalidation_is_deferred() {
        let rt = Runtime::with_config(RuntimeConfig::default().max_reentrant_depth(2));
        let slots: Vec<Rc<RefCell<Option<Effect>>>> = (0..3).map(|_| Rc::default()).collect();
        let runs: Vec<Rc<Cell<usize>>> = (0..3).map(|_| Rc::default()).collect();

        // Each effect's cleanup invalidates the next one, so re-running the
        // first nests immediate runs outside of any batch.
        for i in 0..3 {
            let next = slots.get(i + 1).cloned();
            let r = runs[i].clone();
            let rt2 = rt.clone();
            let effect = rt.create_effect(move || {
                r.set(r.get() + 1);
                if let Some(next) = next.clone() {
                    rt2.on_cleanup(move || {
                        if let Some(effect) = next.borrow().as_ref() {
                            effect.invalidate();
                        }
                    });
                }
            });
            *slots[i].borrow_mut() = Some(effect);
        }
        let counts = || runs.iter().map(|r| r.get()).collect::<Vec<_>>();
        assert_eq!(counts(), vec![1, 1, 1]);

        if let Some(first) = slots[0].borrow().as_ref() {
            first.invalidate();
        }
        assert_eq!(counts(), vec![2, 2, 1]);
        assert!(rt.has_deferred());
        assert_eq!(rt.state().invalidation_depth, 0);

        assert_eq!(rt.tick(), 1);
        assert_eq!(counts(), vec![2, 2, 2]);
        assert!(!rt.has_deferred());
    }

    #[test]
    fn deep_chain_read_inside_a_batch_is_settled_iteratively() {
        let rt = Runtime::new();
        let head = rt.create_signal(0);
        let mut tail = {
            let head = head.clone();
            rt.create_computed(move || head.get() + 1)
        };
        for _ in 1..5000 {
            let prev = tail.clone();
            tail = rt.create_computed(move || prev.get() + 1);
        }
        assert_eq!(tail.get(), 5000);

        let read = rt.batch(|| {
            head.set(1);
            tail.get()
        });
        assert_eq!(read, 5001);
        assert!(rt.state().pulled.is_empty());

        head.set(2);
        assert_eq!(tail.get(), 5002);
        rt.dispose();
    }

    #[test]
    fn runaway_flush_is_cut_off_and_resumed_by_tick() {
        let rt = Runtime::with_config(RuntimeConfig::default().max_flush_passes(3));
        let counter = rt.create_signal(0);
        let runs = Rc::new(Cell::new(0));

        let c = counter.clone();
        let r = runs.clone();
        let _effect = rt.create_effect(move || {
            r.set(r.get() + 1);
            let next = c.get() + 1;
            if next <= 10 {
                c.set(next);
            }
        });

        // Creation run plus three bounded passes.
        assert_eq!(runs.get(), 4);
        assert!(rt.has_deferred());

        let mut ticks = 0;
        while rt.has_deferred() {
            rt.tick();
            ticks += 1;
            assert!(ticks < 10, "ticks must make progress");
        }
        assert_eq!(counter.get_untracked(), 10);
    }

    #[test]
    fn handles_compare_by_instance() {
        let a = Runtime::new();
        let b = Runtime::new();
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }
}
