//! Computation nodes.
//!
//! A computation is a re-runnable unit of work with its own dependency
//! set, priority and lifecycle state. Computed values, effects and
//! resources are all computations; they differ only in how the scheduler
//! treats them, which is a single `match` on [`NodeKind`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use crate::error::ExecutionError;
use crate::graph::{ComputationId, ComputationState, NodeKind, OwnerId, Priority, SignalId};

/// Type-erased work function.
pub(crate) type Work = Rc<RefCell<dyn FnMut() -> Result<(), ExecutionError>>>;

/// Callback receiving errors from a computation or an owner's subtree.
pub(crate) type ErrorHandler = Rc<dyn Fn(&ExecutionError)>;

/// Custom scheduler for effects invalidated outside a batch.
pub(crate) type SchedulerFn = Rc<dyn Fn(Runnable)>;

/// A computation in the runtime's arena.
pub(crate) struct ComputationNode {
    pub kind: NodeKind,
    pub state: ComputationState,
    pub priority: Priority,
    /// Optional computations are skipped quietly when caught in a cycle.
    pub optional: bool,
    pub label: Option<String>,
    /// The owner that disposes this computation.
    pub owner: Option<OwnerId>,
    /// Owns whatever the last run created; replaced on every run.
    pub sub_owner: Option<OwnerId>,
    pub work: Option<Work>,
    /// Signal holding the value, for computed values and resources.
    pub output: Option<SignalId>,
    pub error_handler: Option<ErrorHandler>,
    pub scheduler: Option<SchedulerFn>,
    pub last_flush_version: u64,
    pub run_count: usize,
}

impl ComputationNode {
    pub fn new(kind: NodeKind, owner: Option<OwnerId>, options: ComputationOptions) -> Self {
        let priority = match kind {
            NodeKind::Computed => Priority::Sync,
            _ => options.priority.unwrap_or_default(),
        };
        Self {
            kind,
            state: ComputationState::Idle,
            priority,
            optional: options.optional,
            label: options.label,
            owner,
            sub_owner: None,
            work: None,
            output: None,
            error_handler: options.on_error,
            scheduler: options.scheduler,
            last_flush_version: 0,
            run_count: 0,
        }
    }
}

/// Settings for a new computation.
///
/// ```rust,ignore
/// let effect = rt.create_effect_with(
///     ComputationOptions::new()
///         .label("render")
///         .priority(Priority::High)
///         .on_error(|err| eprintln!("render failed: {err}")),
///     move || draw(state.get()),
/// );
/// ```
#[derive(Default, Clone)]
pub struct ComputationOptions {
    label: Option<String>,
    priority: Option<Priority>,
    optional: bool,
    on_error: Option<ErrorHandler>,
    scheduler: Option<SchedulerFn>,
}

impl ComputationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name shown in logs and graph snapshots.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Effect-phase priority. Computed values always use [`Priority::Sync`].
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Mark the computation optional: if it is caught in a cycle it is
    /// skipped quietly instead of going through the cycle policy.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Receive this computation's errors instead of the owner boundary.
    pub fn on_error(mut self, handler: impl Fn(&ExecutionError) + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }

    /// Hand runs triggered outside a batch to `scheduler` instead of
    /// running them inline. Only effects and resources consult it.
    pub fn scheduler(mut self, scheduler: impl Fn(Runnable) + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }
}

impl fmt::Debug for ComputationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationOptions")
            .field("label", &self.label)
            .field("priority", &self.priority)
            .field("optional", &self.optional)
            .field("on_error", &self.on_error.is_some())
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// A pending run handed to a custom scheduler.
///
/// Running it after the computation was disposed, or after something else
/// already brought it up to date, does nothing.
#[must_use = "a runnable does nothing unless run"]
pub struct Runnable {
    runtime: Runtime,
    id: ComputationId,
}

impl Runnable {
    pub(crate) fn new(runtime: Runtime, id: ComputationId) -> Self {
        Self { runtime, id }
    }

    /// The computation this run belongs to.
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// Run the computation if it is still stale.
    pub fn run(self) {
        self.runtime.run_if_stale(self.id);
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Runnable").field(&self.id).finish()
    }
}

impl Runtime {
    /// Allocate a computation under the active owner. Its work is installed
    /// separately so the closure can capture the id.
    pub(crate) fn insert_computation(
        &self,
        kind: NodeKind,
        options: ComputationOptions,
    ) -> ComputationId {
        let mut st = self.state();
        let st = &mut *st;
        let owner = st.owner.filter(|&owner| st.owners.contains_key(owner));
        let id = st
            .computations
            .insert(ComputationNode::new(kind, owner, options));
        st.graph.insert_computation(id);

        match owner {
            Some(owner) => st.owners[owner].adopt_computation(id),
            None => tracing::debug!(
                computation = ?id,
                "computation created outside an owner; it lives until disposed explicitly"
            ),
        }
        id
    }

    pub(crate) fn install_work(&self, id: ComputationId, work: Work, output: Option<SignalId>) {
        if let Some(node) = self.state().computations.get_mut(id) {
            node.work = Some(work);
            node.output = output;
        }
    }

    /// Current lifecycle state; `Disposed` once the node is gone.
    pub(crate) fn computation_state(&self, id: ComputationId) -> ComputationState {
        self.state()
            .computations
            .get(id)
            .map_or(ComputationState::Disposed, |node| node.state)
    }

    pub(crate) fn run_count(&self, id: ComputationId) -> usize {
        self.state()
            .computations
            .get(id)
            .map_or(0, |node| node.run_count)
    }

    pub(crate) fn computation_label(&self, id: ComputationId) -> Option<String> {
        self.state()
            .computations
            .get(id)
            .and_then(|node| node.label.clone())
    }

    /// Run `id` now if it is stale. Used by custom schedulers and `tick`.
    pub(crate) fn run_if_stale(&self, id: ComputationId) {
        if self.computation_state(id) != ComputationState::Stale {
            return;
        }
        self.with_invalidation_depth(|| {
            if let Err(err) = self.run_computation(id) {
                self.report_error(id, err.into());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn computed_values_are_always_sync_priority() {
        let node = ComputationNode::new(
            NodeKind::Computed,
            None,
            ComputationOptions::new().priority(Priority::Low),
        );
        assert_eq!(node.priority, Priority::Sync);

        let effect = ComputationNode::new(NodeKind::Effect, None, ComputationOptions::new());
        assert_eq!(effect.priority, Priority::Normal);
        assert_eq!(effect.state, ComputationState::Idle);
    }

    #[test]
    fn runnable_skips_disposed_computations() {
        let rt = Runtime::new();
        let runs = Rc::new(Cell::new(0));
        let held: Rc<RefCell<Vec<Runnable>>> = Rc::default();

        let signal = rt.create_signal(0);
        let s = signal.clone();
        let r = runs.clone();
        let queue = held.clone();
        let effect = rt.create_effect_with(
            ComputationOptions::new().scheduler(move |run| queue.borrow_mut().push(run)),
            move || {
                s.get();
                r.set(r.get() + 1);
                Ok::<(), std::convert::Infallible>(())
            },
        );
        assert_eq!(runs.get(), 1);

        effect.invalidate();
        assert_eq!(held.borrow().len(), 1);

        effect.dispose();
        for run in held.borrow_mut().drain(..) {
            run.run();
        }
        assert_eq!(runs.get(), 1);
    }
}
