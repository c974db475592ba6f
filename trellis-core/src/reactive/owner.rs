//! Owner Tree
//!
//! Owners scope lifetimes. Every computation, signal and nested owner
//! created while an owner is active belongs to it, and disposing the owner
//! tears all of them down along with any cleanup callbacks registered on
//! it.
//!
//! # How It Works
//!
//! 1. `create_root` makes a parentless owner and runs a closure with it
//!    active.
//!
//! 2. Each computation run gets a fresh sub-owner. Whatever the run
//!    creates (nested effects, `on_cleanup` callbacks) is attached to it,
//!    and is disposed right before the next run.
//!
//! 3. Disposal walks children in reverse creation order, then runs the
//!    owner's cleanups in reverse registration order. A panicking child or
//!    cleanup is recorded as a [`DisposalError`] and the rest still run.
//!
//! The parent link is only used to find error boundaries; ownership flows
//! strictly downwards.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use smallvec::SmallVec;

use super::computation::ErrorHandler;
use super::runtime::{FrameGuard, Runtime};
use crate::error::{panic_message, DisposalError, ExecutionError, ReactiveError};
use crate::graph::{ComputationId, OwnerId, SignalId};

/// Something an owner is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OwnedNode {
    Computation(ComputationId),
    Signal(SignalId),
    Owner(OwnerId),
}

/// An owner in the runtime's arena.
pub(crate) struct OwnerNode {
    pub parent: Option<OwnerId>,
    pub children: SmallVec<[OwnedNode; 4]>,
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    pub error_handler: Option<ErrorHandler>,
}

impl OwnerNode {
    pub fn new(parent: Option<OwnerId>) -> Self {
        Self {
            parent,
            children: SmallVec::new(),
            cleanups: Vec::new(),
            error_handler: None,
        }
    }

    pub fn adopt_computation(&mut self, id: ComputationId) {
        self.children.push(OwnedNode::Computation(id));
    }

    pub fn adopt_signal(&mut self, id: SignalId) {
        self.children.push(OwnedNode::Signal(id));
    }

    pub fn adopt_owner(&mut self, id: OwnerId) {
        self.children.push(OwnedNode::Owner(id));
    }
}

/// Handle to a node in the owner tree.
#[derive(Clone)]
pub struct Owner {
    id: OwnerId,
    runtime: Runtime,
}

impl Owner {
    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn is_disposed(&self) -> bool {
        !self.runtime.state().owners.contains_key(self.id)
    }

    /// Run `f` with this owner active.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        self.runtime.run_with_owner(self, f)
    }

    /// Create a nested owner. It is disposed with this one.
    pub fn child(&self) -> Result<Owner, ReactiveError> {
        let id = self.runtime.insert_owner(Some(self.id), None)?;
        Ok(Owner {
            id,
            runtime: self.runtime.clone(),
        })
    }

    /// Register a callback to run when this owner is disposed.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) -> Result<(), ReactiveError> {
        let mut st = self.runtime.state();
        let node = st
            .owners
            .get_mut(self.id)
            .ok_or(ReactiveError::OwnerDisposed(self.id))?;
        node.cleanups.push(Box::new(f));
        Ok(())
    }

    /// Tear down everything this owner holds.
    ///
    /// Failures are logged and returned; they never stop the rest of the
    /// subtree from being disposed. Disposing twice does nothing.
    pub fn dispose(&self) -> Vec<DisposalError> {
        let errors = self.runtime.dispose_owner(self.id);
        log_disposal_errors(&errors);
        errors
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Create a top-level owner and run `f` inside it.
    ///
    /// Nothing read inside `f` is tracked by an enclosing computation. The
    /// root lives until its `dispose` is called or the runtime is disposed.
    pub fn create_root<R>(&self, f: impl FnOnce(Owner) -> R) -> R {
        let id = {
            let mut st = self.state();
            let id = st.owners.insert(OwnerNode::new(None));
            st.roots.insert(id);
            id
        };
        let owner = Owner {
            id,
            runtime: self.clone(),
        };
        let _scope = OwnerScope::enter(self, Some(id));
        let _frame = FrameGuard::push(self, None);
        f(owner)
    }

    /// Run `f` with `owner` active, untracked.
    pub fn run_with_owner<R>(&self, owner: &Owner, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        if owner.is_disposed() {
            return Err(ReactiveError::OwnerDisposed(owner.id));
        }
        let _scope = OwnerScope::enter(self, Some(owner.id));
        let _frame = FrameGuard::push(self, None);
        Ok(f())
    }

    /// The currently active owner, if any.
    pub fn owner(&self) -> Option<Owner> {
        let st = self.state();
        st.owner
            .filter(|&id| st.owners.contains_key(id))
            .map(|id| Owner {
                id,
                runtime: self.clone(),
            })
    }

    /// Register `f` to run when the active owner is disposed.
    ///
    /// Inside a computation this is the run's sub-owner, so the callback
    /// fires before the next run and on disposal. Outside any owner the
    /// call is ignored.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        let mut st = self.state();
        let active = st.owner;
        match active.and_then(|id| st.owners.get_mut(id)) {
            Some(node) => node.cleanups.push(Box::new(f)),
            None => tracing::debug!("on_cleanup called outside an owner; ignoring"),
        }
    }

    /// Run `f` under a new owner whose subtree reports errors to `handler`.
    ///
    /// Computations created inside `f` that have no handler of their own
    /// route their failures here instead of to the log.
    pub fn catch_error<R>(
        &self,
        handler: impl Fn(&ExecutionError) + 'static,
        f: impl FnOnce() -> R,
    ) -> R {
        let parent = self.state().owner;
        let handler: ErrorHandler = Rc::new(handler);
        let id = match self.insert_owner(parent, Some(handler.clone())) {
            Ok(id) => id,
            // The active owner is already gone; make the boundary a root.
            Err(_) => match self.insert_owner(None, Some(handler)) {
                Ok(id) => id,
                Err(_) => return f(),
            },
        };
        let _scope = OwnerScope::enter(self, Some(id));
        f()
    }

    /// Dispose every root, every unowned computation and every remaining
    /// signal.
    ///
    /// Closures that capture handles keep the runtime alive through
    /// reference cycles; this breaks them.
    pub fn dispose(&self) {
        let roots: Vec<OwnerId> = self.state().roots.iter().rev().copied().collect();
        for root in roots {
            self.dispose_owner_logged(root);
        }

        let computations: Vec<ComputationId> = self.state().computations.keys().collect();
        for id in computations.into_iter().rev() {
            log_disposal_errors(&self.dispose_computation(id));
        }

        let owners: Vec<OwnerId> = self.state().owners.keys().collect();
        for id in owners {
            self.dispose_owner_logged(id);
        }

        let signals: Vec<SignalId> = self.state().signals.keys().collect();
        for id in signals {
            self.dispose_signal(id);
        }

        let mut st = self.state();
        st.deferred.clear();
        st.owner = None;
        tracing::debug!("runtime disposed");
    }

    /// Add an owner under `parent` (or as a root).
    pub(crate) fn insert_owner(
        &self,
        parent: Option<OwnerId>,
        error_handler: Option<ErrorHandler>,
    ) -> Result<OwnerId, ReactiveError> {
        let mut st = self.state();
        if let Some(parent) = parent {
            if !st.owners.contains_key(parent) {
                return Err(ReactiveError::OwnerDisposed(parent));
            }
        }

        let mut node = OwnerNode::new(parent);
        node.error_handler = error_handler;
        let id = st.owners.insert(node);
        match parent {
            Some(parent) => st.owners[parent].adopt_owner(id),
            None => {
                st.roots.insert(id);
            }
        }
        Ok(id)
    }

    /// Dispose an owner's subtree. Returns every failure encountered.
    pub(crate) fn dispose_owner(&self, id: OwnerId) -> Vec<DisposalError> {
        let node = {
            let mut st = self.state();
            let Some(node) = st.owners.remove(id) else {
                return Vec::new();
            };
            st.roots.shift_remove(&id);
            if let Some(parent) = node.parent {
                st.release_child(parent, OwnedNode::Owner(id));
            }
            node
        };
        tracing::trace!(owner = ?id, children = node.children.len(), "disposing owner");

        let mut errors = Vec::new();
        for child in node.children.into_iter().rev() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| match child {
                OwnedNode::Computation(child) => self.dispose_computation(child),
                OwnedNode::Signal(child) => {
                    self.dispose_signal(child);
                    Vec::new()
                }
                OwnedNode::Owner(child) => self.dispose_owner(child),
            }));
            match result {
                Ok(nested) => errors.extend(nested),
                Err(payload) => errors.push(DisposalError::Child {
                    owner: id,
                    message: panic_message(payload.as_ref()),
                }),
            }
        }

        for cleanup in node.cleanups.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                errors.push(DisposalError::Cleanup {
                    owner: id,
                    message: panic_message(payload.as_ref()),
                });
            }
        }
        errors
    }

    pub(crate) fn dispose_owner_logged(&self, id: OwnerId) {
        log_disposal_errors(&self.dispose_owner(id));
    }

    /// Remove a computation from the graph, the batch, the deferred queue,
    /// the arena and its owner's children, then dispose what it owns.
    pub(crate) fn dispose_computation(&self, id: ComputationId) -> Vec<DisposalError> {
        let node = {
            let mut st = self.state();
            let st = &mut *st;
            st.graph.remove_computation(id);
            st.batch.forget_computation(id);
            st.deferred.shift_remove(&id);
            let node = st.computations.remove(id);
            if let Some(owner) = node.as_ref().and_then(|node| node.owner) {
                st.release_child(owner, OwnedNode::Computation(id));
            }
            node
        };
        let Some(node) = node else {
            return Vec::new();
        };
        tracing::trace!(computation = ?id, kind = ?node.kind, "disposing computation");

        let errors = match node.sub_owner {
            Some(sub_owner) => self.dispose_owner(sub_owner),
            None => Vec::new(),
        };
        if let Some(output) = node.output {
            self.dispose_signal(output);
        }
        // Dropping the work closure may drop handles; the state is unborrowed.
        drop(node);
        errors
    }
}

fn log_disposal_errors(errors: &[DisposalError]) {
    for err in errors {
        tracing::error!(error = %err, "disposal failed");
    }
}

/// Makes an owner active for a scope and restores the previous one.
pub(crate) struct OwnerScope<'a> {
    runtime: &'a Runtime,
    previous: Option<OwnerId>,
}

impl<'a> OwnerScope<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, owner: Option<OwnerId>) -> Self {
        let previous = std::mem::replace(&mut runtime.state().owner, owner);
        Self { runtime, previous }
    }
}

impl Drop for OwnerScope<'_> {
    fn drop(&mut self) {
        if let Some(mut st) = self.runtime.try_state() {
            st.owner = self.previous;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn cleanups_run_in_reverse_order() {
        let rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let owner = rt.create_root(|owner| {
            for i in 0..3 {
                let log = log.clone();
                rt.on_cleanup(move || log.borrow_mut().push(i));
            }
            owner
        });
        assert!(log.borrow().is_empty());

        let errors = owner.dispose();
        assert!(errors.is_empty());
        assert_eq!(*log.borrow(), vec![2, 1, 0]);
        assert!(owner.is_disposed());
    }

    #[test]
    fn children_are_disposed_before_own_cleanups() {
        let rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let owner = rt.create_root(|owner| {
            let l = log.clone();
            rt.on_cleanup(move || l.borrow_mut().push("root"));

            let first = owner.child().unwrap();
            let l = log.clone();
            first.on_cleanup(move || l.borrow_mut().push("first")).unwrap();

            let second = owner.child().unwrap();
            let l = log.clone();
            second.on_cleanup(move || l.borrow_mut().push("second")).unwrap();
            owner
        });

        owner.dispose();
        assert_eq!(*log.borrow(), vec!["second", "first", "root"]);
    }

    #[test]
    fn panicking_cleanup_does_not_stop_siblings() {
        let rt = Runtime::new();
        let ran = Rc::new(Cell::new(0));

        let owner = rt.create_root(|owner| {
            let r = ran.clone();
            rt.on_cleanup(move || r.set(r.get() + 1));
            rt.on_cleanup(|| panic!("cleanup exploded"));
            let r = ran.clone();
            rt.on_cleanup(move || r.set(r.get() + 1));
            owner
        });

        let errors = owner.dispose();
        assert_eq!(ran.get(), 2);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            DisposalError::Cleanup { message, .. } if message == "cleanup exploded"
        ));
    }

    #[test]
    fn on_cleanup_outside_an_owner_is_ignored() {
        let rt = Runtime::new();
        assert!(rt.owner().is_none());
        rt.on_cleanup(|| panic!("never runs"));
        rt.dispose();
    }

    #[test]
    fn disposal_stops_owned_effects() {
        let rt = Runtime::new();
        let signal = rt.create_signal(0);
        let runs = Rc::new(Cell::new(0));

        let owner = rt.create_root(|owner| {
            let s = signal.clone();
            let r = runs.clone();
            rt.create_effect(move || {
                s.get();
                r.set(r.get() + 1);
            });
            owner
        });
        assert_eq!(runs.get(), 1);
        assert_eq!(signal.subscriber_count(), 1);

        owner.dispose();
        assert_eq!(signal.subscriber_count(), 0);

        signal.set(1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_cleanups_run_before_each_rerun() {
        let rt = Runtime::new();
        let signal = rt.create_signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let s = signal.clone();
        let l = log.clone();
        let rt2 = rt.clone();
        let effect = rt.create_effect(move || {
            let value = s.get();
            l.borrow_mut().push(format!("run {value}"));
            let l = l.clone();
            rt2.on_cleanup(move || l.borrow_mut().push(format!("cleanup {value}")));
        });

        signal.set(1);
        effect.dispose();
        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn run_with_disposed_owner_fails() {
        let rt = Runtime::new();
        let owner = rt.create_root(|owner| owner);
        assert_eq!(owner.run(|| 1), Ok(1));

        owner.dispose();
        assert_eq!(
            rt.run_with_owner(&owner, || 1),
            Err(ReactiveError::OwnerDisposed(owner.id()))
        );
        assert_eq!(owner.child().unwrap_err(), ReactiveError::OwnerDisposed(owner.id()));
    }

    #[test]
    fn owner_is_restored_after_scopes() {
        let rt = Runtime::new();
        let outer = rt.create_root(|owner| {
            let inner = rt.create_root(|inner| {
                assert_eq!(rt.owner().map(|o| o.id()), Some(inner.id()));
                inner
            });
            assert_eq!(rt.owner().map(|o| o.id()), Some(owner.id()));
            assert!(!inner.is_disposed());
            owner
        });
        assert!(rt.owner().is_none());
        assert!(!outer.is_disposed());
    }

    #[test]
    fn catch_error_receives_subtree_failures() {
        let rt = Runtime::new();
        let caught = Rc::new(RefCell::new(Vec::new()));

        let c = caught.clone();
        rt.create_root(|_| {
            rt.catch_error(
                move |err| c.borrow_mut().push(err.to_string()),
                || {
                    rt.create_effect(|| panic!("render failed"));
                },
            );
        });

        assert_eq!(
            *caught.borrow(),
            vec!["computation panicked: render failed".to_string()]
        );
    }

    #[test]
    fn disposed_nodes_leave_their_owner() {
        let rt = Runtime::new();
        let owner = rt.create_root(|owner| owner);
        let children = |rt: &Runtime| rt.state().owners[owner.id()].children.len();

        for _ in 0..100 {
            let (effect, computed, signal, child) = owner
                .run(|| {
                    let effect = rt.create_effect(|| {});
                    let computed = rt.create_computed(|| 1);
                    let signal = rt.create_signal(0);
                    (effect, computed, signal, owner.child().unwrap())
                })
                .unwrap();
            assert_eq!(children(&rt), 4);

            effect.dispose();
            computed.dispose();
            signal.dispose();
            child.dispose();
            assert_eq!(children(&rt), 0);
        }
        assert_eq!(rt.state().computations.len(), 0);

        let errors = owner.dispose();
        assert!(errors.is_empty());
    }

    #[test]
    fn runtime_dispose_clears_everything() {
        let rt = Runtime::new();
        let signal = rt.create_signal(1);
        let s = signal.clone();
        let effect = rt.create_effect(move || {
            s.get();
        });
        rt.create_root(|_| {
            rt.create_signal(2);
        });

        rt.dispose();
        assert!(effect.is_disposed());
        assert!(signal.is_disposed());
        assert_eq!(rt.state().owners.len(), 0);
    }
}
