//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued for the effect
//!    phase of the flush, or handed to its custom scheduler, or run inline
//!    when no batch is open.
//!
//! 3. Before re-running, the effect disposes what its previous run owned
//!    (nested computations, `on_cleanup` callbacks) and clears its old
//!    dependencies.
//!
//! # Differences from Computed
//!
//! - Computed values produce a value; effects do not.
//! - Computed values always run before effects in a flush.
//! - Effects are ordered among themselves by [`Priority`](crate::Priority).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::computation::{ComputationOptions, Work};
use super::runtime::Runtime;
use crate::error::{BoxError, ExecutionError};
use crate::graph::{ComputationId, ComputationState, NodeKind};

impl Runtime {
    /// Create an effect. It runs once now and again whenever something it
    /// read changes.
    pub fn create_effect<F>(&self, mut f: F) -> Effect
    where
        F: FnMut() + 'static,
    {
        self.create_effect_with(ComputationOptions::new(), move || {
            f();
            Ok::<(), std::convert::Infallible>(())
        })
    }

    /// Create an effect with options and a fallible function.
    pub fn create_effect_with<E, F>(&self, options: ComputationOptions, mut f: F) -> Effect
    where
        E: Into<BoxError>,
        F: FnMut() -> Result<(), E> + 'static,
    {
        let id = self.insert_computation(NodeKind::Effect, options);
        let work: Work = Rc::new(RefCell::new(move || -> Result<(), ExecutionError> {
            f().map_err(ExecutionError::failed)
        }));
        self.install_work(id, work, None);

        if let Err(err) = self.run_computation(id) {
            self.report_error(id, err.into());
        }

        Effect {
            id,
            runtime: self.clone(),
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.create_signal(0);
///
/// let c = count.clone();
/// let effect = rt.create_effect(move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Effect {
    id: ComputationId,
    runtime: Runtime,
}

impl Effect {
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// Mark the effect stale as if a dependency changed.
    pub fn invalidate(&self) {
        self.runtime.invalidate(self.id);
    }

    /// Dispose the effect.
    ///
    /// After disposal, the effect will not run again. A run already in
    /// progress completes.
    pub fn dispose(&self) {
        for err in self.runtime.dispose_computation(self.id) {
            tracing::error!(computation = ?self.id, error = %err, "disposal failed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ComputationState::Disposed
    }

    pub fn state(&self) -> ComputationState {
        self.runtime.computation_state(self.id)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.runtime.run_count(self.id)
    }

    /// Number of signals read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime.state().graph.sources(self.id).count()
    }

    pub fn label(&self) -> Option<String> {
        self.runtime.computation_label(self.id)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
