//! Computed Values
//!
//! A computed value is a cached derivation: it runs its function, stores
//! the result in an output signal and re-runs when a dependency changes.
//! Readers of the computed track the output signal, so chains of computed
//! values propagate like any other dependency.
//!
//! # How It Works
//!
//! 1. Creation runs the function once and records what it read.
//!
//! 2. When a dependency changes inside a flush, the computed is marked
//!    stale and queued; the flush recomputes pending computed values in
//!    topological order before any effect runs.
//!
//! 3. A read of a stale computed recomputes it on the spot, so a value is
//!    never observed half-propagated.
//!
//! 4. The output is only written when the new value differs from the
//!    cached one, which stops propagation early.
//!
//! If the function fails, the previous value stays and the error goes to
//! the node's handler or the nearest error boundary.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::rc::Rc;

use super::computation::{ComputationOptions, Work};
use super::runtime::Runtime;
use super::signal::SignalValue;
use crate::error::{BoxError, ExecutionError, ReactiveError};
use crate::graph::{ComputationId, ComputationState, NodeKind, SignalId};

impl Runtime {
    /// Create a computed value from an infallible function.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let count = rt.create_signal(5);
    /// let c = count.clone();
    /// let doubled = rt.create_computed(move || c.get() * 2);
    ///
    /// assert_eq!(doubled.get(), 10);
    /// ```
    pub fn create_computed<T, F>(&self, mut f: F) -> Computed<T>
    where
        T: PartialEq + 'static,
        F: FnMut() -> T + 'static,
    {
        self.create_computed_with(ComputationOptions::new(), move || {
            Ok::<T, std::convert::Infallible>(f())
        })
    }

    /// Create a computed value from a fallible function.
    pub fn create_computed_with<T, E, F>(&self, options: ComputationOptions, mut f: F) -> Computed<T>
    where
        T: PartialEq + 'static,
        E: Into<BoxError>,
        F: FnMut() -> Result<T, E> + 'static,
    {
        let id = self.insert_computation(NodeKind::Computed, options);
        let output = self.insert_signal(
            SignalValue::new(None::<T>, <Option<T> as PartialEq>::eq),
            Some(id),
            false,
        );

        let rt = self.clone();
        let work: Work = Rc::new(RefCell::new(move || -> Result<(), ExecutionError> {
            let value = f().map_err(ExecutionError::failed)?;
            rt.check_frame()?;
            rt.write_signal(output, Some(value))
                .map_err(ExecutionError::failed)?;
            Ok(())
        }));
        self.install_work(id, work, Some(output));

        if let Err(err) = self.run_computation(id) {
            self.report_error(id, err.into());
        }

        Computed {
            id,
            output,
            runtime: self.clone(),
            _marker: PhantomData,
        }
    }
}

/// A derived value that updates when its dependencies change.
pub struct Computed<T: 'static> {
    id: ComputationId,
    output: SignalId,
    runtime: Runtime,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Computed<T> {
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// The signal the value is stored in.
    pub fn output(&self) -> SignalId {
        self.output
    }

    /// Get the current value, tracked.
    ///
    /// # Panics
    ///
    /// Panics if the computed was disposed or has never produced a value.
    /// Use [`try_get`](Self::try_get) to handle those cases.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        match self.runtime.untrack(|| self.try_get()) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Borrow the value, tracked.
    ///
    /// # Panics
    ///
    /// Same as [`get`](Self::get).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }

    /// Borrow the value, tracked, recomputing it first if it is stale.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        self.runtime.ensure_fresh(self.id);
        let value = self
            .runtime
            .read_signal::<Option<T>>(self.output)
            .map_err(|_| ReactiveError::ComputationDisposed(self.id))?;
        let slot = value.value.borrow();
        let result = match slot.as_ref() {
            Some(current) => Ok(f(current)),
            None => Err(ReactiveError::NoValue(self.id)),
        };
        result
    }

    pub fn state(&self) -> ComputationState {
        self.runtime.computation_state(self.id)
    }

    /// How many times the function has run.
    pub fn run_count(&self) -> usize {
        self.runtime.run_count(self.id)
    }

    pub fn label(&self) -> Option<String> {
        self.runtime.computation_label(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ComputationState::Disposed
    }

    /// Stop recomputing and drop the cached value. Readers get
    /// [`ReactiveError::ComputationDisposed`] afterwards.
    pub fn dispose(&self) {
        for err in self.runtime.dispose_computation(self.id) {
            tracing::error!(computation = ?self.id, error = %err, "disposal failed");
        }
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            output: self.output,
            runtime: self.runtime.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
