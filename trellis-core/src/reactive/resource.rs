//! Resources
//!
//! A resource is a derived value that is scheduled like an effect: it
//! re-runs in the effect phase of a flush, ordered by priority, or through
//! its custom scheduler. Unlike a computed value it is never recomputed on
//! read; readers see the last settled value and can ask whether a run is
//! still pending.
//!
//! The value is `None` until the first successful run.

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
    pub fn create_resource<T, F>(&self, mut f: F) -> Resource<T>
    where
        T: PartialEq + 'static,
        F: FnMut() -> T + 'static,
    {
        self.create_resource_with(ComputationOptions::new(), move || {
            Ok::<T, std::convert::Infallible>(f())
        })
    }

    /// Create a resource with options and a fallible function.
    ///
    /// ```rust,ignore
    /// let page = rt.create_resource_with(
    ///     ComputationOptions::new().priority(Priority::Low).scheduler(move |run| queue.push(run)),
    ///     move || load_page(index.get()),
    /// );
    /// ```
    pub fn create_resource_with<T, E, F>(&self, options: ComputationOptions, mut f: F) -> Resource<T>
    where
        T: PartialEq + 'static,
        E: Into<BoxError>,
        F: FnMut() -> Result<T, E> + 'static,
    {
        let id = self.insert_computation(NodeKind::Resource, options);
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

        Resource {
            id,
            output,
            runtime: self.clone(),
            _marker: PhantomData,
        }
    }
}

/// A derived value refreshed on the effect schedule.
pub struct Resource<T: 'static> {
    id: ComputationId,
    output: SignalId,
    runtime: Runtime,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Resource<T> {
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// The last settled value, tracked. `None` before the first success.
    ///
    /// # Panics
    ///
    /// Panics if the resource was disposed.
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.with(|value| value.cloned())
    }

    pub fn try_get(&self) -> Result<Option<T>, ReactiveError>
    where
        T: Clone,
    {
        self.try_with(|value| value.cloned())
    }

    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        match self.try_with(f) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> Result<R, ReactiveError> {
        let value = self
            .runtime
            .read_signal::<Option<T>>(self.output)
            .map_err(|_| ReactiveError::ComputationDisposed(self.id))?;
        let slot = value.value.borrow();
        Ok(f(slot.as_ref()))
    }

    /// Whether a run is pending or in progress.
    pub fn loading(&self) -> bool {
        matches!(
            self.state(),
            ComputationState::Stale | ComputationState::Running
        )
    }

    /// Schedule a run as if a dependency changed.
    pub fn refetch(&self) {
        self.runtime.invalidate(self.id);
    }

    pub fn state(&self) -> ComputationState {
        self.runtime.computation_state(self.id)
    }

    pub fn run_count(&self) -> usize {
        self.runtime.run_count(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ComputationState::Disposed
    }

    pub fn dispose(&self) {
        for err in self.runtime.dispose_computation(self.id) {
            tracing::error!(computation = ?self.id, error = %err, "disposal failed");
        }
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            output: self.output,
            runtime: self.runtime.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Debug + 'static> Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runnable;

    #[test]
    fn resource_settles_after_the_batch() {
        let rt = Runtime::new();
        let page = rt.create_signal(1);

        let p = page.clone();
        let content = rt.create_resource(move || format!("page {}", p.get()));
        assert_eq!(content.get().as_deref(), Some("page 1"));

        rt.batch(|| {
            page.set(2);
            // Not pulled on read
            assert_eq!(content.get().as_deref(), Some("page 1"));
        });
        assert_eq!(content.get().as_deref(), Some("page 2"));
        assert!(!content.loading());
    }

    #[test]
    fn custom_scheduler_leaves_the_resource_loading() {
        let rt = Runtime::new();
        let query = rt.create_signal(String::from("a"));
        let queue: Rc<RefCell<Vec<Runnable>>> = Rc::default();

        let q = query.clone();
        let held = queue.clone();
        let results = rt.create_resource_with(
            ComputationOptions::new().scheduler(move |run| held.borrow_mut().push(run)),
            move || Ok::<_, std::convert::Infallible>(q.get().len()),
        );
        assert_eq!(results.get(), Some(1));

        query.set(String::from("abc"));
        assert!(results.loading());
        assert_eq!(results.get(), Some(1));

        let pending: Vec<Runnable> = queue.borrow_mut().drain(..).collect();
        assert_eq!(pending.len(), 1);
        for run in pending {
            run.run();
        }
        assert!(!results.loading());
        assert_eq!(results.get(), Some(3));
    }

    #[test]
    fn failed_first_run_leaves_no_value() {
        let rt = Runtime::new();
        let ready = rt.create_signal(false);

        let r = ready.clone();
        let value = rt.create_resource_with(ComputationOptions::new().on_error(|_| {}), move || {
            if r.get() {
                Ok(42)
            } else {
                Err("not ready")
            }
        });
        assert_eq!(value.get(), None);

        ready.set(true);
        assert_eq!(value.get(), Some(42));

        value.refetch();
        assert_eq!(value.run_count(), 3);
    }
}
