//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! is tracked by the computations that read it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running computation, the runtime
//!    records the computation as a dependent.
//!
//! 2. When a signal's value changes (according to its equality function),
//!    the signal is queued in the batch context.
//!
//! 3. The flush invalidates the dependents and re-runs them.
//!
//! # Memory Layout
//!
//! The handle is an arena key plus a runtime handle. The value lives in the
//! runtime's arena behind its own `RefCell`, so reading it never holds a
//! borrow of the runtime's bookkeeping.

use std::any::Any;
use std::cell::{Ref, RefCell};
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::rc::Rc;

use indexmap::IndexMap;

use super::owner::OwnedNode;
use super::runtime::Runtime;
use super::subscriber::{SubscriberId, Subscription};
use crate::error::ReactiveError;
use crate::graph::{ComputationId, OwnerId, SignalId};

/// Equality used to decide whether a write is a change.
pub(crate) type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

/// A typed value slot shared between the arena and readers.
pub(crate) struct SignalValue<T> {
    pub value: RefCell<T>,
    equals: Equality<T>,
}

impl<T: 'static> SignalValue<T> {
    pub fn new(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            value: RefCell::new(value),
            equals: Box::new(equals),
        }
    }

    /// Store `value` if it differs from the current one.
    ///
    /// Returns whether the value changed.
    fn replace(&self, id: SignalId, value: T) -> Result<bool, ReactiveError> {
        let mut slot = self
            .value
            .try_borrow_mut()
            .map_err(|_| ReactiveError::Borrowed(id))?;
        if (self.equals)(&slot, &value) {
            return Ok(false);
        }
        *slot = value;
        Ok(true)
    }
}

/// A signal in the runtime's arena.
pub(crate) struct SignalCell {
    /// An `Rc<SignalValue<T>>`, erased.
    pub value: Rc<dyn Any>,
    /// The computation that writes this signal, for computed outputs.
    pub producer: Option<ComputationId>,
    /// The owner whose children list holds this signal.
    pub owner: Option<OwnerId>,
    pub listeners: IndexMap<SubscriberId, Rc<dyn Fn()>>,
}

impl Runtime {
    /// Create a signal that notifies when the new value is not `==` the old.
    pub fn create_signal<T>(&self, value: T) -> Signal<T>
    where
        T: PartialEq + 'static,
    {
        self.create_signal_with(value, T::eq)
    }

    /// Create a signal with a custom equality function.
    ///
    /// Pass `|_, _| false` to notify on every write.
    pub fn create_signal_with<T>(
        &self,
        value: T,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Signal<T>
    where
        T: 'static,
    {
        let id = self.insert_signal(SignalValue::new(value, equals), None, true);
        Signal::from_parts(id, self.clone())
    }

    /// Allocate a signal cell, attached to the active owner if `owned`.
    pub(crate) fn insert_signal<T: 'static>(
        &self,
        value: SignalValue<T>,
        producer: Option<ComputationId>,
        owned: bool,
    ) -> SignalId {
        let mut st = self.state();
        let st = &mut *st;
        let owner = st
            .owner
            .filter(|&owner| owned && st.owners.contains_key(owner));
        let id = st.signals.insert(SignalCell {
            value: Rc::new(value),
            producer,
            owner,
            listeners: IndexMap::new(),
        });
        st.graph.insert_signal(id);

        if let Some(owner) = owner {
            st.owners[owner].adopt_signal(id);
        }
        id
    }

    /// Typed access to a signal's value slot.
    pub(crate) fn signal_value<T: 'static>(
        &self,
        id: SignalId,
    ) -> Result<Rc<SignalValue<T>>, ReactiveError> {
        let erased = self
            .state()
            .signals
            .get(id)
            .map(|cell| cell.value.clone())
            .ok_or(ReactiveError::SignalDisposed(id))?;
        erased
            .downcast::<SignalValue<T>>()
            .map_err(|_| ReactiveError::TypeMismatch(id))
    }

    /// Tracked typed access.
    pub(crate) fn read_signal<T: 'static>(
        &self,
        id: SignalId,
    ) -> Result<Rc<SignalValue<T>>, ReactiveError> {
        let value = self.signal_value::<T>(id)?;
        self.track(id);
        Ok(value)
    }

    /// Write a signal and queue its dependents if the value changed.
    pub(crate) fn write_signal<T: 'static>(
        &self,
        id: SignalId,
        value: T,
    ) -> Result<bool, ReactiveError> {
        let changed = self.signal_value::<T>(id)?.replace(id, value)?;
        if changed {
            self.signal_changed(id);
        }
        Ok(changed)
    }

    pub(crate) fn add_listener(&self, signal: SignalId, callback: Rc<dyn Fn()>) -> Option<SubscriberId> {
        let mut st = self.state();
        let cell = st.signals.get_mut(signal)?;
        let id = SubscriberId::new();
        cell.listeners.insert(id, callback);
        Some(id)
    }

    pub(crate) fn remove_listener(&self, signal: SignalId, id: SubscriberId) -> bool {
        self.state()
            .signals
            .get_mut(signal)
            .is_some_and(|cell| cell.listeners.shift_remove(&id).is_some())
    }

    /// Remove a signal from the arena, the graph, the batch and its
    /// owner's children.
    pub(crate) fn dispose_signal(&self, id: SignalId) {
        let cell = {
            let mut st = self.state();
            st.graph.remove_signal(id);
            st.batch.forget_signal(id);
            let cell = st.signals.remove(id);
            if let Some(owner) = cell.as_ref().and_then(|cell| cell.owner) {
                st.release_child(owner, OwnedNode::Signal(id));
            }
            cell
        };
        // The value may hold handles whose drop re-enters the runtime.
        drop(cell);
    }
}

/// A reactive signal holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.create_signal(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies dependents)
/// count.set(5);
/// ```
pub struct Signal<T: 'static> {
    id: SignalId,
    runtime: Runtime,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Signal<T> {
    pub(crate) fn from_parts(id: SignalId, runtime: Runtime) -> Self {
        Self {
            id,
            runtime,
            _marker: PhantomData,
        }
    }

    /// Get the signal's arena id.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// The runtime this signal belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Get the current value.
    ///
    /// If called while a computation runs, this also registers the
    /// computation as a dependent.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed. Use [`try_get`](Self::try_get)
    /// to handle that case.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Get the current value, or an error if the signal is gone.
    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.with_untracked(T::clone)
    }

    /// Borrow the value, tracked.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }

    /// Borrow the value, tracked, or fail if the signal is gone.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        let value = self.runtime.read_signal::<T>(self.id)?;
        let guard: Ref<'_, T> = value.value.borrow();
        Ok(f(&guard))
    }

    /// Borrow the value without tracking.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.runtime.signal_value::<T>(self.id) {
            Ok(value) => f(&value.value.borrow()),
            Err(err) => panic!("{err}"),
        }
    }

    /// Set a new value and notify dependents if it changed.
    ///
    /// Writing a disposed signal is a no-op; use [`try_set`](Self::try_set)
    /// to observe it.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            tracing::debug!(signal = ?self.id, error = %err, "ignoring signal write");
        }
    }

    /// Set a new value. Returns whether the value changed.
    pub fn try_set(&self, value: T) -> Result<bool, ReactiveError> {
        self.runtime.write_signal(self.id, value)
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = match self.runtime.signal_value::<T>(self.id) {
            Ok(value) => f(&value.value.borrow()),
            Err(err) => {
                tracing::debug!(signal = ?self.id, error = %err, "ignoring signal update");
                return;
            }
        };
        self.set(next);
    }

    /// Attach an untracked listener, called once per flush in which the
    /// value changed, after every effect has run.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + 'static,
    {
        match self.runtime.add_listener(self.id, Rc::new(callback)) {
            Some(id) => Subscription::new(id, self.id, self.runtime.clone()),
            None => panic!("{}", ReactiveError::SignalDisposed(self.id)),
        }
    }

    /// Number of computations that read this signal in their last run.
    pub fn subscriber_count(&self) -> usize {
        self.runtime.state().graph.subscriber_count(self.id)
    }

    /// Whether the signal has been disposed.
    pub fn is_disposed(&self) -> bool {
        !self.runtime.state().signals.contains_key(self.id)
    }

    /// Remove the signal from the runtime. Dependents keep their last
    /// value and stop being notified.
    pub fn dispose(&self) {
        self.runtime.dispose_signal(self.id);
    }

    /// Split into a read half and a write half.
    pub fn split(self) -> (ReadSignal<T>, WriteSignal<T>) {
        (
            ReadSignal {
                inner: self.clone(),
            },
            WriteSignal { inner: self },
        )
    }

    /// A read-only view of this signal.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal {
            inner: self.clone(),
        }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.id, self.runtime.clone())
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Signal");
        s.field("id", &self.id);
        match self.runtime.signal_value::<T>(self.id) {
            Ok(value) => match value.value.try_borrow() {
                Ok(v) => s.field("value", &*v),
                Err(_) => s.field("value", &"<borrowed>"),
            },
            Err(_) => s.field("value", &"<disposed>"),
        };
        s.finish()
    }
}

/// The read half of a [`Signal`].
pub struct ReadSignal<T: 'static> {
    inner: Signal<T>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.get()
    }

    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.inner.try_get()
    }

    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.get_untracked()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + 'static,
    {
        self.inner.subscribe(callback)
    }
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The write half of a [`Signal`].
pub struct WriteSignal<T: 'static> {
    inner: Signal<T>,
}

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    pub fn set(&self, value: T) {
        self.inner.set(value)
    }

    pub fn try_set(&self, value: T) -> Result<bool, ReactiveError> {
        self.inner.try_set(value)
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.inner.update(f)
    }
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
