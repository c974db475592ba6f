//! Batch Context
//!
//! The batch context determines *when* pending work runs; the runtime
//! decides *how*. It coalesces everything that becomes pending while a
//! batch is open:
//!
//! 1. Signals written since the last flush
//! 2. Computed values invalidated by those signals
//! 3. Effects and resources invalidated by those signals
//! 4. Listener callbacks subscribed to those signals
//!
//! Each pending set is insertion-ordered and de-duplicated, so writing the
//! same signal ten times inside a batch still queues each dependent once.

use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::node::{ComputationId, Priority, SignalId};
use crate::reactive::SubscriberId;

/// A queued listener callback.
pub(crate) type Callback = Rc<dyn Fn()>;

/// Batching state for one runtime.
#[derive(Default)]
pub struct BatchContext {
    /// Nesting depth of open `batch` calls.
    depth: usize,

    /// Whether a flush is currently draining the pending sets.
    flushing: bool,

    pending_signals: IndexSet<SignalId>,
    pending_computed: IndexSet<ComputationId>,
    pending_effects: IndexSet<ComputationId>,
    pending_callbacks: IndexMap<SubscriberId, Callback>,
}

impl BatchContext {
    /// Create an idle batch context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether writes should queue rather than propagate.
    pub fn is_active(&self) -> bool {
        self.depth > 0 || self.flushing
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether a flush is draining the pending sets.
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Open a batch level.
    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Close a batch level.
    ///
    /// Returns `true` if this closed the outermost level outside of a flush,
    /// meaning the caller must flush now.
    pub fn exit(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0 && !self.flushing && !self.is_empty()
    }

    pub(crate) fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    /// Whether nothing is pending in any phase.
    pub fn is_empty(&self) -> bool {
        self.pending_signals.is_empty()
            && self.pending_computed.is_empty()
            && self.pending_effects.is_empty()
            && self.pending_callbacks.is_empty()
    }

    /// Whether a read could still observe a value the flush has not reached.
    pub fn has_pending_changes(&self) -> bool {
        !self.pending_signals.is_empty() || !self.pending_computed.is_empty()
    }

    /// Queue a changed signal.
    pub fn signal_changed(&mut self, signal: SignalId) -> bool {
        self.pending_signals.insert(signal)
    }

    /// Queue a stale computed value.
    pub fn queue_computed(&mut self, computation: ComputationId) -> bool {
        self.pending_computed.insert(computation)
    }

    /// Queue a stale effect or resource.
    pub fn queue_effect(&mut self, computation: ComputationId) -> bool {
        self.pending_effects.insert(computation)
    }

    pub(crate) fn queue_callback(&mut self, id: SubscriberId, callback: Callback) {
        self.pending_callbacks.entry(id).or_insert(callback);
    }

    /// Drop every reference to a disposed computation.
    pub fn forget_computation(&mut self, computation: ComputationId) {
        self.pending_computed.shift_remove(&computation);
        self.pending_effects.shift_remove(&computation);
    }

    /// Drop every reference to a disposed signal.
    pub fn forget_signal(&mut self, signal: SignalId) {
        self.pending_signals.shift_remove(&signal);
    }

    /// Phase (a): take the changed signals.
    pub fn take_signals(&mut self) -> IndexSet<SignalId> {
        std::mem::take(&mut self.pending_signals)
    }

    /// Phase (b): take the stale computed values, in insertion order.
    pub fn take_computed(&mut self) -> IndexSet<ComputationId> {
        std::mem::take(&mut self.pending_computed)
    }

    /// Phase (c): take the stale effects ordered by ascending priority.
    ///
    /// The sort is stable, so effects of equal priority keep the order in
    /// which they became stale.
    pub fn take_effects<F>(&mut self, priority: F) -> Vec<ComputationId>
    where
        F: Fn(ComputationId) -> Priority,
    {
        let mut effects: Vec<ComputationId> = std::mem::take(&mut self.pending_effects)
            .into_iter()
            .collect();
        effects.sort_by_key(|&id| priority(id));
        effects
    }

    /// Phase (d): take the queued listener callbacks.
    pub(crate) fn take_callbacks(&mut self) -> Vec<Callback> {
        std::mem::take(&mut self.pending_callbacks)
            .into_values()
            .collect()
    }

    /// Take every pending computation, computed values first.
    pub fn drain_computations(&mut self) -> Vec<ComputationId> {
        let mut all: Vec<ComputationId> = self.pending_computed.drain(..).collect();
        all.extend(self.pending_effects.drain(..));
        all
    }

    pub fn pending_signals(&self) -> impl Iterator<Item = SignalId> + '_ {
        self.pending_signals.iter().copied()
    }

    pub fn pending_computed(&self) -> impl Iterator<Item = ComputationId> + '_ {
        self.pending_computed.iter().copied()
    }

    pub fn pending_effects(&self) -> impl Iterator<Item = ComputationId> + '_ {
        self.pending_effects.iter().copied()
    }

    pub fn pending_callback_count(&self) -> usize {
        self.pending_callbacks.len()
    }
}

impl fmt::Debug for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchContext")
            .field("depth", &self.depth)
            .field("flushing", &self.flushing)
            .field("pending_signals", &self.pending_signals)
            .field("pending_computed", &self.pending_computed)
            .field("pending_effects", &self.pending_effects)
            .field("pending_callbacks", &self.pending_callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn only_outermost_exit_requests_flush() {
        let mut signals: SlotMap<SignalId, ()> = SlotMap::with_key();
        let s = signals.insert(());
        let mut batch = BatchContext::new();

        batch.enter();
        batch.enter();
        assert!(batch.is_active());
        batch.signal_changed(s);

        assert!(!batch.exit());
        assert!(batch.exit());
        assert!(!batch.is_active());
    }

    #[test]
    fn empty_batch_does_not_request_flush() {
        let mut batch = BatchContext::new();
        batch.enter();
        assert!(!batch.exit());
    }

    #[test]
    fn exit_during_flush_defers_to_the_flush() {
        let mut signals: SlotMap<SignalId, ()> = SlotMap::with_key();
        let s = signals.insert(());
        let mut batch = BatchContext::new();

        batch.set_flushing(true);
        batch.enter();
        batch.signal_changed(s);
        assert!(!batch.exit());
        assert!(batch.is_active());
    }

    #[test]
    fn pending_sets_coalesce() {
        let mut ids: SlotMap<ComputationId, ()> = SlotMap::with_key();
        let a = ids.insert(());
        let mut batch = BatchContext::new();

        assert!(batch.queue_computed(a));
        assert!(!batch.queue_computed(a));
        assert_eq!(batch.take_computed().len(), 1);
        assert!(batch.is_empty());
    }

    #[test]
    fn effects_sorted_by_priority_then_insertion() {
        let mut ids: SlotMap<ComputationId, Priority> = SlotMap::with_key();
        let low = ids.insert(Priority::Low);
        let normal_1 = ids.insert(Priority::Normal);
        let high = ids.insert(Priority::High);
        let normal_2 = ids.insert(Priority::Normal);

        let mut batch = BatchContext::new();
        for id in [low, normal_1, high, normal_2] {
            batch.queue_effect(id);
        }

        let order = batch.take_effects(|id| ids[id]);
        assert_eq!(order, vec![high, normal_1, normal_2, low]);
    }

    #[test]
    fn forget_removes_disposed_nodes() {
        let mut ids: SlotMap<ComputationId, ()> = SlotMap::with_key();
        let a = ids.insert(());
        let b = ids.insert(());
        let mut batch = BatchContext::new();
        batch.queue_computed(a);
        batch.queue_effect(b);

        batch.forget_computation(a);
        batch.forget_computation(b);
        assert!(batch.is_empty());
    }
}
