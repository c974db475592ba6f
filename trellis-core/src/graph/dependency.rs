//! Dependency Index
//!
//! The dependency graph records, for every computation, the exact set of
//! signals it read during its last run, and for every signal the
//! computations that read it.
//!
//! # Algorithm
//!
//! Ordering pending computed values uses Kahn's algorithm over a *local*
//! graph:
//!
//! 1. Only computations in the pending set become nodes
//! 2. `A → B` exists if one of `B`'s recorded sources is produced by `A`
//! 3. Nodes with no pending producer go first, in insertion order
//! 4. If a cycle leaves nodes unordered, they follow in insertion order
//!
//! The last step trades strict ordering for liveness; the cycle resolver
//! keeps the resulting re-entrancy bounded.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;
use slotmap::SecondaryMap;
use smallvec::SmallVec;

use super::node::{ComputationId, SignalId};

/// Bidirectional read index between signals and computations.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Signals each computation read during its last run.
    sources: SecondaryMap<ComputationId, IndexSet<SignalId>>,

    /// Computations that read each signal, in subscription order.
    subscribers: SecondaryMap<SignalId, IndexSet<ComputationId>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `computation` read `signal`.
    ///
    /// Returns `true` if the edge is new. Both ends must have been
    /// registered and not yet removed.
    pub fn link(&mut self, signal: SignalId, computation: ComputationId) -> bool {
        let Some(subs) = self.subscribers.get_mut(signal) else {
            return false;
        };
        let Some(sources) = self.sources.get_mut(computation) else {
            return false;
        };
        subs.insert(computation);
        sources.insert(signal)
    }

    /// Remove every edge out of `computation`'s source set.
    ///
    /// Called before a computation re-runs so its dependencies afterwards
    /// are exactly what that run read.
    pub fn clear_sources(&mut self, computation: ComputationId) {
        let Some(sources) = self.sources.get_mut(computation) else {
            return;
        };
        for signal in sources.drain(..) {
            if let Some(subs) = self.subscribers.get_mut(signal) {
                subs.shift_remove(&computation);
            }
        }
    }

    /// Remove a computation and all edges involving it.
    pub fn remove_computation(&mut self, computation: ComputationId) {
        self.clear_sources(computation);
        self.sources.remove(computation);
    }

    /// Remove a signal and all edges involving it.
    pub fn remove_signal(&mut self, signal: SignalId) {
        if let Some(subs) = self.subscribers.remove(signal) {
            for computation in subs {
                if let Some(sources) = self.sources.get_mut(computation) {
                    sources.shift_remove(&signal);
                }
            }
        }
    }

    /// Computations that read `signal`, in subscription order.
    pub fn subscribers(&self, signal: SignalId) -> SmallVec<[ComputationId; 8]> {
        self.subscribers
            .get(signal)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of computations that read `signal`.
    pub fn subscriber_count(&self, signal: SignalId) -> usize {
        self.subscribers.get(signal).map_or(0, IndexSet::len)
    }

    /// Signals `computation` read during its last run.
    pub fn sources(&self, computation: ComputationId) -> impl Iterator<Item = SignalId> + '_ {
        self.sources
            .get(computation)
            .into_iter()
            .flat_map(|sources| sources.iter().copied())
    }

    /// Whether `computation` read `signal` during its last run.
    pub fn depends_on(&self, computation: ComputationId, signal: SignalId) -> bool {
        self.sources
            .get(computation)
            .is_some_and(|sources| sources.contains(&signal))
    }

    /// Iterate every `(signal, computation)` edge.
    pub fn edges(&self) -> impl Iterator<Item = (SignalId, ComputationId)> + '_ {
        self.subscribers
            .iter()
            .flat_map(|(signal, subs)| subs.iter().map(move |&c| (signal, c)))
    }

    /// Perform a topological sort of the pending computed values.
    ///
    /// `producer` maps a signal to the computation that writes it, if any.
    /// Returns nodes in order such that producers come before consumers;
    /// nodes caught in a cycle follow in insertion order.
    pub fn order_pending<F>(&self, pending: &IndexSet<ComputationId>, producer: F) -> Vec<ComputationId>
    where
        F: Fn(SignalId) -> Option<ComputationId>,
    {
        let mut in_degree: HashMap<ComputationId, usize> = HashMap::with_capacity(pending.len());
        let mut consumers: HashMap<ComputationId, SmallVec<[ComputationId; 4]>> = HashMap::new();

        // Calculate in-degrees (only counting edges within the pending set)
        for &node in pending {
            let mut degree = 0;
            let mut seen: SmallVec<[ComputationId; 4]> = SmallVec::new();
            for signal in self.sources(node) {
                let Some(from) = producer(signal) else { continue };
                if from == node || !pending.contains(&from) || seen.contains(&from) {
                    continue;
                }
                seen.push(from);
                degree += 1;
                consumers.entry(from).or_default().push(node);
            }
            in_degree.insert(node, degree);
        }

        let mut queue: VecDeque<ComputationId> = pending
            .iter()
            .copied()
            .filter(|node| in_degree[node] == 0)
            .collect();
        let mut result = Vec::with_capacity(pending.len());

        // Kahn's algorithm
        while let Some(node) = queue.pop_front() {
            result.push(node);

            if let Some(next) = consumers.get(&node) {
                for consumer in next {
                    if let Some(degree) = in_degree.get_mut(consumer) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*consumer);
                        }
                    }
                }
            }
        }

        if result.len() != pending.len() {
            tracing::debug!(
                ordered = result.len(),
                pending = pending.len(),
                "cycle among pending computed values, falling back to insertion order"
            );
            for &node in pending {
                if in_degree.get(&node).is_some_and(|d| *d > 0) {
                    result.push(node);
                }
            }
        }

        result
    }

    /// Register a computation so it can hold edges.
    pub fn insert_computation(&mut self, computation: ComputationId) {
        self.sources.insert(computation, IndexSet::new());
    }

    /// Register a signal so it can hold edges.
    pub fn insert_signal(&mut self, signal: SignalId) {
        self.subscribers.insert(signal, IndexSet::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    struct Fixture {
        graph: DependencyGraph,
        signals: SlotMap<SignalId, Option<ComputationId>>,
        computations: SlotMap<ComputationId, ()>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                graph: DependencyGraph::new(),
                signals: SlotMap::with_key(),
                computations: SlotMap::with_key(),
            }
        }

        fn signal(&mut self, producer: Option<ComputationId>) -> SignalId {
            let id = self.signals.insert(producer);
            self.graph.insert_signal(id);
            id
        }

        fn computation(&mut self) -> ComputationId {
            let id = self.computations.insert(());
            self.graph.insert_computation(id);
            id
        }

        fn order(&self, pending: &[ComputationId]) -> Vec<ComputationId> {
            let pending: IndexSet<_> = pending.iter().copied().collect();
            self.graph
                .order_pending(&pending, |s| self.signals.get(s).copied().flatten())
        }
    }

    #[test]
    fn link_and_clear_are_bidirectional() {
        let mut fx = Fixture::new();
        let s = fx.signal(None);
        let c = fx.computation();

        assert!(fx.graph.link(s, c));
        assert!(!fx.graph.link(s, c));
        assert!(fx.graph.depends_on(c, s));
        assert_eq!(fx.graph.subscribers(s).as_slice(), &[c]);

        fx.graph.clear_sources(c);
        assert!(!fx.graph.depends_on(c, s));
        assert_eq!(fx.graph.subscriber_count(s), 0);
    }

    #[test]
    fn removing_nodes_drops_edges() {
        let mut fx = Fixture::new();
        let s = fx.signal(None);
        let t = fx.signal(None);
        let c = fx.computation();
        fx.graph.link(s, c);
        fx.graph.link(t, c);

        fx.graph.remove_signal(s);
        assert_eq!(fx.graph.sources(c).collect::<Vec<_>>(), vec![t]);

        fx.graph.remove_computation(c);
        assert_eq!(fx.graph.subscriber_count(t), 0);
        // Links to a removed computation are refused.
        assert!(!fx.graph.link(t, c));
        assert_eq!(fx.graph.edges().count(), 0);
    }

    #[test]
    fn producers_order_before_consumers() {
        let mut fx = Fixture::new();
        let source = fx.signal(None);
        let a = fx.computation();
        let a_out = fx.signal(Some(a));
        let b = fx.computation();
        let b_out = fx.signal(Some(b));
        let c = fx.computation();

        fx.graph.link(source, a);
        fx.graph.link(a_out, b);
        fx.graph.link(b_out, c);
        fx.graph.link(source, c);

        // Deliberately inserted consumer-first.
        assert_eq!(fx.order(&[c, b, a]), vec![a, b, c]);
    }

    #[test]
    fn independent_nodes_keep_insertion_order() {
        let mut fx = Fixture::new();
        let source = fx.signal(None);
        let left = fx.computation();
        let right = fx.computation();
        fx.graph.link(source, left);
        fx.graph.link(source, right);

        assert_eq!(fx.order(&[right, left]), vec![right, left]);
    }

    #[test]
    fn cycle_falls_back_to_insertion_order() {
        let mut fx = Fixture::new();
        let a = fx.computation();
        let a_out = fx.signal(Some(a));
        let b = fx.computation();
        let b_out = fx.signal(Some(b));
        let free = fx.computation();

        fx.graph.link(b_out, a);
        fx.graph.link(a_out, b);

        let order = fx.order(&[b, a, free]);
        assert_eq!(order, vec![free, b, a]);
    }

    #[test]
    fn producers_outside_pending_set_are_ignored() {
        let mut fx = Fixture::new();
        let a = fx.computation();
        let a_out = fx.signal(Some(a));
        let b = fx.computation();
        fx.graph.link(a_out, b);

        assert_eq!(fx.order(&[b]), vec![b]);
    }
}
