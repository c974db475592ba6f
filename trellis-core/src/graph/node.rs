//! Graph Nodes
//!
//! Arena keys and the small enums that describe a node.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Handle to a signal cell in a runtime's arena.
    pub struct SignalId;

    /// Handle to a computation (computed value, effect or resource).
    pub struct ComputationId;

    /// Handle to an owner scope.
    pub struct OwnerId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A source node. Signals have dependents but no dependencies.
    Signal,

    /// A derived value. Runs synchronously, before any effect, and caches
    /// its result in an output signal.
    Computed,

    /// A side-effecting leaf. Runs in the effect phase by priority.
    Effect,

    /// A derived value that is scheduled like an effect.
    Resource,
}

impl NodeKind {
    /// Whether nodes of this kind run in the effect phase of a flush.
    pub fn is_effect_like(self) -> bool {
        matches!(self, NodeKind::Effect | NodeKind::Resource)
    }
}

/// Lifecycle state of a computation.
///
/// `Idle → Running → (Idle | Stale) → Running → …`; `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationState {
    /// Up to date.
    Idle,

    /// Work is executing.
    Running,

    /// A dependency changed and a run is pending.
    Stale,

    /// Torn down. Never runs again.
    Disposed,
}

/// Scheduling priority. Lower values run first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    /// Computed values. Run before every effect.
    Sync = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Idle = 4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn ids_are_unique_and_stale_ids_miss() {
        let mut arena: SlotMap<SignalId, u32> = SlotMap::with_key();
        let a = arena.insert(1);
        let b = arena.insert(2);
        assert_ne!(a, b);

        arena.remove(a);
        let c = arena.insert(3);
        // The slot may be reused, but the old key must not resolve.
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(c), Some(&3));
    }

    #[test]
    fn priorities_sort_ascending() {
        let mut priorities = vec![Priority::Idle, Priority::Normal, Priority::Sync, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Sync, Priority::High, Priority::Normal, Priority::Idle]
        );
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn effect_like_kinds() {
        assert!(NodeKind::Effect.is_effect_like());
        assert!(NodeKind::Resource.is_effect_like());
        assert!(!NodeKind::Computed.is_effect_like());
        assert!(!NodeKind::Signal.is_effect_like());
    }
}
