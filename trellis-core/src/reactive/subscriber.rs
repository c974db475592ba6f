//! Listener subscriptions.
//!
//! A listener is an untracked callback attached to a signal. Unlike an
//! effect it reads nothing and owns no dependencies; it is simply told
//! that the signal changed, once per flush, after every effect has run.

use std::sync::atomic::{AtomicU64, Ordering};

use super::runtime::Runtime;
use crate::graph::SignalId;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Signal::subscribe`](super::Signal::subscribe).
///
/// Dropping the handle keeps the listener attached; call
/// [`unsubscribe`](Self::unsubscribe) to detach it. Disposing the signal
/// detaches every listener.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: SubscriberId,
    signal: SignalId,
    runtime: Runtime,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, signal: SignalId, runtime: Runtime) -> Self {
        Self { id, signal, runtime }
    }

    /// Get the listener's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// The signal this listener is attached to.
    pub fn signal(&self) -> SignalId {
        self.signal
    }

    /// Detach the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.runtime.remove_listener(self.signal, self.id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("signal", &self.signal)
            .finish()
    }
}
