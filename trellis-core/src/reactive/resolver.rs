//! Circular Dependency Resolver
//!
//! The resolver wraps every computation run. It keeps the ids of the
//! computations in flight on the current synchronous call chain; seeing an
//! id that is already on the stack means the chain looped back on itself.
//!
//! What happens next depends on the computation and the policy:
//!
//! | computation | policy  | outcome                               |
//! |-------------|---------|---------------------------------------|
//! | optional    | any     | skip, logged at debug level           |
//! | required    | `Warn`  | skip, logged as a warning             |
//! | required    | `Error` | `CircularDependencyError` with chain  |
//!
//! A skipped run leaves the computation's previous value in place, which is
//! what breaks the recursion.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::CyclePolicy;
use crate::error::CircularDependencyError;
use crate::graph::ComputationId;

/// Result of asking to enter a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Not in flight; pushed onto the stack.
    Proceed,

    /// Re-entrant; the caller must not run it.
    Skip,

    /// Re-entrant and required under the `Error` policy.
    Reject(CircularDependencyError),
}

/// How a detected cycle was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleResolution {
    /// Optional participant, skipped quietly.
    Skipped,
    /// Required participant, skipped with a warning.
    Warned,
    /// Required participant, failed with an error.
    Rejected,
}

/// A cycle the resolver detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleRecord {
    pub chain: Vec<ComputationId>,
    pub resolution: CycleResolution,
}

/// Stack of in-flight computations plus a bounded detection history.
#[derive(Debug)]
pub(crate) struct CycleResolver {
    stack: Vec<ComputationId>,
    history: VecDeque<CycleRecord>,
    capacity: usize,
}

impl CycleResolver {
    pub fn new(capacity: usize) -> Self {
        Self {
            stack: Vec::new(),
            history: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Ask to run `id`.
    pub fn enter(&mut self, id: ComputationId, optional: bool, policy: CyclePolicy) -> Admission {
        let Some(start) = self.stack.iter().position(|&in_flight| in_flight == id) else {
            self.stack.push(id);
            return Admission::Proceed;
        };

        let mut chain = self.stack[start..].to_vec();
        chain.push(id);

        let (resolution, admission) = if optional {
            tracing::debug!(computation = ?id, chain = ?chain, "skipping optional computation caught in a cycle");
            (CycleResolution::Skipped, Admission::Skip)
        } else {
            match policy {
                CyclePolicy::Warn => {
                    tracing::warn!(computation = ?id, chain = ?chain, "circular dependency detected, skipping re-entrant run");
                    (CycleResolution::Warned, Admission::Skip)
                }
                CyclePolicy::Error => {
                    let err = CircularDependencyError { chain: chain.clone() };
                    (CycleResolution::Rejected, Admission::Reject(err))
                }
            }
        };

        self.remember(CycleRecord { chain, resolution });
        admission
    }

    /// Leave `id`. Must pair with a `Proceed` from [`enter`](Self::enter).
    pub fn exit(&mut self, id: ComputationId) {
        match self.stack.last() {
            Some(&top) if top == id => {
                self.stack.pop();
            }
            _ => {
                tracing::error!(computation = ?id, stack = ?self.stack, "resolver exit does not match the innermost entry");
                if let Some(pos) = self.stack.iter().rposition(|&c| c == id) {
                    self.stack.remove(pos);
                }
            }
        }
    }

    /// Ids currently in flight, outermost first.
    pub fn in_flight(&self) -> &[ComputationId] {
        &self.stack
    }

    /// Detected cycles, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &CycleRecord> {
        self.history.iter()
    }

    fn remember(&mut self, record: CycleRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}
