//! Error Taxonomy
//!
//! Three kinds of failure can happen inside the runtime:
//!
//! - [`ExecutionError`]: a computation's work function failed. It is caught
//!   at the computation boundary and routed to a handler, never propagated
//!   into unrelated computations.
//! - [`CircularDependencyError`]: a computation was re-entered while already
//!   in flight and the resolution policy asked for a hard failure.
//! - [`DisposalError`]: a cleanup callback or child disposal failed. One
//!   failure never stops sibling disposal.
//!
//! [`ReactiveError`] covers misuse of handles (reading a disposed signal and
//! the like) and is what the `try_*` accessors return.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::graph::{ComputationId, OwnerId, SignalId};

/// A boxed error produced by user work.
pub type BoxError = Box<dyn StdError + 'static>;

/// The chain of computations that formed a cycle.
///
/// The first and last entries are the same computation: the one that was
/// entered a second time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CircularDependencyError {
    pub chain: Vec<ComputationId>,
}

impl CircularDependencyError {
    /// The computation that was re-entered.
    pub fn culprit(&self) -> Option<ComputationId> {
        self.chain.last().copied()
    }
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("circular dependency detected: ")?;
        for (i, id) in self.chain.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{id:?}")?;
        }
        Ok(())
    }
}

/// Failure of a computation's work function.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The work function returned an error.
    #[error("computation failed: {0}")]
    Failed(#[source] BoxError),

    /// The work function panicked. The payload message is preserved when it
    /// is a string.
    #[error("computation panicked: {0}")]
    Panicked(String),

    /// A cycle was rejected while this computation was reading.
    #[error(transparent)]
    Circular(#[from] CircularDependencyError),
}

impl ExecutionError {
    /// Wrap any error returned by user work.
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Failed(err.into())
    }
}

/// Failure while tearing down part of the owner tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisposalError {
    /// A cleanup callback panicked.
    #[error("cleanup callback on {owner:?} panicked: {message}")]
    Cleanup { owner: OwnerId, message: String },

    /// Disposing an owned child panicked.
    #[error("disposing child of {owner:?} panicked: {message}")]
    Child { owner: OwnerId, message: String },
}

/// Misuse of a reactive handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("signal {0:?} has been disposed")]
    SignalDisposed(SignalId),

    #[error("computation {0:?} has been disposed")]
    ComputationDisposed(ComputationId),

    #[error("owner {0:?} has been disposed")]
    OwnerDisposed(OwnerId),

    /// The computation never completed a successful run.
    #[error("computation {0:?} has no value yet")]
    NoValue(ComputationId),

    /// The signal's value is borrowed by an enclosing `with` call.
    #[error("signal {0:?} is borrowed and cannot be written")]
    Borrowed(SignalId),

    #[error("signal {0:?} holds a value of a different type")]
    TypeMismatch(SignalId),
}

/// Render a panic payload for logs and errors.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
