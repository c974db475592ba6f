//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! the runtime registers the current computation as a dependent.
//!
//! # Implementation
//!
//! Each runtime keeps a stack of frames. Running a computation pushes a
//! tracking frame; `untrack` and root scopes push an untracked frame. When
//! the work completes, the frame is popped.
//!
//! This design supports nested reactive contexts (e.g., a computed value
//! that pulls another stale computed value while it runs).

use crate::error::CircularDependencyError;
use crate::graph::ComputationId;

/// An entry in the reactive context stack.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The computation whose reads are being recorded, if tracking.
    pub computation: Option<ComputationId>,

    /// A cycle that was rejected while this frame was reading.
    pub error: Option<CircularDependencyError>,
}

/// Stack of tracking frames for one runtime.
#[derive(Debug, Default)]
pub(crate) struct TrackingStack {
    frames: Vec<Frame>,
}

impl TrackingStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a new frame. `None` suspends tracking until popped.
    pub fn push(&mut self, computation: Option<ComputationId>) {
        self.frames.push(Frame {
            computation,
            error: None,
        });
    }

    /// Leave the innermost frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// The computation reads should be attributed to, if any.
    pub fn current(&self) -> Option<ComputationId> {
        self.frames.last().and_then(|frame| frame.computation)
    }

    /// Check if there is an active tracking frame.
    pub fn is_tracking(&self) -> bool {
        self.current().is_some()
    }

    /// Attach a rejected cycle to the innermost frame.
    ///
    /// Returns the error back if there is no frame to carry it.
    pub fn record_error(
        &mut self,
        error: CircularDependencyError,
    ) -> Result<(), CircularDependencyError> {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.error.get_or_insert(error);
                Ok(())
            }
            None => Err(error),
        }
    }

    /// Take the rejected cycle recorded on the innermost frame.
    pub fn take_error(&mut self) -> Option<CircularDependencyError> {
        self.frames.last_mut().and_then(|frame| frame.error.take())
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
