//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computed
//! values, effects and resources, the owner tree that scopes their
//! lifetimes, and the runtime that schedules them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a computation runs, the computation is registered as a dependent.
//! When the value changes, every dependent is invalidated.
//!
//! ## Computed Values
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changes, and always before any effect
//! in the same flush.
//!
//! ## Effects and Resources
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. A Resource is a derived value scheduled like an
//! effect. Both are ordered by priority within a flush.
//!
//! ## Owners
//!
//! Everything created while an owner is active belongs to it. Disposing an
//! owner disposes its subtree and runs its cleanup callbacks.
//!
//! # Implementation Notes
//!
//! The runtime keeps a stack of tracking frames. When a signal is read, we
//! check the top frame and, if it belongs to a computation, record the
//! dependency. Writes are coalesced in a batch and flushed in phases:
//! signals, computed values in topological order, effects by priority,
//! then listener callbacks.

mod computation;
mod computed;
mod context;
mod effect;
mod owner;
mod resolver;
mod resource;
mod runtime;
mod signal;
mod subscriber;

pub use computation::{ComputationOptions, Runnable};
pub use computed::Computed;
pub use effect::Effect;
pub use owner::Owner;
pub use resolver::{CycleRecord, CycleResolution};
pub use resource::Resource;
pub use runtime::Runtime;
pub use signal::{ReadSignal, Signal, WriteSignal};
pub use subscriber::{SubscriberId, Subscription};
