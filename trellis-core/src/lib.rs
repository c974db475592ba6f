//! Trellis Core
//!
//! This crate provides the reactive runtime that the Trellis state layers
//! build on. It implements:
//!
//! - Reactive primitives (signals, computed values, effects, resources)
//! - An owner tree that scopes lifetimes and cleanup callbacks
//! - A batching scheduler that flushes pending work in deterministic phases
//! - A dependency graph with local topological ordering of computed values
//! - Circular dependency detection with a configurable resolution policy
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: The runtime, its primitives and the owner tree
//! - `graph`: Arena ids, the dependency index and the batch context
//! - `debug`: Read-only snapshots for external tooling
//! - `config`: Runtime tuning knobs
//! - `error`: Error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create a signal
//! let count = rt.create_signal(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = rt.create_computed(move || c.get() * 2);
//!
//! // Create an effect
//! let d = doubled.clone();
//! rt.create_effect(move || {
//!     println!("Doubled: {}", d.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Doubled: 10"
//! ```

pub mod config;
pub mod debug;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{CyclePolicy, RuntimeConfig};
pub use error::{CircularDependencyError, DisposalError, ExecutionError, ReactiveError};
pub use graph::{ComputationId, OwnerId, Priority, SignalId};
pub use reactive::{
    Computed, ComputationOptions, Effect, Owner, ReadSignal, Resource, Runnable, Runtime, Signal,
    Subscription, WriteSignal,
};
