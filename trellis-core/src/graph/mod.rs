//! Dependency Graph
//!
//! This module implements the bookkeeping that connects signals and
//! computations.
//!
//! # Overview
//!
//! The graph is a directed graph where:
//!
//! - Nodes are signal cells or computations (computed values, effects,
//!   resources)
//! - Edges are reads: if a computation read a signal during its last run,
//!   there is an edge from the signal to the computation
//!
//! When a signal changes, its dependents are collected into the batch
//! context. The flush then orders pending computed values so producers run
//! before their consumers.
//!
//! # Design Decisions
//!
//! 1. Nodes are identified by generational arena keys rather than pointers:
//!    - Equality and hashing are O(1)
//!    - A stale key simply misses instead of dangling
//!    - Breaking a signal/computation cycle is "remove the key on both sides"
//!
//! 2. We maintain both forward (sources) and reverse (subscribers) edges
//!    to enable efficient traversal in both directions.
//!
//! 3. Ordering only looks at the computations pending in the current flush,
//!    not the whole graph.

mod dependency;
mod node;
mod scheduler;

pub use dependency::DependencyGraph;
pub use node::{ComputationId, ComputationState, NodeKind, OwnerId, Priority, SignalId};
pub use scheduler::BatchContext;
