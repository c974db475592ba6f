//! Introspection
//!
//! Read-only views of a runtime for external tooling: the dependency
//! graph, the pending work of the current batch, the cycles the resolver
//! has seen and the computations currently in flight.
//!
//! Snapshots are plain data. They serialize with serde, and the graph can
//! also be rendered as Graphviz DOT.

use std::fmt::Write as _;

use serde::Serialize;
use slotmap::Key;

use crate::graph::{ComputationId, ComputationState, NodeKind, Priority, SignalId};
use crate::reactive::{CycleRecord, Runtime};

/// One node of a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    /// Stable name within the snapshot, e.g. `s1v1` or `c3v1`.
    pub id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `None` for signals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ComputationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub run_count: usize,
    pub listeners: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// The computation read the signal in its last run.
    Reads,
    /// The computation writes the signal (its output).
    Produces,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeSnapshot {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// The dependency graph at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render as a Graphviz digraph. Reads are solid edges, outputs dashed.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        out.push_str("digraph Trellis {\n");
        out.push_str("  rankdir=LR;\n");
        out.push_str("  node [fontsize=10];\n");

        for node in &self.nodes {
            let shape = match node.kind {
                NodeKind::Signal => "ellipse",
                NodeKind::Computed => "box",
                NodeKind::Effect => "diamond",
                NodeKind::Resource => "hexagon",
            };
            let label = node.label.as_deref().unwrap_or(&node.id);
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\", shape={}];",
                node.id,
                label.replace('"', "\\\""),
                shape
            );
        }

        for edge in &self.edges {
            let style = match edge.kind {
                EdgeKind::Reads => "solid",
                EdgeKind::Produces => "dashed",
            };
            let _ = writeln!(out, "  \"{}\" -> \"{}\" [style={}];", edge.from, edge.to, style);
        }

        out.push_str("}\n");
        out
    }
}

/// Work queued in the current batch plus the deferred queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingSnapshot {
    pub batch_depth: usize,
    pub flushing: bool,
    pub signals: Vec<SignalId>,
    pub computed: Vec<ComputationId>,
    pub effects: Vec<ComputationId>,
    pub callbacks: usize,
    pub deferred: Vec<ComputationId>,
}

impl PendingSnapshot {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
            && self.computed.is_empty()
            && self.effects.is_empty()
            && self.callbacks == 0
            && self.deferred.is_empty()
    }
}

pub(crate) fn signal_name(id: SignalId) -> String {
    format!("s{:?}", id.data())
}

pub(crate) fn computation_name(id: ComputationId) -> String {
    format!("c{:?}", id.data())
}

impl Runtime {
    /// Capture every node and edge of the dependency graph.
    ///
    /// Computed outputs are folded into a `produces` edge from the
    /// computation to its output signal.
    pub fn graph_snapshot(&self) -> GraphSnapshot {
        let st = self.state();
        let mut snapshot = GraphSnapshot::default();

        for (id, cell) in &st.signals {
            snapshot.nodes.push(NodeSnapshot {
                id: signal_name(id),
                kind: NodeKind::Signal,
                label: None,
                state: None,
                priority: None,
                run_count: 0,
                listeners: cell.listeners.len(),
            });
        }

        for (id, node) in &st.computations {
            snapshot.nodes.push(NodeSnapshot {
                id: computation_name(id),
                kind: node.kind,
                label: node.label.clone(),
                state: Some(node.state),
                priority: Some(node.priority),
                run_count: node.run_count,
                listeners: 0,
            });
            if let Some(output) = node.output {
                snapshot.edges.push(EdgeSnapshot {
                    from: computation_name(id),
                    to: signal_name(output),
                    kind: EdgeKind::Produces,
                });
            }
        }

        for (signal, computation) in st.graph.edges() {
            snapshot.edges.push(EdgeSnapshot {
                from: signal_name(signal),
                to: computation_name(computation),
                kind: EdgeKind::Reads,
            });
        }

        snapshot
    }

    pub fn pending(&self) -> PendingSnapshot {
        let st = self.state();
        PendingSnapshot {
            batch_depth: st.batch.depth(),
            flushing: st.batch.is_flushing(),
            signals: st.batch.pending_signals().collect(),
            computed: st.batch.pending_computed().collect(),
            effects: st.batch.pending_effects().collect(),
            callbacks: st.batch.pending_callback_count(),
            deferred: st.deferred.iter().copied().collect(),
        }
    }

    /// Cycles detected so far, oldest first. Bounded by
    /// [`RuntimeConfig::cycle_history`](crate::RuntimeConfig).
    pub fn cycles(&self) -> Vec<CycleRecord> {
        self.state().resolver.history().cloned().collect()
    }

    /// Computations on the current call chain, outermost first.
    pub fn in_flight(&self) -> Vec<ComputationId> {
        self.state().resolver.in_flight().to_vec()
    }
}
