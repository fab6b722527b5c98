//! Execution graphs (C6-C9): read-only causal DAGs built once from a set
//! of traces sharing one `execution_id`, then analysed, sealed, and
//! diffed by pure functions that never mutate the graph (design note
//! "Graph as pure data + functions").

pub mod analyzer;
pub mod builder;
pub mod diff;
pub mod snapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::VerdictStatus;

/// Where a node sits in the causal chain of a program run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// The first call in an execution with no parent.
    Input,
    /// A call whose first message looks like a parse/extract step.
    Transform,
    /// A call whose first message looks like a check/validate/verify step,
    /// or that carries a verdict.
    Validation,
    /// A tool invocation (reserved for future capture-pipeline support;
    /// never inferred by the default role table in §4.5).
    Tool,
    /// The last call in an execution.
    Output,
    /// Any other call (the default).
    Llm,
}

impl NodeRole {
    /// Fixed per-role description table (§4.5).
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            NodeRole::Input => "Entry point of the execution",
            NodeRole::Transform => "Parses or extracts structured data",
            NodeRole::Validation => "Checks or validates a prior result",
            NodeRole::Tool => "Invokes an external tool",
            NodeRole::Output => "Final response of the execution",
            NodeRole::Llm => "Model call",
        }
    }
}

/// One vertex in an [`ExecutionGraph`], derived from a single trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Vertex id; equal to the originating trace's `node_id`.
    pub node_id: String,
    /// The trace this node was derived from.
    pub trace_id: uuid::Uuid,
    /// Inferred semantic role (§4.5 C6.1).
    pub role: NodeRole,
    /// First 40 characters of the first user message, capitalised, with
    /// an ellipsis if truncated; falls back to `"<role> (<model>)"`.
    pub human_label: String,
    /// Fixed per-role description.
    pub description: String,
    /// Model name, if the request carried one.
    pub model: Option<String>,
    /// Provider tag, if the request carried one.
    pub provider: Option<String>,
    /// Latency of the originating trace.
    pub latency_ms: u64,
    /// The originating trace's verdict status, if any.
    pub verdict_status: Option<VerdictStatus>,
    /// Semantic key used by the diff engine: `human_label`.
    pub label: String,
}

impl GraphNode {
    /// The semantic key the diff engine (C9) compares nodes by.
    #[must_use]
    pub fn semantic_key(&self) -> &str {
        &self.human_label
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id.
    pub from: GraphNodeId,
    /// Destination node id.
    pub to: GraphNodeId,
    /// What kind of relation this edge represents.
    pub edge_type: EdgeType,
}

/// A node id, newtyped so edges can't be confused with trace ids.
pub type GraphNodeId = String;

/// What a [`GraphEdge`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Parent directly invoked child.
    Calls,
    /// Parent's output fed child's input (same relation today; kept as a
    /// distinct variant so a future capture pipeline that distinguishes
    /// tool calls from data handoffs doesn't need a new edge shape).
    DataFlow,
}

/// A contiguous run of nodes (in ingestion order) that share a [`NodeRole`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStage {
    /// Role shared by every node in this stage.
    pub role: NodeRole,
    /// Node ids in this stage, in ingestion order.
    pub node_ids: Vec<GraphNodeId>,
    /// Sum of `latency_ms` across the stage's nodes.
    pub total_latency_ms: u64,
    /// Number of nodes in the stage.
    pub node_count: usize,
    /// Whether any node in the stage has `verdict_status = fail`.
    pub has_failure: bool,
}

/// An immutable causal DAG assembled from one execution's traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    /// Groups the traces this graph was built from.
    pub execution_id: String,
    /// Timestamp of the earliest trace in the execution.
    pub created_at: DateTime<Utc>,
    /// Every node, in ingestion order.
    pub nodes: Vec<GraphNode>,
    /// Every edge.
    pub edges: Vec<GraphEdge>,
    /// Contiguous same-role runs (§4.5 C6.2).
    pub stages: Vec<GraphStage>,
    /// The first trace with no parent.
    pub root_node_id: GraphNodeId,
    /// Sum of every node's latency.
    pub total_latency_ms: u64,
    /// `nodes.len()`.
    pub node_count: usize,
    /// Cached result of [`analyzer::compute_verdict`], if computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<GraphVerdict>,
    /// Present once [`snapshot::to_snapshot`] has sealed this graph.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,
    /// Present once [`snapshot::to_snapshot`] has sealed this graph.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_at: Option<DateTime<Utc>>,
}

impl ExecutionGraph {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Ids of every node with an edge pointing at `node_id`.
    #[must_use]
    pub fn parents_of(&self, node_id: &str) -> Vec<&GraphNodeId> {
        self.edges
            .iter()
            .filter(|e| e.to == node_id)
            .map(|e| &e.from)
            .collect()
    }

    /// Ids of every node `node_id` has an edge to.
    #[must_use]
    pub fn children_of(&self, node_id: &str) -> Vec<&GraphNodeId> {
        self.edges
            .iter()
            .filter(|e| e.from == node_id)
            .map(|e| &e.to)
            .collect()
    }
}

/// Aggregate pass/fail judgement over a whole graph (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphVerdict {
    /// Overall status.
    pub status: VerdictStatus,
    /// First failed node in topological order, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause_node: Option<GraphNodeId>,
    /// Count of nodes with `verdict_status = fail`.
    pub failed_count: usize,
    /// `|⋃ taint(f) \ failed|` across failed nodes `f`.
    pub tainted_count: usize,
    /// Human-readable summary.
    pub message: String,
}
