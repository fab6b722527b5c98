//! Graph diffing (C9): compare two sealed (or unsealed) graphs node by
//! node, matched by semantic key rather than by id, so a re-run whose
//! node ids changed but whose shape didn't still diffs cleanly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DiffConfig;
use crate::error::Result;
use crate::model::VerdictStatus;

use super::analyzer::compute_verdict;
use super::{ExecutionGraph, GraphNodeId};

/// A node present in only one of the two graphs being compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDiff {
    /// The node's semantic key ([`super::GraphNode::semantic_key`]).
    pub key: String,
    /// Node id in whichever graph it came from.
    pub node_id: GraphNodeId,
    /// Its latency.
    pub latency_ms: u64,
    /// Its verdict status, if any.
    pub verdict_status: Option<VerdictStatus>,
}

/// A node present in both graphs whose latency or verdict differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedNode {
    /// Shared semantic key.
    pub key: String,
    /// `before.latency_ms`.
    pub latency_ms_before: u64,
    /// `after.latency_ms`.
    pub latency_ms_after: u64,
    /// `after - before`; negative means the node got faster.
    pub latency_delta_ms: i64,
    /// `before.verdict_status`.
    pub verdict_before: Option<VerdictStatus>,
    /// `after.verdict_status`.
    pub verdict_after: Option<VerdictStatus>,
}

/// Full comparison of two graphs built from the same logical execution
/// at different times (e.g. a baseline vs. a replay).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDiff {
    /// Nodes present in `after` but not `before`.
    pub added: Vec<NodeDiff>,
    /// Nodes present in `before` but not `after`.
    pub removed: Vec<NodeDiff>,
    /// Nodes present in both whose latency delta exceeds the configured
    /// threshold, or whose verdict status changed.
    pub changed: Vec<ChangedNode>,
    /// `after.total_latency_ms - before.total_latency_ms`.
    pub latency_delta_ms: i64,
    /// Whether `before`'s and `after`'s computed graph-level verdicts
    /// differ (`compute_verdict(before).status != compute_verdict(after).status`).
    pub verdict_changed: bool,
    /// `added.len() + removed.len() + changed.len()`.
    pub total_changes: usize,
}

/// Diff `before` against `after` using `config` for the change
/// threshold (open question (b): externalised rather than hardcoded).
/// `verdict_changed` compares the graphs' *computed* verdicts (§4.8),
/// not a cached field, since a freshly built graph never carries one.
pub fn diff(before: &ExecutionGraph, after: &ExecutionGraph, config: &DiffConfig) -> Result<GraphDiff> {
    let before_by_key: HashMap<&str, &super::GraphNode> = before
        .nodes
        .iter()
        .map(|n| (n.semantic_key(), n))
        .collect();
    let after_by_key: HashMap<&str, &super::GraphNode> =
        after.nodes.iter().map(|n| (n.semantic_key(), n)).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    for node in &after.nodes {
        match before_by_key.get(node.semantic_key()) {
            None => added.push(NodeDiff {
                key: node.semantic_key().to_string(),
                node_id: node.node_id.clone(),
                latency_ms: node.latency_ms,
                verdict_status: node.verdict_status,
            }),
            Some(previous) => {
                let latency_delta_ms = node.latency_ms as i64 - previous.latency_ms as i64;
                let verdict_differs = previous.verdict_status != node.verdict_status;
                if latency_delta_ms.unsigned_abs() > config.threshold_ms || verdict_differs {
                    changed.push(ChangedNode {
                        key: node.semantic_key().to_string(),
                        latency_ms_before: previous.latency_ms,
                        latency_ms_after: node.latency_ms,
                        latency_delta_ms,
                        verdict_before: previous.verdict_status,
                        verdict_after: node.verdict_status,
                    });
                }
            }
        }
    }

    let removed: Vec<NodeDiff> = before
        .nodes
        .iter()
        .filter(|n| !after_by_key.contains_key(n.semantic_key()))
        .map(|n| NodeDiff {
            key: n.semantic_key().to_string(),
            node_id: n.node_id.clone(),
            latency_ms: n.latency_ms,
            verdict_status: n.verdict_status,
        })
        .collect();

    let latency_delta_ms = after.total_latency_ms as i64 - before.total_latency_ms as i64;
    let verdict_changed = compute_verdict(before)?.status != compute_verdict(after)?.status;
    let total_changes = added.len() + removed.len() + changed.len();

    Ok(GraphDiff {
        added,
        removed,
        changed,
        latency_delta_ms,
        verdict_changed,
        total_changes,
    })
}
