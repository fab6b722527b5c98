//! Graph analysis (C7): topological order, verdict aggregation, taint,
//! critical path, bottlenecks, and the investigation-path playbook.
//!
//! Every function here is read-only: it takes a `&ExecutionGraph` and
//! returns a value, mirroring the source's build-once-analyse-many
//! design and the teacher's `CausalAnalyzer` (`causal_analysis.rs`),
//! which likewise never mutates the trace it reasons about.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::model::VerdictStatus;

use super::{ExecutionGraph, GraphNodeId, GraphVerdict, NodeRole};

/// Kahn's algorithm; ties among zero-in-degree nodes are broken by the
/// order they were pushed onto the ready queue, which for a freshly
/// built graph is ingestion order. Returns [`Error::GraphError`] if the
/// graph has a cycle (not every node could be ordered).
pub fn topological_order(graph: &ExecutionGraph) -> Result<Vec<GraphNodeId>> {
    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.node_id.as_str(), 0)).collect();
    for edge in &graph.edges {
        if let Some(count) = in_degree.get_mut(edge.to.as_str()) {
            *count += 1;
        }
    }

    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.node_id.as_str())
        .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
        .collect();

    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(node_id) = queue.pop_front() {
        order.push(node_id.to_string());
        for child in graph.children_of(node_id) {
            if let Some(count) = in_degree.get_mut(child.as_str()) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(child.as_str());
                }
            }
        }
    }

    if order.len() != graph.nodes.len() {
        return Err(Error::GraphError(
            "graph contains a cycle; no total topological order exists".to_string(),
        ));
    }
    Ok(order)
}

/// `{n : n.verdict_status = fail}`, in ingestion order.
#[must_use]
pub fn failed_nodes(graph: &ExecutionGraph) -> Vec<GraphNodeId> {
    graph
        .nodes
        .iter()
        .filter(|n| n.verdict_status == Some(VerdictStatus::Fail))
        .map(|n| n.node_id.clone())
        .collect()
}

/// BFS from `node_id` through outgoing edges, inclusive of `node_id`
/// itself (the node's own blast radius).
#[must_use]
pub fn tainted(graph: &ExecutionGraph, node_id: &str) -> HashSet<GraphNodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(node_id.to_string());
    queue.push_back(node_id.to_string());

    while let Some(current) = queue.pop_front() {
        for child in graph.children_of(&current) {
            if visited.insert(child.clone()) {
                queue.push_back(child.clone());
            }
        }
    }
    visited
}

/// §4.6 `compute_verdict()`.
pub fn compute_verdict(graph: &ExecutionGraph) -> Result<GraphVerdict> {
    let failed = failed_nodes(graph);
    if failed.is_empty() {
        return Ok(GraphVerdict {
            status: VerdictStatus::Pass,
            root_cause_node: None,
            failed_count: 0,
            tainted_count: 0,
            message: "All nodes passed".to_string(),
        });
    }

    let order = topological_order(graph)?;
    let failed_set: HashSet<&str> = failed.iter().map(String::as_str).collect();
    let root_cause = order
        .iter()
        .find(|id| failed_set.contains(id.as_str()))
        .cloned()
        .ok_or_else(|| {
            Error::GraphError("failed node missing from topological order".to_string())
        })?;

    let mut tainted_union: HashSet<GraphNodeId> = HashSet::new();
    for failing in &failed {
        tainted_union.extend(tainted(graph, failing));
    }
    let tainted_count = tainted_union
        .iter()
        .filter(|id| !failed_set.contains(id.as_str()))
        .count();

    let root_label = graph
        .node(&root_cause)
        .map(|n| n.label.clone())
        .unwrap_or_else(|| root_cause.clone());

    Ok(GraphVerdict {
        status: VerdictStatus::Fail,
        root_cause_node: Some(root_cause),
        failed_count: failed.len(),
        tainted_count,
        message: format!("Root cause: {root_label}"),
    })
}

/// The latency-weighted longest path from any root to any leaf, and the
/// slowest node on it (the bottleneck).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalPath {
    /// Node ids along the path, root to leaf.
    pub path: Vec<GraphNodeId>,
    /// Sum of latencies along the path.
    pub total_latency_ms: u64,
    /// Id of the single slowest node on the path.
    pub bottleneck_node_id: GraphNodeId,
}

/// §4.6 critical path: DP in topological order, relaxing over parents.
pub fn critical_path(graph: &ExecutionGraph) -> Result<CriticalPath> {
    let order = topological_order(graph)?;
    // best.0 = best distance to this node, best.1 = path achieving it.
    let mut best: HashMap<GraphNodeId, (u64, Vec<GraphNodeId>)> = HashMap::new();

    for node_id in &order {
        let latency = graph.node(node_id).map(|n| n.latency_ms).unwrap_or(0);
        let parents = graph.parents_of(node_id);
        let incoming_best = parents
            .iter()
            .filter_map(|parent_id| best.get(parent_id.as_str()))
            .max_by_key(|(distance, _)| *distance)
            .cloned();

        let (distance, mut path) = match incoming_best {
            Some((parent_distance, parent_path)) => {
                (parent_distance + latency, parent_path)
            }
            None => (latency, Vec::new()),
        };
        path.push(node_id.clone());
        best.insert(node_id.clone(), (distance, path));
    }

    let end_nodes: Vec<&GraphNodeId> = graph
        .nodes
        .iter()
        .map(|n| &n.node_id)
        .filter(|id| graph.children_of(id).is_empty())
        .collect();

    let (total_latency_ms, path) = end_nodes
        .iter()
        .filter_map(|id| best.get(id.as_str()).cloned())
        .max_by_key(|(distance, _)| *distance)
        .ok_or_else(|| Error::GraphError("graph has no end nodes".to_string()))?;

    let bottleneck_node_id = path
        .iter()
        .max_by_key(|id| graph.node(id).map(|n| n.latency_ms).unwrap_or(0))
        .cloned()
        .ok_or_else(|| Error::GraphError("critical path is empty".to_string()))?;

    Ok(CriticalPath {
        path,
        total_latency_ms,
        bottleneck_node_id,
    })
}

/// One entry in the top-n bottleneck report.
#[derive(Debug, Clone, PartialEq)]
pub struct Bottleneck {
    /// Offending node.
    pub node_id: GraphNodeId,
    /// That node's latency.
    pub latency_ms: u64,
    /// Share of `graph.total_latency_ms`, as a percentage.
    pub percent_of_total: f64,
}

/// Top-`n` nodes by latency, with each node's share of total latency.
#[must_use]
pub fn bottlenecks(graph: &ExecutionGraph, top_n: usize) -> Vec<Bottleneck> {
    let mut ranked: Vec<&super::GraphNode> = graph.nodes.iter().collect();
    ranked.sort_by(|a, b| b.latency_ms.cmp(&a.latency_ms));

    ranked
        .into_iter()
        .take(top_n)
        .map(|n| Bottleneck {
            node_id: n.node_id.clone(),
            latency_ms: n.latency_ms,
            percent_of_total: if graph.total_latency_ms == 0 {
                0.0
            } else {
                (n.latency_ms as f64 / graph.total_latency_ms as f64) * 100.0
            },
        })
        .collect()
}

/// Deterministic investigation playbook (§4.6): pure graph reasoning,
/// no learned component.
pub fn investigation_path(graph: &ExecutionGraph) -> Result<Vec<String>> {
    let verdict = compute_verdict(graph)?;
    if verdict.status == VerdictStatus::Pass {
        return Ok(vec!["No investigation needed".to_string()]);
    }

    let mut steps = Vec::new();
    let root_cause_id = verdict
        .root_cause_node
        .clone()
        .expect("fail verdict always carries a root cause");
    let root_cause = graph.node(&root_cause_id);
    let root_label = root_cause
        .map(|n| n.label.clone())
        .unwrap_or_else(|| root_cause_id.clone());
    steps.push(format!("Examine root cause: {root_label}"));

    let parents = graph.parents_of(&root_cause_id);
    if let Some(parent_id) = parents.first() {
        let parent_label = graph
            .node(parent_id)
            .map(|n| n.label.clone())
            .unwrap_or_else(|| (*parent_id).clone());
        steps.push(format!("Examine input from: {parent_label}"));
    }

    if graph.nodes.iter().any(|n| n.role == NodeRole::Validation) {
        steps.push("Review validation rules".to_string());
    }

    let mut tainted_union: HashSet<GraphNodeId> = HashSet::new();
    for failing in failed_nodes(graph) {
        tainted_union.extend(tainted(graph, &failing));
    }
    if !tainted_union.is_empty() {
        steps.push(format!(
            "Blast radius: {} node(s) potentially affected",
            verdict.tainted_count
        ));
    }

    Ok(steps)
}
