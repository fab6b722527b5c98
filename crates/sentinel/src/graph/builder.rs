//! Graph construction (C6): assemble one execution's traces into an
//! immutable [`ExecutionGraph`], inferring each node's semantic role and
//! grouping contiguous same-role runs into stages.

use crate::error::{Error, Result};
use crate::model::Trace;

use super::{EdgeType, ExecutionGraph, GraphEdge, GraphNode, GraphStage, NodeRole};

const VALIDATION_KEYWORDS: [&str; 3] = ["check", "validate", "verify"];
const TRANSFORM_KEYWORDS: [&str; 2] = ["parse", "extract"];
const HUMAN_LABEL_MAX_CHARS: usize = 40;

fn infer_role(trace: &Trace, index: usize, last_index: usize) -> NodeRole {
    let first_user = trace.first_user_message().unwrap_or("").to_lowercase();

    if trace.verdict.is_some() || VALIDATION_KEYWORDS.iter().any(|kw| first_user.contains(kw)) {
        return NodeRole::Validation;
    }
    if TRANSFORM_KEYWORDS.iter().any(|kw| first_user.contains(kw)) {
        return NodeRole::Transform;
    }
    if index == 0 && trace.parent_node_id.is_none() {
        return NodeRole::Input;
    }
    if index == last_index {
        return NodeRole::Output;
    }
    NodeRole::Llm
}

fn human_label(trace: &Trace, role: NodeRole) -> String {
    match trace.first_user_message() {
        Some(text) if !text.is_empty() => {
            let truncated: String = text.chars().take(HUMAN_LABEL_MAX_CHARS).collect();
            let mut label = capitalize(&truncated);
            if text.chars().count() > HUMAN_LABEL_MAX_CHARS {
                label.push('…');
            }
            label
        }
        _ => format!("{} ({})", role_name(role), trace.request.model),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn role_name(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Input => "input",
        NodeRole::Transform => "transform",
        NodeRole::Validation => "validation",
        NodeRole::Tool => "tool",
        NodeRole::Output => "output",
        NodeRole::Llm => "llm",
    }
}

/// Build an [`ExecutionGraph`] from the traces of one execution.
///
/// `traces` must be non-empty and share one `execution_id`; both are
/// caller mistakes surfaced as [`Error::InputError`], not persisted.
pub fn build_graph(traces: &[Trace]) -> Result<ExecutionGraph> {
    if traces.is_empty() {
        return Err(Error::InputError(
            "graph builder requires at least one trace".to_string(),
        ));
    }
    let execution_id = &traces[0].execution_id;
    if traces.iter().any(|t| &t.execution_id != execution_id) {
        return Err(Error::InputError(
            "graph builder requires traces from a single execution_id".to_string(),
        ));
    }

    let last_index = traces.len() - 1;
    let mut nodes = Vec::with_capacity(traces.len());
    let mut edges = Vec::new();
    let mut root_node_id = None;
    let mut total_latency_ms: u64 = 0;

    for (index, trace) in traces.iter().enumerate() {
        let role = infer_role(trace, index, last_index);
        let label = human_label(trace, role);
        total_latency_ms += trace.response.latency_ms;

        if let Some(parent) = &trace.parent_node_id {
            edges.push(GraphEdge {
                from: parent.clone(),
                to: trace.node_id.clone(),
                edge_type: EdgeType::Calls,
            });
        } else if root_node_id.is_none() {
            root_node_id = Some(trace.node_id.clone());
        }

        nodes.push(GraphNode {
            node_id: trace.node_id.clone(),
            trace_id: trace.trace_id,
            role,
            human_label: label.clone(),
            description: role.description().to_string(),
            model: Some(trace.request.model.clone()),
            provider: Some(trace.request.provider.clone()),
            latency_ms: trace.response.latency_ms,
            verdict_status: trace.verdict.as_ref().map(|v| v.status),
            label,
        });
    }

    let root_node_id = root_node_id.unwrap_or_else(|| nodes[0].node_id.clone());
    let stages = build_stages(&nodes);
    let created_at = traces.iter().map(|t| t.timestamp).min().unwrap_or_default();

    Ok(ExecutionGraph {
        execution_id: execution_id.clone(),
        created_at,
        node_count: nodes.len(),
        nodes,
        edges,
        stages,
        root_node_id,
        total_latency_ms,
        verdict: None,
        integrity_hash: None,
        snapshot_at: None,
    })
}

/// §4.5 C6.2: walk nodes in ingestion order; whenever the role changes,
/// close the previous stage and open a new one.
fn build_stages(nodes: &[GraphNode]) -> Vec<GraphStage> {
    let mut stages: Vec<GraphStage> = Vec::new();
    for node in nodes {
        let failed = node.verdict_status == Some(crate::model::VerdictStatus::Fail);
        match stages.last_mut() {
            Some(stage) if stage.role == node.role => {
                stage.node_ids.push(node.node_id.clone());
                stage.total_latency_ms += node.latency_ms;
                stage.node_count += 1;
                stage.has_failure |= failed;
            }
            _ => stages.push(GraphStage {
                role: node.role,
                node_ids: vec![node.node_id.clone()],
                total_latency_ms: node.latency_ms,
                node_count: 1,
                has_failure: failed,
            }),
        }
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Parameters, Request, Response, Runtime, Verdict, VerdictStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn trace(node_id: &str, parent: Option<&str>, first_message: &str) -> Trace {
        Trace {
            trace_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            execution_id: "exec-1".to_string(),
            node_id: node_id.to_string(),
            parent_node_id: parent.map(str::to_string),
            request: Request {
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                messages: vec![Message::user(first_message)],
                parameters: Parameters::default(),
            },
            response: Response {
                text: "response".to_string(),
                tokens: None,
                latency_ms: 10,
                usage: None,
            },
            runtime: Runtime::new("openai", None),
            replay_of: None,
            metadata: Default::default(),
            verdict: None,
            blessed: false,
        }
    }

    #[test]
    fn empty_trace_list_is_input_error() {
        let err = build_graph(&[]).expect_err("empty input error");
        assert!(matches!(err, Error::InputError(_)));
    }

    #[test]
    fn mixed_execution_ids_is_input_error() {
        let mut b = trace("b", None, "second");
        b.execution_id = "exec-2".to_string();
        let err = build_graph(&[trace("a", None, "first"), b]).expect_err("mixed ids error");
        assert!(matches!(err, Error::InputError(_)));
    }

    #[test]
    fn first_trace_without_parent_is_root() {
        let graph = build_graph(&[trace("a", None, "start here")]).expect("build");
        assert_eq!(graph.root_node_id, "a");
        assert_eq!(graph.nodes[0].role, super::NodeRole::Input);
    }

    #[test]
    fn edges_follow_parent_node_id() {
        let graph =
            build_graph(&[trace("a", None, "start"), trace("b", Some("a"), "next")]).expect("build");
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].from, "a");
        assert_eq!(graph.edges[0].to, "b");
    }

    #[test]
    fn validation_keyword_wins_over_transform_keyword() {
        let graph = build_graph(&[trace("a", None, "please validate and parse this")])
            .expect("build");
        assert_eq!(graph.nodes[0].role, super::NodeRole::Validation);
    }

    #[test]
    fn verdict_present_forces_validation_role() {
        let mut t = trace("a", None, "summarize the document");
        t.verdict = Some(Verdict::passing());
        let graph = build_graph(&[t]).expect("build");
        assert_eq!(graph.nodes[0].role, super::NodeRole::Validation);
    }

    #[test]
    fn last_trace_defaults_to_output_role() {
        let graph = build_graph(&[
            trace("a", None, "start"),
            trace("b", Some("a"), "middle step"),
            trace("c", Some("b"), "finish up"),
        ])
        .expect("build");
        assert_eq!(graph.nodes[2].role, super::NodeRole::Output);
        assert_eq!(graph.nodes[1].role, super::NodeRole::Llm);
    }

    #[test]
    fn human_label_truncates_with_ellipsis() {
        let long = "a".repeat(60);
        let graph = build_graph(&[trace("a", None, &long)]).expect("build");
        let label = &graph.nodes[0].human_label;
        assert!(label.ends_with('…'));
        assert_eq!(label.chars().count(), HUMAN_LABEL_MAX_CHARS + 1);
    }

    #[test]
    fn total_latency_is_sum_of_node_latencies() {
        let graph = build_graph(&[trace("a", None, "x"), trace("b", Some("a"), "y")])
            .expect("build");
        assert_eq!(graph.total_latency_ms, 20);
    }

    #[test]
    fn stages_group_contiguous_same_role_nodes() {
        let graph = build_graph(&[
            trace("a", None, "start"),
            trace("b", Some("a"), "middle one"),
            trace("c", Some("b"), "middle two"),
            trace("d", Some("c"), "final step"),
        ])
        .expect("build");
        // a=input, b/c=llm (contiguous), d=output => 3 stages
        assert_eq!(graph.stages.len(), 3);
        assert_eq!(graph.stages[1].node_count, 2);
    }
}
