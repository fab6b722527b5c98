//! Build small multi-node executions without a real capture pipeline,
//! for tests that exercise the analyzer/diff/snapshot layer directly.

use chrono::Utc;
use sentinel::{
    Message, Parameters, Request, Response, Runtime, Trace, Verdict, VerdictStatus,
};
use uuid::Uuid;

/// One node to add to a [`GraphFixture`].
pub struct FixtureNode {
    node_id: String,
    parent: Option<String>,
    first_message: String,
    latency_ms: u64,
    verdict: Option<Verdict>,
}

impl FixtureNode {
    /// A node with no expectations declared (`verdict = None`).
    #[must_use]
    pub fn new(node_id: impl Into<String>, first_message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            parent: None,
            first_message: first_message.into(),
            latency_ms: 10,
            verdict: None,
        }
    }

    /// Set this node's parent, creating a causal edge.
    #[must_use]
    pub fn with_parent(mut self, parent_node_id: impl Into<String>) -> Self {
        self.parent = Some(parent_node_id.into());
        self
    }

    /// Set this node's captured latency.
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Attach a passing verdict.
    #[must_use]
    pub fn passing(mut self) -> Self {
        self.verdict = Some(Verdict::passing());
        self
    }

    /// Attach a failing verdict with the given violation message.
    #[must_use]
    pub fn failing(mut self, violation: impl Into<String>) -> Self {
        self.verdict = Some(Verdict {
            status: VerdictStatus::Fail,
            severity: Some(sentinel::Severity::High),
            violations: vec![violation.into()],
        });
        self
    }
}

/// Accumulates [`FixtureNode`]s into a list of [`Trace`]s sharing one
/// `execution_id`, ready to hand to `sentinel::graph::builder::build_graph`.
#[derive(Default)]
pub struct GraphFixture {
    execution_id: Option<String>,
    nodes: Vec<FixtureNode>,
}

impl GraphFixture {
    /// Start an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the generated `execution_id` (useful when a test asserts
    /// on it directly).
    #[must_use]
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    /// Append a node.
    #[must_use]
    pub fn node(mut self, node: FixtureNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Materialise the fixture into traces, in the order nodes were
    /// added, each one millisecond apart so timestamp ordering is
    /// deterministic.
    #[must_use]
    pub fn build_traces(self) -> Vec<Trace> {
        let execution_id = self
            .execution_id
            .unwrap_or_else(|| format!("fixture-{}", Uuid::new_v4()));
        let base = Utc::now();

        self.nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| Trace {
                trace_id: Uuid::new_v4(),
                timestamp: base + chrono::Duration::milliseconds(index as i64),
                execution_id: execution_id.clone(),
                node_id: node.node_id,
                parent_node_id: node.parent,
                request: Request {
                    provider: "openai".to_string(),
                    model: "gpt-4o".to_string(),
                    messages: vec![Message::user(node.first_message)],
                    parameters: Parameters::default(),
                },
                response: Response {
                    text: "fixture response".to_string(),
                    tokens: None,
                    latency_ms: node.latency_ms,
                    usage: None,
                },
                runtime: Runtime::new("openai", None),
                replay_of: None,
                metadata: Default::default(),
                verdict: node.verdict,
                blessed: false,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel::graph::builder::build_graph;

    #[test]
    fn fixture_builds_a_two_node_chain() {
        let traces = GraphFixture::new()
            .node(FixtureNode::new("a", "start here").passing())
            .node(FixtureNode::new("b", "finish up").with_parent("a").passing())
            .build_traces();

        let graph = build_graph(&traces).expect("build");
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.root_node_id, "a");
    }

    #[test]
    fn fixture_supports_a_failing_node() {
        let traces = GraphFixture::new()
            .node(FixtureNode::new("a", "start").passing())
            .node(
                FixtureNode::new("b", "forbidden phrase")
                    .with_parent("a")
                    .failing("found forbidden content"),
            )
            .build_traces();
        let graph = build_graph(&traces).expect("build");
        assert_eq!(graph.nodes[1].verdict_status, Some(VerdictStatus::Fail));
    }
}
