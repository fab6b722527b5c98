//! The trace/verdict data model (C1).
//!
//! Traces are immutable once stored (invariant 1): every field is set at
//! construction time except the two allow-listed mutations `bless` and the
//! `replay_of` backfill, both of which are expressed here as "build a new
//! value", never as an in-place mutation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a failing expectation rule, ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Quality issue: missing expected content, response too short.
    Low,
    /// Performance issue: latency over budget.
    Medium,
    /// Critical failure: forbidden content present.
    High,
}

/// Pass/fail outcome of an expectation evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    /// All rules passed.
    Pass,
    /// At least one rule failed.
    Fail,
}

/// Immutable outcome of running the expectation evaluator against a trace.
///
/// Once attached to a [`Trace`] a verdict is never rewritten (invariant 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Overall pass/fail outcome.
    pub status: VerdictStatus,
    /// Highest severity among failing rules; absent iff `status` is `Pass`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Human-readable violation messages, in rule evaluation order.
    pub violations: Vec<String>,
}

impl Verdict {
    /// A verdict with no violations.
    #[must_use]
    pub fn passing() -> Self {
        Self {
            status: VerdictStatus::Pass,
            severity: None,
            violations: Vec::new(),
        }
    }
}

/// Role of a message within a chat-style request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System/instruction message.
    System,
    /// End-user message.
    User,
    /// Model-authored message.
    Assistant,
    /// Tool/function result fed back to the model.
    Tool,
}

/// One message in a chat-style request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored this message.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Optional name qualifying the role (e.g. a tool name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Construct a user message with no `name`.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            name: None,
        }
    }
}

/// Sampling parameters sent with the request. All fields optional; a
/// provider that does not support a given parameter simply ignores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// The outbound request as captured at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Provider tag, e.g. `"openai"`.
    pub provider: String,
    /// Model name, e.g. `"gpt-4o"`.
    pub model: String,
    /// Ordered chat messages.
    pub messages: Vec<Message>,
    /// Sampling parameters.
    pub parameters: Parameters,
}

/// Token accounting reported by the provider, mapped verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Sum of prompt and completion tokens.
    pub total_tokens: u32,
}

/// The normalised response, after applying the §6 response-normalisation
/// cascade to the opaque object the provider callable returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Normalised response text.
    pub text: String,
    /// Reserved for a tokenised form of `text`; the capture pipeline
    /// never populates this today, but the on-disk schema carries the
    /// slot for a future tokenizer pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<String>>,
    /// Elapsed wall-clock time, floored to whole milliseconds.
    pub latency_ms: u64,
    /// Token accounting, when the provider reported it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Identifies the library (and its version) that produced the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    /// Library name, usually the provider tag.
    pub library: String,
    /// Library version, or `"unknown"` when not resolvable.
    pub version: String,
}

impl Runtime {
    /// Build a runtime record, defaulting the version to `"unknown"`.
    #[must_use]
    pub fn new(library: impl Into<String>, version: Option<String>) -> Self {
        Self {
            library: library.into(),
            version: version.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// One immutable record of a single model call.
///
/// See invariants 1-2 in the data model: a trace is write-once except for
/// `bless` and the `replay_of` backfill performed at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Random 128-bit identity.
    pub trace_id: Uuid,
    /// UTC capture time.
    pub timestamp: DateTime<Utc>,
    /// Groups sibling traces of one program run.
    pub execution_id: String,
    /// Unique per trace; doubles as the graph vertex id.
    pub node_id: String,
    /// The enclosing traced call at capture time, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<String>,
    /// The outbound request.
    pub request: Request,
    /// The normalised response.
    pub response: Response,
    /// Library/version that produced this trace.
    pub runtime: Runtime,
    /// The trace this one replays, if it was produced by a replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_of: Option<Uuid>,
    /// Free-form metadata; holds `output_hash`/`blessed_at` once blessed.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Expectation-evaluation outcome, if expectations were declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Whether this trace is a golden reference for its `(model, provider)`.
    #[serde(default)]
    pub blessed: bool,
}

impl Trace {
    /// `metadata["output_hash"]` as a plain string, if present and a string.
    #[must_use]
    pub fn output_hash(&self) -> Option<&str> {
        self.metadata.get("output_hash").and_then(|v| v.as_str())
    }

    /// The first user message's content, if any.
    #[must_use]
    pub fn first_user_message(&self) -> Option<&str> {
        self.request
            .messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// A copy of this trace with `blessed=true` and `metadata.output_hash`
    /// / `metadata.blessed_at` set. Does not mutate `self` (invariant 1);
    /// the store is responsible for persisting the result in place of the
    /// original file.
    #[must_use]
    pub fn with_bless(&self, output_hash: String, blessed_at: DateTime<Utc>) -> Self {
        let mut traced = self.clone();
        traced.blessed = true;
        traced.metadata.insert(
            "output_hash".to_string(),
            serde_json::Value::String(output_hash),
        );
        traced.metadata.insert(
            "blessed_at".to_string(),
            serde_json::Value::String(blessed_at.to_rfc3339()),
        );
        traced
    }

    /// A copy of this trace with `blessed=false` and the bless-only
    /// metadata keys removed.
    #[must_use]
    pub fn with_unbless(&self) -> Self {
        let mut traced = self.clone();
        traced.blessed = false;
        traced.metadata.remove("output_hash");
        traced.metadata.remove("blessed_at");
        traced
    }

    /// A copy of this trace with `replay_of` backfilled to `original`.
    /// The other allow-listed mutation alongside `bless`/`unbless`
    /// (invariant 1): performed once, right after the replay trace is
    /// captured, never revisited after.
    #[must_use]
    pub fn with_replay_of(&self, original: Uuid) -> Self {
        let mut traced = self.clone();
        traced.replay_of = Some(original);
        traced
    }
}
