//! The capture pipeline (C4): time a provider callable, normalize its
//! response, attach execution-context keys, evaluate expectations, and
//! persist the resulting trace.
//!
//! Design note ("Polymorphic provider callable"): instead of a
//! class-per-provider hierarchy, a captured call is a plain async
//! callable plus a normaliser that only needs the raw JSON-ish value the
//! provider returned. Adding a provider means constructing a
//! [`CapturedCall`] with its tag; no trait implementation per provider is
//! required for the normalisation step itself.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::context::{self, NodeScope};
use crate::error::{Error, Result};
use crate::evaluator::{self, ExpectationRule};
use crate::model::{Message, Parameters, Request, Response, Runtime, Trace, Usage};
use crate::store::Store;

/// An opaque model-provider call. The core never inspects provider
/// credentials or transport; it only awaits this trait's `call` and
/// normalises whatever JSON-shaped value comes back.
#[async_trait]
pub trait ProviderCallable: Send + Sync {
    /// Invoke the provider. `Err` carries a human-readable message; the
    /// pipeline wraps it into an error trace and re-raises.
    async fn call(&self) -> std::result::Result<Value, String>;

    /// Library version to attach to the trace's `runtime`, if known.
    fn library_version(&self) -> Option<String> {
        None
    }
}

/// Apply the §6 response-normalisation cascade to an opaque provider
/// response: the first applicable rule wins.
#[must_use]
pub fn normalize_text(raw: &Value) -> String {
    if let Some(s) = raw.as_str() {
        return s.to_string();
    }
    if let Some(s) = raw
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return s.to_string();
    }
    if let Some(s) = raw.pointer("/choices/0/text").and_then(Value::as_str) {
        return s.to_string();
    }
    if let Some(s) = raw.get("text").and_then(Value::as_str) {
        return s.to_string();
    }
    raw.to_string()
}

/// Map a provider's `usage` object verbatim, if present and well-formed.
#[must_use]
pub fn normalize_usage(raw: &Value) -> Option<Usage> {
    let usage = raw.get("usage")?;
    Some(Usage {
        prompt_tokens: usage.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: usage.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: usage.get("total_tokens")?.as_u64()? as u32,
    })
}

/// An explicit builder for one captured call, replacing the source's
/// decorator-plus-function-keyed-map approach (design note
/// "Decorator-driven capture and ambient expectations").
pub struct CapturedCall<C: ProviderCallable> {
    provider: String,
    model: String,
    messages: Vec<Message>,
    parameters: Parameters,
    callable: C,
    expectations: Vec<ExpectationRule>,
}

impl<C: ProviderCallable> CapturedCall<C> {
    /// Start building a captured call.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>, callable: C) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            messages: Vec::new(),
            parameters: Parameters::default(),
            callable,
            expectations: Vec::new(),
        }
    }

    /// Set the chat messages for the request.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the sampling parameters for the request.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Declare expectations to evaluate against the response.
    #[must_use]
    pub fn with_expectations(mut self, expectations: Vec<ExpectationRule>) -> Self {
        self.expectations = expectations;
        self
    }

    /// Run the pipeline (§4.3): build the request, time the callable,
    /// normalise its response, evaluate expectations, persist, and
    /// return the stored trace. On provider failure, an error trace is
    /// persisted and `Err(Error::ProviderError)` is returned.
    pub async fn invoke(self, store: &Store) -> Result<Trace> {
        let execution_id = context::current_execution_id();
        let parent_node_id = context::current_parent_node_id();
        let node_id = Uuid::new_v4().to_string();
        let trace_id = Uuid::new_v4();

        let request = Request {
            provider: self.provider.clone(),
            model: self.model.clone(),
            messages: self.messages,
            parameters: self.parameters,
        };

        tracing::debug!(
            %execution_id,
            %node_id,
            provider = %self.provider,
            model = %self.model,
            "capture pipeline entered"
        );

        let _scope = NodeScope::enter(node_id.clone());
        let started = Instant::now();
        let outcome = self.callable.call().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(raw) => {
                let text = normalize_text(&raw);
                let usage = normalize_usage(&raw);
                let verdict = if self.expectations.is_empty() {
                    None
                } else {
                    Some(evaluator::evaluate(&self.expectations, &text, elapsed_ms))
                };

                let trace = Trace {
                    trace_id,
                    timestamp: Utc::now(),
                    execution_id,
                    node_id,
                    parent_node_id,
                    request,
                    response: Response {
                        text,
                        tokens: None,
                        latency_ms: elapsed_ms,
                        usage,
                    },
                    runtime: Runtime::new(self.provider.clone(), self.callable.library_version()),
                    replay_of: None,
                    metadata: Default::default(),
                    verdict,
                    blessed: false,
                };
                store.save(&trace)?;
                tracing::debug!(
                    trace_id = %trace.trace_id,
                    latency_ms = elapsed_ms,
                    "capture pipeline exited"
                );
                Ok(trace)
            }
            Err(message) => {
                let mut metadata = std::collections::BTreeMap::new();
                metadata.insert(
                    "error".to_string(),
                    serde_json::Value::String(message.clone()),
                );
                let trace = Trace {
                    trace_id,
                    timestamp: Utc::now(),
                    execution_id,
                    node_id,
                    parent_node_id,
                    request,
                    response: Response {
                        text: format!("ERROR: {message}"),
                        tokens: None,
                        latency_ms: elapsed_ms,
                        usage: None,
                    },
                    runtime: Runtime::new(self.provider.clone(), self.callable.library_version()),
                    replay_of: None,
                    metadata,
                    verdict: None,
                    blessed: false,
                };
                store.save(&trace)?;
                tracing::warn!(trace_id = %trace.trace_id, %message, "provider callable failed");
                Err(Error::ProviderError(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedCallable {
        result: std::result::Result<Value, String>,
    }

    #[async_trait]
    impl ProviderCallable for FixedCallable {
        async fn call(&self) -> std::result::Result<Value, String> {
            self.result.clone()
        }
    }

    #[test]
    fn normalize_text_string_itself() {
        assert_eq!(normalize_text(&json!("hello")), "hello");
    }

    #[test]
    fn normalize_text_chat_choices() {
        let raw = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(normalize_text(&raw), "hi");
    }

    #[test]
    fn normalize_text_completion_choices() {
        let raw = json!({"choices": [{"text": "hi"}]});
        assert_eq!(normalize_text(&raw), "hi");
    }

    #[test]
    fn normalize_text_text_key() {
        let raw = json!({"text": "hi"});
        assert_eq!(normalize_text(&raw), "hi");
    }

    #[test]
    fn normalize_text_falls_back_to_string_repr() {
        let raw = json!({"unexpected": 42});
        assert_eq!(normalize_text(&raw), raw.to_string());
    }

    #[test]
    fn normalize_usage_maps_verbatim() {
        let raw = json!({"usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}});
        let usage = normalize_usage(&raw).expect("usage present");
        assert_eq!(usage.prompt_tokens, 1);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 3);
    }

    #[tokio::test]
    async fn successful_call_persists_trace_with_verdict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(crate::config::StoreConfig::new(dir.path()));
        let callable = FixedCallable {
            result: Ok(json!("Hello! How can I help?")),
        };
        let trace = context::execution(|_exec_id| async move {
            CapturedCall::new("openai", "gpt-4o", callable)
                .with_messages(vec![Message::user("hi")])
                .with_expectations(vec![ExpectationRule::MustInclude {
                    substrings: vec!["help".to_string()],
                    case_sensitive: false,
                }])
                .invoke(&store)
                .await
        })
        .await
        .expect("invoke succeeds");

        assert_eq!(trace.response.text, "Hello! How can I help?");
        let verdict = trace.verdict.expect("verdict attached");
        assert_eq!(verdict.status, crate::model::VerdictStatus::Pass);
        assert!(store.get(trace.trace_id).expect("get").is_some());
    }

    #[tokio::test]
    async fn failing_call_persists_error_trace_and_reraises() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(crate::config::StoreConfig::new(dir.path()));
        let callable = FixedCallable {
            result: Err("connection reset".to_string()),
        };
        let result = context::execution(|_exec_id| async move {
            CapturedCall::new("openai", "gpt-4o", callable)
                .with_messages(vec![Message::user("hi")])
                .invoke(&store)
                .await
        })
        .await;

        let err = result.expect_err("provider error propagates");
        assert!(matches!(err, Error::ProviderError(_)));

        let all = store.list(10, 0, None, None, None).expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].response.text, "ERROR: connection reset");
    }

    #[tokio::test]
    async fn node_stack_is_balanced_after_invoke() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(crate::config::StoreConfig::new(dir.path()));
        context::execution(|_exec_id| async move {
            let callable = FixedCallable {
                result: Ok(json!("ok")),
            };
            CapturedCall::new("openai", "gpt-4o", callable)
                .invoke(&store)
                .await
                .expect("invoke succeeds");
            assert_eq!(context::current_parent_node_id(), None);
        })
        .await;
    }
}
