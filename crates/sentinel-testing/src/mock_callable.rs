//! A scriptable stand-in for a real model-provider client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sentinel::{ProviderCallable, Result as SentinelResult};
use serde_json::Value;

/// One scripted outcome for a [`MockCallable`] call.
type Outcome = std::result::Result<Value, String>;

/// A [`ProviderCallable`] whose responses are scripted ahead of time,
/// for driving the capture pipeline without a network call.
///
/// Responses are consumed in order; once exhausted, the last response is
/// repeated, mirroring the teacher's `dashflow-testing` mock transports
/// that keep answering after their script runs out rather than panicking
/// mid-test.
pub struct MockCallable {
    responses: Vec<Outcome>,
    delay: Option<Duration>,
    library_version: Option<String>,
    calls_made: AtomicUsize,
}

impl MockCallable {
    /// A callable that always returns `text` as a plain string response.
    #[must_use]
    pub fn fixed_text(text: impl Into<String>) -> Self {
        Self::with_responses(vec![Ok(Value::String(text.into()))])
    }

    /// A callable that always fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_responses(vec![Err(message.into())])
    }

    /// A callable that replays `responses` in order, then repeats the
    /// last one.
    #[must_use]
    pub fn with_responses(responses: Vec<Outcome>) -> Self {
        assert!(!responses.is_empty(), "MockCallable needs at least one scripted response");
        Self {
            responses,
            delay: None,
            library_version: None,
            calls_made: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` before returning, to exercise latency-dependent
    /// expectations like `MaxLatencyMs`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report `version` from [`ProviderCallable::library_version`].
    #[must_use]
    pub fn with_library_version(mut self, version: impl Into<String>) -> Self {
        self.library_version = Some(version.into());
        self
    }

    /// Number of calls made so far.
    pub fn calls_made(&self) -> usize {
        self.calls_made.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderCallable for MockCallable {
    async fn call(&self) -> std::result::Result<Value, String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let index = self.calls_made.fetch_add(1, Ordering::SeqCst);
        let slot = index.min(self.responses.len() - 1);
        self.responses[slot].clone()
    }

    fn library_version(&self) -> Option<String> {
        self.library_version.clone()
    }
}

/// Helper asserting a [`sentinel::Trace`] round through a mock pipeline
/// produced the expected text, for tests that just want a quick check.
pub fn assert_trace_text(trace: &SentinelResult<sentinel::Trace>, expected: &str) {
    match trace {
        Ok(t) => assert_eq!(t.response.text, expected),
        Err(e) => panic!("expected trace, got error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_text_returns_same_value_every_call() {
        let mock = MockCallable::fixed_text("hi");
        assert_eq!(mock.call().await.unwrap(), Value::String("hi".to_string()));
        assert_eq!(mock.call().await.unwrap(), Value::String("hi".to_string()));
        assert_eq!(mock.calls_made(), 2);
    }

    #[tokio::test]
    async fn scripted_responses_consumed_in_order_then_repeat_last() {
        let mock = MockCallable::with_responses(vec![
            Ok(Value::String("first".to_string())),
            Ok(Value::String("second".to_string())),
        ]);
        assert_eq!(mock.call().await.unwrap(), Value::String("first".to_string()));
        assert_eq!(mock.call().await.unwrap(), Value::String("second".to_string()));
        assert_eq!(mock.call().await.unwrap(), Value::String("second".to_string()));
    }

    #[tokio::test]
    async fn failing_always_errors() {
        let mock = MockCallable::failing("boom");
        assert_eq!(mock.call().await.unwrap_err(), "boom");
    }
}
