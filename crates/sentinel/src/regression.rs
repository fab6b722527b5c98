//! Regression checking (C10): re-run every blessed trace's provider
//! callable and compare the replay's content hash against the golden
//! hash, plus a parallel graph-level check over stored executions.
//!
//! Grounded in the teacher's CI gate idiom (`dashflow-evals::ci::gates`
//! / `regression.rs`): a fixed pass/fail rule, a typed report the host
//! turns into an exit code, no configurable scoring.

use std::collections::HashMap;

use crate::capture::{CapturedCall, ProviderCallable};
use crate::config::RegressionConfig;
use crate::error::{Error, Result};
use crate::graph::analyzer::compute_verdict;
use crate::graph::builder::build_graph;
use crate::model::{Trace, VerdictStatus};
use crate::store::{content_hash, Store};

/// Outcome of replaying one golden trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegressionOutcome {
    /// The replay's content hash matches the golden's recorded hash.
    Match,
    /// The replay's content hash differs.
    Mismatch,
    /// No callable was registered for the golden's `(model, provider)`.
    Skipped,
}

/// One golden trace's regression result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionResult {
    /// The golden trace that was replayed.
    pub golden_trace_id: uuid::Uuid,
    /// The freshly captured replay trace, if the replay ran.
    pub replay_trace_id: Option<uuid::Uuid>,
    /// Hash recorded on the golden trace at bless time.
    pub expected_hash: Option<String>,
    /// Hash computed from the replay's response text.
    pub actual_hash: Option<String>,
    /// Match / mismatch / skipped.
    pub outcome: RegressionOutcome,
}

/// Aggregate report over every golden trace in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionReport {
    /// One entry per golden trace considered.
    pub results: Vec<RegressionResult>,
}

impl RegressionReport {
    /// Whether every non-skipped result matched.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.outcome != RegressionOutcome::Mismatch)
    }

    /// Goldens whose replay hash differed from the recorded golden hash.
    #[must_use]
    pub fn mismatches(&self) -> Vec<&RegressionResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == RegressionOutcome::Mismatch)
            .collect()
    }
}

/// Re-run every blessed trace through the matching registered callable
/// and compare hashes. `callables` is keyed by `(model, provider)`;
/// goldens with no matching entry are reported as [`RegressionOutcome::Skipped`],
/// not treated as failures (there is nothing to replay them with).
pub async fn check_regressions(
    store: &Store,
    callables: &HashMap<(String, String), Box<dyn ProviderCallable>>,
    _config: &RegressionConfig,
) -> Result<RegressionReport> {
    let goldens = store.list_blessed()?;
    let mut results = Vec::with_capacity(goldens.len());

    for golden in goldens {
        let key = (golden.request.model.clone(), golden.request.provider.clone());
        let Some(callable) = callables.get(&key) else {
            tracing::warn!(
                golden_trace_id = %golden.trace_id,
                model = %golden.request.model,
                provider = %golden.request.provider,
                "no registered callable for golden; skipping"
            );
            results.push(RegressionResult {
                golden_trace_id: golden.trace_id,
                replay_trace_id: None,
                expected_hash: golden.output_hash().map(str::to_string),
                actual_hash: None,
                outcome: RegressionOutcome::Skipped,
            });
            continue;
        };

        let expected_hash = golden.output_hash().map(str::to_string);
        match replay_via_captured_call(store, &golden, callable.as_ref()).await {
            Ok(replay) => {
                let actual_hash = content_hash(&replay.response.text);
                let outcome = if expected_hash.as_deref() == Some(actual_hash.as_str()) {
                    RegressionOutcome::Match
                } else {
                    RegressionOutcome::Mismatch
                };
                tracing::debug!(
                    golden_trace_id = %golden.trace_id,
                    replay_trace_id = %replay.trace_id,
                    ?outcome,
                    "regression check evaluated one golden"
                );

                results.push(RegressionResult {
                    golden_trace_id: golden.trace_id,
                    replay_trace_id: Some(replay.trace_id),
                    expected_hash,
                    actual_hash: Some(actual_hash),
                    outcome,
                });
            }
            Err(Error::ProviderError(message)) => {
                tracing::warn!(
                    golden_trace_id = %golden.trace_id,
                    %message,
                    "replay's provider callable failed; recording as a mismatch"
                );
                results.push(RegressionResult {
                    golden_trace_id: golden.trace_id,
                    replay_trace_id: None,
                    expected_hash,
                    actual_hash: None,
                    outcome: RegressionOutcome::Mismatch,
                });
            }
            Err(other) => return Err(other),
        }
    }

    Ok(RegressionReport { results })
}

/// Drive one golden trace's callable through the same capture pipeline
/// used for live calls, so replays get identical trace shape and
/// persistence semantics. `CapturedCall` owns its callable, so a
/// short-lived wrapper forwards through the borrowed trait object.
async fn replay_via_captured_call(
    store: &Store,
    golden: &Trace,
    callable: &(dyn ProviderCallable + '_),
) -> Result<Trace> {
    struct BorrowedCallable<'a>(&'a (dyn ProviderCallable + 'a));

    #[async_trait::async_trait]
    impl<'a> ProviderCallable for BorrowedCallable<'a> {
        async fn call(&self) -> std::result::Result<serde_json::Value, String> {
            self.0.call().await
        }

        fn library_version(&self) -> Option<String> {
            self.0.library_version()
        }
    }

    let replay = CapturedCall::new(
        golden.request.provider.clone(),
        golden.request.model.clone(),
        BorrowedCallable(callable),
    )
    .with_messages(golden.request.messages.clone())
    .with_parameters(golden.request.parameters.clone())
    .invoke(store)
    .await?;

    let backfilled = replay.with_replay_of(golden.trace_id);
    store.save(&backfilled)?;
    Ok(backfilled)
}

/// Graph-level regression check (§4.9): every stored execution must
/// build a graph whose aggregate verdict is `pass`. Unlike
/// [`check_regressions`] this needs no provider callable — it only
/// re-analyses traces already on disk.
pub fn check_execution_graphs(store: &Store) -> Result<Vec<(String, VerdictStatus)>> {
    let mut execution_ids: Vec<String> = Vec::new();
    for trace in store.list(usize::MAX, 0, None, None, None)? {
        if !execution_ids.contains(&trace.execution_id) {
            execution_ids.push(trace.execution_id);
        }
    }

    let mut statuses = Vec::with_capacity(execution_ids.len());
    for execution_id in execution_ids {
        let traces = store.traces_by_execution(&execution_id)?;
        if traces.is_empty() {
            continue;
        }
        let graph = build_graph(&traces)?;
        let verdict = compute_verdict(&graph)?;
        statuses.push((execution_id, verdict.status));
    }
    Ok(statuses)
}
