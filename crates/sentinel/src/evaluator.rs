//! The deterministic expectation evaluator (C2).
//!
//! Four fixed rules, no extension hooks (design note: "Polymorphic rule
//! set" is recast as a closed sum type). Every rule is evaluated against
//! `(response_text, latency_ms)`; there is no short-circuit, so a caller
//! always gets every violation in one pass.

use crate::model::{Severity, Verdict, VerdictStatus};

/// Result of evaluating a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResult {
    /// Whether the rule passed.
    pub passed: bool,
    /// Stable rule name, used in diagnostics.
    pub rule_name: &'static str,
    /// Severity this rule carries when it fails.
    pub severity: Severity,
    /// Human-readable violation message; empty when `passed`.
    pub violation_message: String,
}

/// One of the four fixed expectation rules.
///
/// A closed sum type: adding a rule kind is a breaking API change, by
/// design (design note "Polymorphic rule set").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectationRule {
    /// Response text must contain every listed substring.
    MustInclude {
        /// Substrings that must all be present.
        substrings: Vec<String>,
        /// Whether matching is case-sensitive.
        case_sensitive: bool,
    },
    /// Response text must contain none of the listed substrings.
    MustNotInclude {
        /// Substrings that must all be absent.
        substrings: Vec<String>,
        /// Whether matching is case-sensitive.
        case_sensitive: bool,
    },
    /// Response latency must not exceed `max_ms` (equality passes).
    MaxLatencyMs {
        /// Inclusive upper bound, in milliseconds.
        max_ms: u64,
    },
    /// Response must have at least `min_tokens` whitespace-separated words.
    MinTokens {
        /// Minimum word count.
        min_tokens: usize,
    },
}

impl ExpectationRule {
    /// Evaluate this rule against a captured response.
    #[must_use]
    pub fn evaluate(&self, response_text: &str, latency_ms: u64) -> RuleResult {
        match self {
            ExpectationRule::MustInclude {
                substrings,
                case_sensitive,
            } => {
                let text = normalize_case(response_text, *case_sensitive);
                let missing: Vec<&String> = substrings
                    .iter()
                    .filter(|s| !text.contains(&normalize_case(s, *case_sensitive)))
                    .collect();
                if missing.is_empty() {
                    RuleResult {
                        passed: true,
                        rule_name: "must_include",
                        severity: Severity::Low,
                        violation_message: String::new(),
                    }
                } else {
                    RuleResult {
                        passed: false,
                        rule_name: "must_include",
                        severity: Severity::Low,
                        violation_message: format!("missing substring(s): {missing:?}"),
                    }
                }
            }
            ExpectationRule::MustNotInclude {
                substrings,
                case_sensitive,
            } => {
                let text = normalize_case(response_text, *case_sensitive);
                let found: Vec<&String> = substrings
                    .iter()
                    .filter(|s| text.contains(&normalize_case(s, *case_sensitive)))
                    .collect();
                if found.is_empty() {
                    RuleResult {
                        passed: true,
                        rule_name: "must_not_include",
                        severity: Severity::High,
                        violation_message: String::new(),
                    }
                } else {
                    RuleResult {
                        passed: false,
                        rule_name: "must_not_include",
                        severity: Severity::High,
                        violation_message: format!("forbidden substring(s) found: {found:?}"),
                    }
                }
            }
            ExpectationRule::MaxLatencyMs { max_ms } => {
                if latency_ms > *max_ms {
                    RuleResult {
                        passed: false,
                        rule_name: "max_latency_ms",
                        severity: Severity::Medium,
                        violation_message: format!(
                            "latency {latency_ms}ms exceeds max {max_ms}ms"
                        ),
                    }
                } else {
                    RuleResult {
                        passed: true,
                        rule_name: "max_latency_ms",
                        severity: Severity::Medium,
                        violation_message: String::new(),
                    }
                }
            }
            ExpectationRule::MinTokens { min_tokens } => {
                let word_count = response_text.split_whitespace().count();
                if word_count < *min_tokens {
                    RuleResult {
                        passed: false,
                        rule_name: "min_tokens",
                        severity: Severity::Low,
                        violation_message: format!(
                            "response has ~{word_count} tokens, expected at least {min_tokens}"
                        ),
                    }
                } else {
                    RuleResult {
                        passed: true,
                        rule_name: "min_tokens",
                        severity: Severity::Low,
                        violation_message: String::new(),
                    }
                }
            }
        }
    }
}

fn normalize_case(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

/// Evaluate every rule against `(response_text, latency_ms)` and combine
/// the results into a single [`Verdict`] per §4.1: no short-circuit,
/// violations concatenated in evaluation order, severity is the max of
/// the failing rules' severities.
#[must_use]
pub fn evaluate(rules: &[ExpectationRule], response_text: &str, latency_ms: u64) -> Verdict {
    let results: Vec<RuleResult> = rules
        .iter()
        .map(|rule| rule.evaluate(response_text, latency_ms))
        .collect();

    let failing: Vec<&RuleResult> = results.iter().filter(|r| !r.passed).collect();

    if failing.is_empty() {
        return Verdict::passing();
    }

    let severity = failing
        .iter()
        .map(|r| r.severity)
        .max()
        .expect("failing is non-empty");
    let violations = failing
        .iter()
        .map(|r| r.violation_message.clone())
        .collect();

    Verdict {
        status: VerdictStatus::Fail,
        severity: Some(severity),
        violations,
    }
}
