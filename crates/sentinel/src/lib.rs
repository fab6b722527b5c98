//! Execution-graph observability and regression testing for programs
//! that call language models.
//!
//! A program wraps each model call in [`capture::CapturedCall`], which
//! persists an immutable [`model::Trace`] to a [`store::Store`] and,
//! when expectations are declared, attaches a deterministic
//! [`model::Verdict`]. Traces sharing an `execution_id` can later be
//! assembled into a causal [`graph::ExecutionGraph`] and analysed,
//! sealed, diffed, and regression-checked.
//!
//! Model-provider HTTP clients, the CLI/HTTP surface, a config-file
//! loader, and an optional relational index all live outside this
//! crate; it only defines the data model and the pure/IO-light
//! operations over it.

pub mod capture;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod model;
pub mod regression;
pub mod store;

pub use capture::{CapturedCall, ProviderCallable};
pub use context::NodeScope;
pub use error::{Error, Result};
pub use evaluator::{evaluate, ExpectationRule, RuleResult};
pub use graph::{ExecutionGraph, GraphVerdict};
pub use model::{
    Message, MessageRole, Parameters, Request, Response, Runtime, Severity, Trace, Usage,
    Verdict, VerdictStatus,
};
pub use store::Store;
