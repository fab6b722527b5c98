//! Testing utilities for `sentinel`: a scriptable mock provider callable
//! and a builder for hand-assembled execution graphs, so downstream
//! tests don't need a real model provider or a populated trace store to
//! exercise the analyzer/diff/snapshot layer.

mod graph_fixture;
mod mock_callable;

pub use graph_fixture::{FixtureNode, GraphFixture};
pub use mock_callable::MockCallable;

/// Install a `tracing` subscriber that writes to the test harness's
/// captured output, filtered by `RUST_LOG` (falling back to `info`).
/// Safe to call more than once per process; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber_init();
}

fn tracing_subscriber_init() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
