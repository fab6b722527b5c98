//! In-process configuration surface (§12, ambient).
//!
//! The configuration *loader* (file + env + CLI-flag merging) lives in
//! the external CLI and is out of scope here. These are the plain
//! structs the library itself needs, built the way the teacher builds
//! `QualityGateConfig`/`RegressionConfig`: a struct, a `Default`, and
//! `#[must_use] with_*` builder methods — no file I/O.

use std::path::{Path, PathBuf};

/// Where the trace store lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Install-owned root directory; `traces/` and `graphs/` live under it.
    pub root: PathBuf,
}

impl StoreConfig {
    /// Build a config rooted at `root`. The host is responsible for
    /// resolving this path (env var, config file, CLI flag); the core
    /// never reads any of those itself.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

/// Reserved for future evaluator tuning. Empty today: the four rules in
/// §4.1 have no shared configuration, but downstream code that threads a
/// config struct through the pipeline gets a stable place to add one
/// without changing the evaluator's pure-function signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatorDefaults;

/// Tunable for the diff engine (C9). Externalises open question (b): the
/// 50ms threshold from the source is preserved as the default but is no
/// longer a hardcoded constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffConfig {
    /// Per-node latency delta, in milliseconds, above which a node is
    /// reported as `changed` even with an unchanged verdict.
    pub threshold_ms: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self { threshold_ms: 50 }
    }
}

impl DiffConfig {
    /// Build a diff config with an explicit threshold.
    #[must_use]
    pub fn with_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.threshold_ms = threshold_ms;
        self
    }
}

/// Reserved extension point mirroring `dashflow-evals::regression::RegressionConfig`'s
/// shape. The regression checker's pass/fail rule (§4.9) is fixed by the
/// design and is not configurable today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegressionConfig;
