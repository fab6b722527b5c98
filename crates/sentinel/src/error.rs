//! Error types for the execution-graph core.

use thiserror::Error;

/// Error types produced by sentinel's core operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// IO error reading or writing the trace store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A trace or graph file could not be parsed as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input supplied synchronously by the caller: an unknown
    /// execution id, a missing trace id, an empty trace list passed to
    /// the graph builder, and similar caller-side mistakes.
    #[error("input error: {0}")]
    InputError(String),

    /// A store operation failed for a reason other than a bare IO/JSON
    /// error (e.g. a uniqueness constraint on bless).
    #[error("store error: {0}")]
    StoreError(String),

    /// `verify_integrity` found the recomputed hash does not match the
    /// hash recorded on the snapshot.
    #[error("integrity error: expected {expected}, computed {computed}")]
    IntegrityError {
        /// Hash recorded on the snapshot.
        expected: String,
        /// Hash recomputed from the snapshot's content.
        computed: String,
    },

    /// The opaque provider callable returned an error.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// The graph is malformed: a cycle, a dangling edge, or traces with
    /// mixed `execution_id` were supplied to the builder.
    #[error("graph error: {0}")]
    GraphError(String),
}

/// Result type for sentinel's core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_error_display() {
        let err = Error::InputError("empty trace list".to_string());
        assert_eq!(err.to_string(), "input error: empty trace list");
    }

    #[test]
    fn integrity_error_display() {
        let err = Error::IntegrityError {
            expected: "aaaa".to_string(),
            computed: "bbbb".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "integrity error: expected aaaa, computed bbbb"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
