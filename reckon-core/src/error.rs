//! Error types for the Reckon validation core.
//!
//! All failures surface through the [`ReckonError`] enum. The taxonomy splits
//! backend failures into transient (retried once by the coordinator) and fatal
//! (abort the run), and keeps spec/planning failures strictly ahead of
//! execution: a query that reaches a backend has already passed type and
//! column resolution.

use thiserror::Error;

/// The main error type for the Reckon library.
#[derive(Error, Debug)]
pub enum ReckonError {
    /// The validation spec violates one or more construction invariants.
    ///
    /// Every violation is a single-sentence explanation; construction
    /// aggregates all of them before raising.
    #[error("invalid validation spec: {}", violations.join("; "))]
    SpecInvalid {
        /// All invariant violations found, one sentence each.
        violations: Vec<String>,
    },

    /// A backend call failed in a way that is worth one retry.
    #[error("transient backend error on '{backend}': {message}")]
    BackendTransient {
        /// Name of the backend that failed.
        backend: String,
        /// Detailed error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A backend call failed permanently (authorization, missing table,
    /// SQL compilation). Aborts the run.
    #[error("fatal backend error on '{backend}': {message}")]
    BackendFatal {
        /// Name of the backend that failed.
        backend: String,
        /// Detailed error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Two columns cannot be compared under the coercion rules.
    ///
    /// Raised at planning time, never at execution time.
    #[error("type mismatch on '{column}': {source_type} is not comparable to {target_type}")]
    TypeMismatch {
        /// The column (or alias) being compared.
        column: String,
        /// Rendered source-side logical type.
        source_type: String,
        /// Rendered target-side logical type.
        target_type: String,
    },

    /// A filter references a column absent from one side.
    #[error("filter column '{column}' is missing on the {side} side")]
    FilterColumnMissing {
        /// The missing column.
        column: String,
        /// Which side lacks it ("source" or "target").
        side: String,
    },

    /// Row validation was requested against a backend without SHA-256.
    #[error("backend '{backend}' does not provide SHA-256; row validation is unavailable")]
    HashUnavailable {
        /// Name of the deficient backend.
        backend: String,
    },

    /// The run exceeded its wall-clock timeout; both sides were cancelled.
    #[error("validation run timed out after {elapsed_secs}s")]
    Timeout {
        /// Seconds elapsed before the run was cancelled.
        elapsed_secs: u64,
    },

    /// An aggregate or expression is not supported by a backend dialect.
    #[error("unsupported on backend '{backend}': {message}")]
    Unsupported {
        /// Name of the backend.
        backend: String,
        /// What was requested.
        message: String,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations (spill files, sinks).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from serialization/deserialization operations.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error related to run configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, ReckonError>`.
pub type Result<T> = std::result::Result<T, ReckonError>;

impl ReckonError {
    /// Creates a spec validation error from a set of violations.
    pub fn spec_invalid(violations: Vec<String>) -> Self {
        Self::SpecInvalid { violations }
    }

    /// Creates a transient backend error.
    pub fn transient(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendTransient {
            backend: backend.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a fatal backend error.
    pub fn fatal(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendFatal {
            backend: backend.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a fatal backend error wrapping an underlying error.
    pub fn fatal_with_source(
        backend: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::BackendFatal {
            backend: backend.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Returns true when the coordinator may retry the failed call once.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendTransient { .. })
    }

    /// Escalates a transient error to fatal after the retry budget is spent.
    pub fn escalate(self) -> Self {
        match self {
            Self::BackendTransient {
                backend,
                message,
                source,
            } => Self::BackendFatal {
                backend,
                message: format!("{message} (retry exhausted)"),
                source,
            },
            other => other,
        }
    }
}
