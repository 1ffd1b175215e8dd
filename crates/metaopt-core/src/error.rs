//! Error types for bilevel encoding and adversarial search.

use thiserror::Error;

/// Result type alias for metaopt operations.
pub type Result<T> = std::result::Result<T, MetaOptError>;

/// Errors raised while building or solving adversarial encodings.
#[derive(Debug, Error)]
pub enum MetaOptError {
    /// Invalid or inconsistent parameters; raised before any solver mutation.
    #[error("invalid configuration for {parameter}: {reason}")]
    Configuration { parameter: String, reason: String },

    /// No solution meets the requested bound. Expected during bisection.
    #[error("infeasible or unbounded: {0}")]
    InfeasibleOrUnbounded(String),

    /// Any other failure reported by the numeric backend.
    #[error("solver backend error: {0}")]
    SolverBackend(String),

    /// Unknown node or edge, malformed topology data.
    #[error("topology error: {0}")]
    Topology(String),

    /// I/O failure (topology files, progress sinks).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MetaOptError {
    /// Configuration error for a named parameter
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Backend failure with context
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::SolverBackend(reason.into())
    }

    /// Topology failure with context
    pub fn topology(reason: impl Into<String>) -> Self {
        Self::Topology(reason.into())
    }

    /// Whether this is the recoverable bisection signal
    pub fn is_infeasible(&self) -> bool {
        matches!(self, Self::InfeasibleOrUnbounded(_))
    }
}

impl From<microlp::Error> for MetaOptError {
    fn from(err: microlp::Error) -> Self {
        MetaOptError::SolverBackend(err.to_string())
    }
}
