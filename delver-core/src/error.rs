//! Error types for the Delver research core.
//!
//! Uses `thiserror` for structured error variants. The taxonomy separates
//! retryable per-search failures (`SearchFailure`), fatal capability failures
//! (`CapabilityError`), and illegal session transitions (`StateError`, always
//! a programming bug).

/// Top-level error type for the Delver core library.
#[derive(Debug, thiserror::Error)]
pub enum DelverError {
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run cancelled: deadline exceeded")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of an external capability (planner, analyst, writer, or the
/// search provider's response contract). Fatal at the planner/analyst/writer
/// stage; bounded-retryable inside a search task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CapabilityError {
    #[error("{capability} returned malformed output: {message}")]
    MalformedOutput {
        capability: &'static str,
        message: String,
    },

    #[error("{capability} returned empty output")]
    EmptyOutput { capability: &'static str },

    #[error("{capability} call failed: {message}")]
    CallFailed {
        capability: &'static str,
        message: String,
    },
}

/// Why a single search attempt failed. Every variant is retryable up to the
/// configured attempt bound; none of them escalates past the search task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchFailure {
    #[error("transient network error: {message}")]
    TransientNetwork { message: String },

    #[error("low relevance: average {average:.2} below threshold {threshold:.2}")]
    LowRelevance { average: f64, threshold: f64 },

    #[error("search capability error: {message}")]
    Capability { message: String },
}

impl SearchFailure {
    /// Whether the retry loop should ask the planner for a rephrased query
    /// before the next attempt. A broken provider response is retried with
    /// the same text since rewording won't fix it.
    pub fn wants_rephrase(&self) -> bool {
        matches!(
            self,
            SearchFailure::TransientNetwork { .. } | SearchFailure::LowRelevance { .. }
        )
    }
}

/// An illegal mutation of the session whiteboard. Always indicates an
/// orchestration bug, never a data problem, and is never recovered from.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    #[error("{field} already set")]
    AlreadySet { field: &'static str },

    #[error("{field} set before the {required} stage completed")]
    OutOfOrder {
        field: &'static str,
        required: &'static str,
    },

    #[error("illegal status transition for {stage}: {from} -> {to}")]
    StatusRegression {
        stage: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("stage {stage} started before earlier stages completed")]
    StageOrder { stage: &'static str },
}

/// Errors from the configuration layer.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),
}

/// A type alias for results using the top-level `DelverError`.
pub type Result<T> = std::result::Result<T, DelverError>;
