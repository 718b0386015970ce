//! Error taxonomy for the query pipeline.
//!
//! Callers outside the pipeline usually only need to know that a query
//! failed; [`RagError::stage`] and [`RagError::is_retryable`] keep the
//! stage-level detail available for logs, tests, and HTTP status mapping.

use std::fmt;

use thiserror::Error;

/// A pipeline stage that calls an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Embed,
    Search,
    Model,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Embed => "embedding",
            Stage::Search => "search",
            Stage::Model => "model",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    /// The question was blank after trimming. Raised before any external call.
    #[error("question cannot be empty")]
    EmptyQuestion,

    /// Invalid setup parameters (chunk window, limits). Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external collaborator failed or returned malformed data.
    #[error("{stage} provider failed: {message}")]
    Provider { stage: Stage, message: String },

    /// An external call exceeded its deadline.
    #[error("{stage} call timed out")]
    Timeout { stage: Stage },

    /// The caller cancelled the query while a stage was in flight.
    #[error("query cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl RagError {
    pub fn provider(stage: Stage, err: impl fmt::Display) -> Self {
        RagError::Provider {
            stage,
            message: err.to_string(),
        }
    }

    /// The stage that failed, if the failure came from an external call.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RagError::Provider { stage, .. }
            | RagError::Timeout { stage }
            | RagError::Cancelled { stage } => Some(*stage),
            RagError::EmptyQuestion | RagError::Configuration(_) => None,
        }
    }

    /// Whether resubmitting the same query could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Provider { .. } | RagError::Timeout { .. })
    }
}
