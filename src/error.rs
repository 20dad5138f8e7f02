//! Typed error kinds for the indexing and query pipeline.
//!
//! Four kinds cover the failure surface:
//! - [`PipelineError::Configuration`] — invalid parameters; fatal, never retried.
//! - [`PipelineError::Embedding`] — an embedding call failed; transient
//!   failures are retried with backoff, then skipped-and-reported (indexing)
//!   or surfaced (query time).
//! - [`PipelineError::Generation`] — a reformulation or answer-generation
//!   call failed; same retry discipline, and never converted into a
//!   fabricated answer.
//! - [`PipelineError::Index`] — the persisted index is corrupt or unreadable;
//!   fatal for the affected query, reported with enough detail to trigger a
//!   reindex.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("embedding failed: {message}")]
    Embedding { message: String, transient: bool },

    #[error("generation failed: {message}")]
    Generation { message: String, transient: bool },

    #[error("index error: {0}")]
    Index(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn embedding(message: impl Into<String>, transient: bool) -> Self {
        PipelineError::Embedding {
            message: message.into(),
            transient,
        }
    }

    pub fn generation(message: impl Into<String>, transient: bool) -> Self {
        PipelineError::Generation {
            message: message.into(),
            transient,
        }
    }

    pub fn index(message: impl Into<String>) -> Self {
        PipelineError::Index(message.into())
    }

    /// Whether a retry with backoff may succeed. Only external-call errors
    /// marked transient (rate limits, server errors, network failures)
    /// qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Embedding { transient, .. } => *transient,
            PipelineError::Generation { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Index(e.to_string())
    }
}
