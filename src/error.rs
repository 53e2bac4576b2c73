//! Structured error taxonomy for the ingestion-and-scoring core.
//!
//! Library code returns `Result<T, PipelineError>`; the orchestrator inspects
//! each variant to decide whether to degrade or retry. Nothing below this
//! boundary should ever need to propagate out to the scheduler.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("forbidden (403): {0}")]
    Forbidden(String),

    #[error("response was not html: {0}")]
    NotHtml(String),

    #[error("content extraction failed: {0}")]
    Extraction(String),

    #[error("llm sentiment call failed: {0}")]
    LlmFailure(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("scheduler overlap: job {0} still running")]
    SchedulerOverlap(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

impl PipelineError {
    /// Whether this error kind is worth a retry with backoff, per §7's policy table.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
