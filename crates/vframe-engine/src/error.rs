//! Engine error types.

use thiserror::Error;
use vframe_models::ErrorKind;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the analysis engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Submission denied before a job record was created.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    /// Result requested before the job reached a terminal status.
    #[error("Job not finished: {0}")]
    NotReady(String),

    /// Result requested for a terminally failed job.
    #[error("Job failed: {kind}: {detail}")]
    JobFailed { kind: ErrorKind, detail: String },

    #[error("Inspector error: {0}")]
    Inspector(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Media error: {0}")]
    Media(#[from] vframe_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn inspector(msg: impl Into<String>) -> Self {
        Self::Inspector(msg.into())
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace(msg.into())
    }
}
