//! Job identity, status and the per-job record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::analysis::AnalysisResult;

/// Unique identifier for an analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally visible job status.
///
/// Terminal statuses (`Completed`, `Failed`) are final: the record's status
/// field never changes again once it reaches one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job is waiting for a pipeline slot
    #[default]
    Pending,
    /// Pipeline is running (sampling, inspecting or fusing)
    Processing,
    /// Analysis finished and a result is available
    Completed,
    /// Analysis failed terminally
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Kind of a terminal job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorKind {
    /// Media could not be decoded or sampled
    #[serde(rename = "SamplingError")]
    Sampling,
    /// An inspector declared fatal-on-failure failed
    #[serde(rename = "InspectorFatal")]
    InspectorFatal,
    /// Fusion produced an invalid output
    #[serde(rename = "FusionError")]
    Fusion,
    /// Per-job temp directory could not be created or written
    #[serde(rename = "WorkspaceError")]
    Workspace,
    /// External cancel, or the per-job budget expired
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Sampling => "SamplingError",
            ErrorKind::InspectorFatal => "InspectorFatal",
            ErrorKind::Fusion => "FusionError",
            ErrorKind::Workspace => "WorkspaceError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record the service keeps for every submitted job.
///
/// Field invariants:
/// - `started_at` is set iff the job advanced past `Pending` at least once
/// - `completed_at` is set iff the status is terminal
/// - `result` is set iff the status is `Completed`
/// - `error_kind` is set iff the status is `Failed`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Current status
    pub status: JobStatus,

    /// Original upload filename
    pub filename: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When the pipeline picked the job up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Pipeline progress in [0, 1]
    pub progress: f64,

    /// Final analysis result (completed jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,

    /// Failure kind (failed jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Operator-facing failure detail (failed jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl JobRecord {
    /// Create a fresh pending record.
    pub fn new(id: JobId, filename: impl Into<String>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            filename: filename.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            result: None,
            error_kind: None,
            error_detail: None,
        }
    }

    /// Mark the record as picked up by the pipeline.
    pub fn start(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    /// Mark the record completed with its result.
    ///
    /// The result is populated before the status flips so that any reader
    /// observing `Completed` also observes the result.
    pub fn complete(&mut self, result: AnalysisResult) {
        self.result = Some(result);
        self.progress = 1.0;
        self.completed_at = Some(Utc::now());
        self.status = JobStatus::Completed;
    }

    /// Mark the record failed. Same write ordering rule as [`complete`].
    ///
    /// [`complete`]: JobRecord::complete
    pub fn fail(&mut self, kind: ErrorKind, detail: impl Into<String>) {
        self.error_kind = Some(kind);
        self.error_detail = Some(detail.into());
        self.completed_at = Some(Utc::now());
        self.status = JobStatus::Failed;
    }
}
