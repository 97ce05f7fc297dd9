//! Job observation handlers.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use vframe_models::{AnalysisResult, AnomalyEvent, ErrorKind, JobId, JobStatus};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Poll the status of an analysis job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let job_id = JobId::from_string(job_id);
    let record = state.service.status_of(&job_id)?;

    Ok(Json(StatusResponse {
        job_id: record.id,
        status: record.status,
        progress: record.progress,
        created_at: record.created_at,
        started_at: record.started_at,
        completed_at: record.completed_at,
        error_kind: record.error_kind,
    }))
}

/// Fetch the result of a completed job.
///
/// Responds 409 while the job is running and 422 with the error kind once
/// it has failed.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<AnalysisResult>> {
    let job_id = JobId::from_string(job_id);
    let result = state.service.result_of(&job_id)?;
    Ok(Json(result))
}

/// Fetch the anomaly timeline of a completed job.
pub async fn get_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Vec<AnomalyEvent>>> {
    let job_id = JobId::from_string(job_id);
    let events = state.service.events_of(&job_id)?;
    Ok(Json(events))
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    /// Whether this request delivered the first effective cancel signal
    pub cancelled: bool,
}

/// Request cancellation of a running job. Idempotent.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let job_id = JobId::from_string(job_id);
    let cancelled = state.service.cancel(&job_id)?;
    Ok(Json(CancelResponse { job_id, cancelled }))
}
