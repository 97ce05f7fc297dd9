//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vframe_engine::EngineError;
use vframe_models::ErrorKind;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Analysis still running: the result is not readable yet.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// The job failed terminally; carries the error kind for the client.
    #[error("Job failed: {kind}: {detail}")]
    JobFailed { kind: ErrorKind, detail: String },

    /// Admission queue is full.
    #[error("Service overloaded")]
    Overloaded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::JobFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> Option<String> {
        match self {
            ApiError::JobFailed { kind, .. } => Some(kind.as_str().to_string()),
            ApiError::Overloaded => Some("Overloaded".to_string()),
            _ => None,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => ApiError::NotFound(format!("job {id} not found")),
            EngineError::NotReady(id) => ApiError::NotReady(format!("job {id} is not finished")),
            EngineError::JobFailed { kind, detail } => ApiError::JobFailed { kind, detail },
            EngineError::Rejected(detail) if detail.contains("queue") => ApiError::Overloaded,
            EngineError::Rejected(detail) => ApiError::BadRequest(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse { detail, code };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        let err: ApiError = EngineError::NotFound("abc".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = EngineError::Rejected("admission queue is full".to_string()).into();
        assert!(matches!(err, ApiError::Overloaded));

        let err: ApiError = EngineError::Rejected("unsupported media type".to_string()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err: ApiError = EngineError::JobFailed {
            kind: ErrorKind::Sampling,
            detail: "no frames".to_string(),
        }
        .into();
        assert_eq!(err.code().as_deref(), Some("SamplingError"));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
