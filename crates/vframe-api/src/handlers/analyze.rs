//! Video submission handler.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use vframe_models::{JobId, JobStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

/// Accept a multipart video upload and submit it for analysis.
///
/// Returns 202 with the assigned job ID; the pipeline runs in the
/// background and is observed through the status/result endpoints.
pub async fn analyze_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
        {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => return Err(ApiError::bad_request("missing 'file' field")),
        }
    };

    let filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("upload has no filename"))?;

    // Spool the upload to disk before handing it to the engine
    let spool_path = state
        .config
        .upload_dir
        .join(format!("{}_{}", Uuid::new_v4(), sanitize(&filename)));

    let mut file = tokio::fs::File::create(&spool_path)
        .await
        .map_err(|e| ApiError::internal(format!("failed to spool upload: {e}")))?;

    let mut size_bytes: u64 = 0;
    let mut field = field;
    loop {
        let chunk = match field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(format!("upload aborted: {e}")))
        {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                cleanup(&spool_path).await;
                return Err(e);
            }
        };
        size_bytes += chunk.len() as u64;
        if let Err(e) = file.write_all(&chunk).await {
            cleanup(&spool_path).await;
            return Err(ApiError::internal(format!("failed to spool upload: {e}")));
        }
    }
    if let Err(e) = file.flush().await {
        cleanup(&spool_path).await;
        return Err(ApiError::internal(format!("failed to spool upload: {e}")));
    }
    drop(file);

    match state.service.submit(spool_path.clone(), &filename, size_bytes) {
        Ok(job_id) => {
            info!(job_id = %job_id, filename = %filename, size_bytes, "Upload accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(AnalyzeResponse {
                    job_id,
                    status: JobStatus::Pending,
                    message: "Video submitted for analysis".to_string(),
                }),
            ))
        }
        Err(e) => {
            // Rejected uploads stay the caller's problem; drop the spool
            warn!(filename = %filename, "Submission rejected: {e}");
            cleanup(&spool_path).await;
            Err(e.into())
        }
    }
}

async fn cleanup(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove spooled upload {}: {}", path.display(), e);
    }
}

/// Keep the extension, drop anything path-like from a client filename.
fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_path_characters() {
        assert_eq!(sanitize("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize("my video (1).mov"), "my_video__1_.mov");
    }
}
