//! Inspectors backed by an external inference service.
//!
//! Model-heavy inspection (CLIP-style visual scoring, speech transcription,
//! lip-sync checking) runs in a sidecar service that shares the host
//! filesystem; the inspectors here post the workspace paths and read back
//! scores and events. The HTTP client is a process-wide handle shared
//! across jobs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use vframe_media::SampledMedia;
use vframe_models::AnomalyEvent;

use crate::error::{EngineError, EngineResult};
use crate::inspector::{ArtifactBag, Inspector, InspectorCtx, InspectorReport};
use crate::runner::NEUTRAL_SCORE;

/// Configuration for the inference sidecar.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of the service; `None` disables remote inspection
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl InferenceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("INFERENCE_SERVICE_URL").ok(),
            timeout: Duration::from_secs(
                std::env::var("INFERENCE_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

/// Scoring request posted to the sidecar.
#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inspector: &'a str,
    input_path: String,
    audio_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    transcript: Option<&'a str>,
    target_fps: u32,
    effective_duration_sec: f64,
}

/// Sidecar response.
#[derive(Debug, Deserialize)]
struct InferenceResponse {
    score: f64,
    #[serde(default)]
    events: Vec<AnomalyEvent>,
    #[serde(default)]
    transcript: Option<String>,
}

/// Shared HTTP client for the inference sidecar.
pub struct InferenceClient {
    http: Option<reqwest::Client>,
    base_url: Option<String>,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> EngineResult<Self> {
        let http = match config.base_url {
            Some(_) => Some(
                reqwest::Client::builder()
                    .timeout(config.timeout)
                    .build()
                    .map_err(|e| {
                        EngineError::inspector(format!("inference client setup failed: {e}"))
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            http,
            base_url: config.base_url,
        })
    }

    pub fn from_env() -> EngineResult<Self> {
        Self::new(InferenceConfig::from_env())
    }

    /// Whether a sidecar endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    async fn infer(
        &self,
        ctx: &InspectorCtx,
        request: &InferenceRequest<'_>,
    ) -> EngineResult<InferenceResponse> {
        let (http, base_url) = match (&self.http, &self.base_url) {
            (Some(http), Some(base_url)) => (http, base_url),
            _ => {
                return Err(EngineError::inspector(
                    "inference endpoint not configured",
                ))
            }
        };

        let url = format!("{base_url}/v1/score");
        debug!(inspector = request.inspector, "Posting inference request");

        let send = async {
            let response = http
                .post(&url)
                .json(request)
                .send()
                .await
                .map_err(|e| EngineError::inspector(format!("inference request failed: {e}")))?;
            if !response.status().is_success() {
                return Err(EngineError::inspector(format!(
                    "inference service returned {}",
                    response.status()
                )));
            }
            response
                .json::<InferenceResponse>()
                .await
                .map_err(|e| EngineError::inspector(format!("invalid inference response: {e}")))
        };
        tokio::pin!(send);

        let mut cancel = ctx.cancel.clone();
        tokio::select! {
            res = &mut send => res,
            _ = wait_cancelled(&mut cancel) => Err(EngineError::inspector("cancelled")),
        }
    }
}

async fn wait_cancelled(rx: &mut tokio::sync::watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn request_for<'a>(
    inspector: &'a str,
    bundle: &SampledMedia,
    transcript: Option<&'a str>,
) -> InferenceRequest<'a> {
    InferenceRequest {
        inspector,
        input_path: bundle.source_path.to_string_lossy().to_string(),
        audio_path: bundle.audio_path.to_string_lossy().to_string(),
        transcript,
        target_fps: bundle.target_fps,
        effective_duration_sec: bundle.effective_duration_sec,
    }
}

// ============================================================================
// visual_clip
// ============================================================================

/// CLIP-style whole-clip visual authenticity score.
pub struct VisualClipInspector {
    client: Arc<InferenceClient>,
}

impl VisualClipInspector {
    pub fn new(client: Arc<InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Inspector for VisualClipInspector {
    fn name(&self) -> &str {
        "visual_clip"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let response = self
            .client
            .infer(ctx, &request_for("visual_clip", bundle, None))
            .await?;
        // Score-only inspector; any events are dropped by the runner anyway
        Ok(InspectorReport::score(response.score))
    }
}

// ============================================================================
// transcript
// ============================================================================

/// Speech transcription producer.
///
/// Weight zero: contributes no score, publishes the `transcript` artifact
/// consumed by transcript-dependent inspectors. Degrades to an empty
/// transcript when the media is silent or no sidecar is configured.
pub struct TranscriptInspector {
    client: Arc<InferenceClient>,
}

impl TranscriptInspector {
    pub fn new(client: Arc<InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Inspector for TranscriptInspector {
    fn name(&self) -> &str {
        "transcript"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let mut report = InspectorReport::score(0.0);

        if !bundle.has_audio || !self.client.is_configured() {
            report
                .artifacts
                .insert("transcript".to_string(), String::new());
            return Ok(report);
        }

        let response = self
            .client
            .infer(ctx, &request_for("transcript", bundle, None))
            .await?;
        report.artifacts.insert(
            "transcript".to_string(),
            response.transcript.unwrap_or_default(),
        );
        Ok(report)
    }
}

// ============================================================================
// lipsync
// ============================================================================

/// Lip-sync consistency check against the transcript.
pub struct LipsyncInspector {
    client: Arc<InferenceClient>,
}

impl LipsyncInspector {
    pub fn new(client: Arc<InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Inspector for LipsyncInspector {
    fn name(&self) -> &str {
        "lipsync"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let transcript = derived.get("transcript").map(String::as_str).unwrap_or("");

        // Nothing to check against: stay neutral rather than guess
        if transcript.trim().is_empty() || !bundle.has_audio {
            return Ok(InspectorReport::score(NEUTRAL_SCORE));
        }

        let response = self
            .client
            .infer(ctx, &request_for("lipsync", bundle, Some(transcript)))
            .await?;
        Ok(InspectorReport {
            score: response.score,
            events: response.events,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::synthetic_bundle;
    use tokio::sync::watch;
    use vframe_models::JobId;

    fn ctx() -> InspectorCtx {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        InspectorCtx {
            job_id: JobId::new(),
            cancel: rx,
        }
    }

    fn offline_client() -> Arc<InferenceClient> {
        Arc::new(InferenceClient::new(InferenceConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_visual_clip_fails_without_endpoint() {
        let inspector = VisualClipInspector::new(offline_client());
        let err = inspector
            .inspect(&ctx(), &synthetic_bundle(10.0, 8), &ArtifactBag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn test_transcript_degrades_to_empty_artifact() {
        let inspector = TranscriptInspector::new(offline_client());
        let report = inspector
            .inspect(&ctx(), &synthetic_bundle(10.0, 8), &ArtifactBag::new())
            .await
            .unwrap();
        assert_eq!(report.score, 0.0);
        assert_eq!(report.artifacts.get("transcript").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_lipsync_neutral_without_transcript() {
        let inspector = LipsyncInspector::new(offline_client());
        let mut derived = ArtifactBag::new();
        derived.insert("transcript".to_string(), String::new());

        let report = inspector
            .inspect(&ctx(), &synthetic_bundle(10.0, 8), &derived)
            .await
            .unwrap();
        assert_eq!(report.score, NEUTRAL_SCORE);
        assert!(report.events.is_empty());
    }
}
