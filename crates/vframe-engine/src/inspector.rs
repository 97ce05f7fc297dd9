//! The inspector contract.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::watch;

use vframe_media::SampledMedia;
use vframe_models::{AnomalyEvent, JobId};

use crate::error::EngineResult;

/// Artifacts produced by earlier inspectors, keyed by producer name
/// (e.g. `"transcript"` maps to the speech transcription).
pub type ArtifactBag = BTreeMap<String, String>;

/// Per-invocation context handed to an inspector.
#[derive(Debug, Clone)]
pub struct InspectorCtx {
    /// Job the invocation belongs to
    pub job_id: JobId,
    /// Cooperative cancellation signal; long-running work must observe it
    pub cancel: watch::Receiver<bool>,
}

impl InspectorCtx {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Raw output of one inspector invocation.
#[derive(Debug, Clone, Default)]
pub struct InspectorReport {
    /// Signal on the higher-is-more-synthetic convention, expected in [0, 1]
    pub score: f64,
    /// Anomaly events, restricted to the descriptor's declared vocabulary
    pub events: Vec<AnomalyEvent>,
    /// Artifacts for downstream inspectors, keyed by producer name
    pub artifacts: BTreeMap<String, String>,
}

impl InspectorReport {
    /// A score-only report.
    pub fn score(score: f64) -> Self {
        Self {
            score,
            ..Self::default()
        }
    }
}

/// An independent analysis module.
///
/// Implementations are black boxes to the orchestrator: they read the
/// sampled bundle and earlier artifacts, and return a score plus events.
/// They may hold process-wide expensive handles (models, network clients);
/// synchronizing those is their own responsibility.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Unique inspector name, matching its registry descriptor.
    fn name(&self) -> &str;

    /// Analyze the bundle. Blocking waits must observe `ctx.cancel`.
    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport>;
}
