//! The per-job pipeline state machine.
//!
//! One orchestrator run drives a job through
//! SAMPLING -> INSPECTING -> FUSING and publishes either a result or a
//! terminal failure. The workspace is released on every exit path before
//! the terminal status becomes visible.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use vframe_media::{MediaError, SampledMedia};
use vframe_models::{AnalysisResult, DerivedDetails, ErrorKind, JobId};

use crate::config::EngineConfig;
use crate::events::EventAggregator;
use crate::fusion;
use crate::inspector::ArtifactBag;
use crate::registry::{InspectorRegistry, RegisteredInspector};
use crate::runner::{self, Outcome, NEUTRAL_SCORE};
use crate::sampling::MediaSampler;
use crate::store::JobStore;
use crate::workspace::WorkspaceManager;

/// Progress reached once sampling finishes.
const PROGRESS_SAMPLED: f64 = 0.10;

/// Progress reached once every inspector has terminated.
const PROGRESS_INSPECTED: f64 = 0.90;

/// Share of the progress bar covered by the inspection phase.
const PROGRESS_INSPECT_SPAN: f64 = PROGRESS_INSPECTED - PROGRESS_SAMPLED;

/// A job-terminal failure: kind plus operator-facing detail.
#[derive(Debug, Clone)]
pub(crate) struct TerminalFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl TerminalFailure {
    fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, detail)
    }
}

/// Shared dependencies for running jobs.
#[derive(Clone)]
pub(crate) struct Orchestrator {
    pub config: EngineConfig,
    pub store: Arc<JobStore>,
    pub registry: Arc<InspectorRegistry>,
    pub workspaces: WorkspaceManager,
    pub sampler: Arc<dyn MediaSampler>,
}

impl Orchestrator {
    /// Drive one job to a terminal status. Never panics the caller; every
    /// outcome lands in the job store.
    pub async fn run_job(&self, job_id: &JobId, media_path: PathBuf, cancel: Arc<watch::Sender<bool>>) {
        let started = Instant::now();
        info!(job_id = %job_id, "Job picked up by pipeline");

        if self.store.update(job_id, |r| r.start()).is_err() {
            error!(job_id = %job_id, "Job record vanished before start");
            let _ = tokio::fs::remove_file(&media_path).await;
            return;
        }

        let cancel_rx = cancel.subscribe();
        if *cancel_rx.borrow() {
            let _ = tokio::fs::remove_file(&media_path).await;
            self.finish_failed(job_id, TerminalFailure::cancelled("cancelled before start"));
            return;
        }

        let workspace = match self.workspaces.acquire(job_id).await {
            Ok(ws) => ws,
            Err(e) => {
                let _ = tokio::fs::remove_file(&media_path).await;
                self.finish_failed(
                    job_id,
                    TerminalFailure::new(ErrorKind::Workspace, e.to_string()),
                );
                return;
            }
        };

        let pipeline = self.pipeline(job_id, &media_path, workspace.dir(), cancel_rx, started);
        tokio::pin!(pipeline);

        let budget = tokio::time::sleep(self.config.per_job_timeout);
        tokio::pin!(budget);

        let outcome = tokio::select! {
            res = &mut pipeline => res,
            _ = &mut budget => {
                warn!(
                    job_id = %job_id,
                    "Per-job budget of {:?} expired, cancelling",
                    self.config.per_job_timeout
                );
                let _ = cancel.send(true);
                // The pipeline observes the token at its next checkpoint;
                // give it at most one inspector timeout to wind down.
                match tokio::time::timeout(self.registry.max_timeout(), &mut pipeline).await {
                    Ok(res) => res,
                    Err(_) => Err(TerminalFailure::cancelled("job budget exceeded")),
                }
            }
        };

        // Resources go before the terminal status becomes visible.
        workspace.release().await;

        match outcome {
            Ok(result) => {
                let label = result.label;
                if self
                    .store
                    .update(job_id, |r| r.complete(result))
                    .is_err()
                {
                    error!(job_id = %job_id, "Failed to publish result");
                    return;
                }
                info!(
                    job_id = %job_id,
                    label = %label,
                    elapsed_sec = started.elapsed().as_secs_f64(),
                    "Job completed"
                );
            }
            Err(failure) => self.finish_failed(job_id, failure),
        }
    }

    fn finish_failed(&self, job_id: &JobId, failure: TerminalFailure) {
        warn!(
            job_id = %job_id,
            kind = %failure.kind,
            "Job failed: {}",
            failure.detail
        );
        if self
            .store
            .update(job_id, |r| r.fail(failure.kind, failure.detail.clone()))
            .is_err()
        {
            error!(job_id = %job_id, "Failed to record job failure");
        }
    }

    /// SAMPLING -> INSPECTING -> FUSING.
    async fn pipeline(
        &self,
        job_id: &JobId,
        media_path: &Path,
        workspace_dir: &Path,
        cancel_rx: watch::Receiver<bool>,
        started: Instant,
    ) -> Result<AnalysisResult, TerminalFailure> {
        // The core owns the upload: move it into the job's workspace so a
        // single release covers everything.
        let source = workspace_dir.join(source_filename(media_path));
        vframe_media::fs_utils::move_file(media_path, &source)
            .await
            .map_err(|e| TerminalFailure::new(ErrorKind::Workspace, e.to_string()))?;

        let bundle = self
            .sampler
            .sample(&source, workspace_dir, cancel_rx.clone())
            .await
            .map_err(|e| match e {
                MediaError::Cancelled => TerminalFailure::cancelled("cancelled during sampling"),
                other => TerminalFailure::new(ErrorKind::Sampling, other.to_string()),
            })?;
        let bundle = Arc::new(bundle);

        let _ = self
            .store
            .update(job_id, |r| r.progress = PROGRESS_SAMPLED);
        info!(
            job_id = %job_id,
            frames = bundle.frame_count(),
            effective_sec = bundle.effective_duration_sec,
            "Sampling complete"
        );

        let inspection = self.inspect(job_id, &bundle, cancel_rx).await?;
        let _ = self
            .store
            .update(job_id, |r| r.progress = PROGRESS_INSPECTED);

        let (confidence, label) = std::panic::catch_unwind(AssertUnwindSafe(|| {
            fusion::fuse(&inspection.scores, &self.registry)
        }))
        .map_err(|_| TerminalFailure::new(ErrorKind::Fusion, "fusion panicked"))?;

        let events = inspection.events;
        let visual_score = inspection
            .scores
            .get("visual_clip")
            .copied()
            .unwrap_or(0.0);

        Ok(AnalysisResult {
            job_id: job_id.clone(),
            label,
            confidence,
            per_inspector_scores: inspection.scores,
            events,
            derived: DerivedDetails {
                visual_score: round3(visual_score),
                video_length: bundle.effective_duration_sec,
                original_video_length: bundle.original_duration_sec,
                transcript_snippet: snippet(inspection.derived.get("transcript")),
                processing_time_sec: started.elapsed().as_secs_f64(),
                pipeline_version: self.config.pipeline_version.clone(),
            },
            processed_at: chrono::Utc::now(),
        })
    }

    /// Run every registered inspector: artifact producers first, then the
    /// concurrent fan-out under the per-job cap.
    async fn inspect(
        &self,
        job_id: &JobId,
        bundle: &Arc<SampledMedia>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<Inspection, TerminalFailure> {
        let total = self.registry.len().max(1);
        let shared = Arc::new(InspectionState {
            scores: Mutex::new(BTreeMap::new()),
            aggregator: EventAggregator::new(),
            fatal: Mutex::new(None),
            finished: AtomicUsize::new(0),
        });
        let mut derived = ArtifactBag::new();

        // Artifact producers run first so dependents see their output.
        for entry in self.registry.artifact_producers() {
            if *cancel_rx.borrow() {
                return Err(TerminalFailure::cancelled("cancelled during inspection"));
            }
            let outcome = runner::run(
                entry,
                job_id,
                Arc::clone(bundle),
                derived.clone(),
                cancel_rx.clone(),
            )
            .await;
            if let Outcome::Success { artifacts, .. } = &outcome {
                derived.extend(artifacts.clone());
            }
            record_outcome(entry, outcome, bundle, &shared);
            self.bump_progress(job_id, &shared, total);
        }

        // A failed producer still publishes an empty transcript so
        // dependents run and self-neutralize.
        let needs_transcript = self
            .registry
            .fan_out()
            .iter()
            .any(|e| e.descriptor.requires.transcript);
        if needs_transcript {
            derived
                .entry("transcript".to_string())
                .or_insert_with(String::new);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_inspectors));
        let mut handles = Vec::new();
        let mut interrupted = false;

        for entry in self.registry.fan_out() {
            // Scheduler checkpoint: stop launching once cancelled.
            if *cancel_rx.borrow() {
                interrupted = true;
                break;
            }

            // Acquiring before spawning keeps the launch order FIFO.
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = wait_cancelled(&mut cancel_rx) => {
                    interrupted = true;
                    break;
                }
            };

            let entry = entry.clone();
            let job_id = job_id.clone();
            let bundle = Arc::clone(bundle);
            let derived = derived.clone();
            let cancel_rx = cancel_rx.clone();
            let shared = Arc::clone(&shared);
            let store = Arc::clone(&self.store);
            let total_for_task = total;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome =
                    runner::run(&entry, &job_id, Arc::clone(&bundle), derived, cancel_rx).await;
                record_outcome(&entry, outcome, &bundle, &shared);

                let done = shared.finished.fetch_add(1, Ordering::SeqCst) + 1;
                let progress =
                    PROGRESS_SAMPLED + PROGRESS_INSPECT_SPAN * done as f64 / total_for_task as f64;
                let _ = store.update(&job_id, |r| r.progress = progress);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let fatal = shared
            .fatal
            .lock()
            .expect("inspection lock poisoned")
            .take();
        if let Some(detail) = fatal {
            return Err(TerminalFailure::new(ErrorKind::InspectorFatal, detail));
        }
        if interrupted || *cancel_rx.borrow() {
            return Err(TerminalFailure::cancelled("cancelled during inspection"));
        }

        let scores = shared.scores.lock().expect("inspection lock poisoned").clone();
        let events = shared.aggregator.finalize(bundle.effective_duration_sec);
        Ok(Inspection {
            scores,
            events,
            derived,
        })
    }

    fn bump_progress(&self, job_id: &JobId, shared: &InspectionState, total: usize) {
        let done = shared.finished.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = PROGRESS_SAMPLED + PROGRESS_INSPECT_SPAN * done as f64 / total as f64;
        let _ = self.store.update(job_id, |r| r.progress = progress);
    }
}

/// Mutable state shared by concurrently finishing inspectors.
struct InspectionState {
    scores: Mutex<BTreeMap<String, f64>>,
    aggregator: EventAggregator,
    fatal: Mutex<Option<String>>,
    finished: AtomicUsize,
}

/// Everything the fusion stage needs from the inspection phase.
struct Inspection {
    scores: BTreeMap<String, f64>,
    events: Vec<vframe_models::AnomalyEvent>,
    derived: ArtifactBag,
}

/// Fold one inspector outcome into the shared inspection state.
///
/// Non-success outcomes degrade to the neutral score plus a diagnostic
/// event unless the inspector is declared fatal.
fn record_outcome(
    entry: &RegisteredInspector,
    outcome: Outcome,
    bundle: &SampledMedia,
    shared: &InspectionState,
) {
    let name = &entry.descriptor.name;
    match outcome {
        Outcome::Success { score, events, .. } => {
            shared
                .scores
                .lock()
                .expect("inspection lock poisoned")
                .insert(name.clone(), score);
            shared.aggregator.append(events);
        }
        other => {
            let reason = other.failure_reason();
            if entry.descriptor.fatal_on_failure {
                let mut fatal = shared.fatal.lock().expect("inspection lock poisoned");
                if fatal.is_none() {
                    *fatal = Some(format!("inspector '{name}' failed: {reason}"));
                }
                return;
            }
            shared
                .scores
                .lock()
                .expect("inspection lock poisoned")
                .insert(name.clone(), NEUTRAL_SCORE);
            shared.aggregator.append(vec![runner::failure_event(
                name,
                bundle.effective_duration_sec,
                &reason,
            )]);
        }
    }
}

/// Resolve once the watch observes `true`.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Workspace-local name for the moved upload.
fn source_filename(media_path: &Path) -> String {
    let ext = media_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    format!("source.{ext}")
}

/// Transcript snippet for the result payload: truncated to ~150 chars,
/// with the placeholder the pipeline has always used for silent media.
fn snippet(transcript: Option<&String>) -> String {
    match transcript.map(|t| t.trim()).filter(|t| !t.is_empty()) {
        None => "[No Speech/Audio Error]".to_string(),
        Some(text) => {
            if text.chars().count() > 150 {
                let cut: String = text.chars().take(150).collect();
                format!("{cut}...")
            } else {
                text.to_string()
            }
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
