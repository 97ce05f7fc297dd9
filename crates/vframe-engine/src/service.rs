//! Submission, dispatch and observation of analysis jobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{info, warn};

use vframe_models::{AnalysisResult, AnomalyEvent, ErrorKind, JobId, JobRecord, JobStatus};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::inspectors;
use crate::orchestrator::Orchestrator;
use crate::registry::InspectorRegistry;
use crate::sampling::{FfmpegSampler, MediaSampler};
use crate::store::JobStore;
use crate::workspace::WorkspaceManager;

/// Container extensions accepted for upload.
const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "webm"];

/// A submission waiting for a pipeline slot.
struct QueuedJob {
    job_id: JobId,
    media_path: PathBuf,
}

/// The analysis engine's front door.
///
/// Owns the job store, the bounded admission queue and the dispatcher that
/// runs at most `max_concurrent_jobs` orchestrators at a time. Handlers
/// talk to it through [`submit`], [`status_of`], [`result_of`],
/// [`events_of`] and [`cancel`].
///
/// [`submit`]: AnalysisService::submit
/// [`status_of`]: AnalysisService::status_of
/// [`result_of`]: AnalysisService::result_of
/// [`events_of`]: AnalysisService::events_of
/// [`cancel`]: AnalysisService::cancel
pub struct AnalysisService {
    config: EngineConfig,
    store: Arc<JobStore>,
    submit_tx: mpsc::Sender<QueuedJob>,
    cancels: Mutex<HashMap<JobId, Arc<watch::Sender<bool>>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl AnalysisService {
    /// Start the service with an explicit registry and sampler.
    pub fn start(
        config: EngineConfig,
        registry: InspectorRegistry,
        sampler: Arc<dyn MediaSampler>,
    ) -> Arc<Self> {
        let (submit_tx, submit_rx) = mpsc::channel(config.admission_queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        let orchestrator = Orchestrator {
            config: config.clone(),
            store: Arc::new(JobStore::new()),
            registry: Arc::new(registry),
            workspaces: WorkspaceManager::new(config.workspace_base.clone()),
            sampler,
        };

        let service = Arc::new(Self {
            config,
            store: Arc::clone(&orchestrator.store),
            submit_tx,
            cancels: Mutex::new(HashMap::new()),
            shutdown_tx,
        });

        tokio::spawn(dispatch_loop(
            Arc::clone(&service),
            orchestrator,
            submit_rx,
        ));

        service
    }

    /// Start with the default inspector catalogue and the ffmpeg sampler.
    pub fn with_defaults(config: EngineConfig) -> EngineResult<Arc<Self>> {
        let registry = inspectors::default_registry()?;
        let sampler = Arc::new(FfmpegSampler::new(&config));
        Ok(Self::start(config, registry, sampler))
    }

    /// Submit a media file for analysis.
    ///
    /// Rejects synchronously (before any record exists) when the file is
    /// too large, the container type is outside the allow-list, or the
    /// admission queue is full. On success the engine owns `media_path`.
    pub fn submit(
        &self,
        media_path: PathBuf,
        filename: &str,
        size_bytes: u64,
    ) -> EngineResult<JobId> {
        if size_bytes > self.config.max_upload_bytes {
            return Err(EngineError::rejected(format!(
                "file size {} exceeds the {} byte limit",
                size_bytes, self.config.max_upload_bytes
            )));
        }
        if !has_allowed_extension(filename) {
            return Err(EngineError::rejected(format!(
                "unsupported media type for '{filename}' (expected one of {})",
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }

        // Reserve the queue slot first: overload must reject before a job
        // record is created.
        let permit = match self.submit_tx.try_reserve() {
            Ok(permit) => permit,
            Err(mpsc::error::TrySendError::Full(())) => {
                return Err(EngineError::rejected("admission queue is full"));
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                return Err(EngineError::ShuttingDown);
            }
        };

        let job_id = JobId::new();
        self.store.insert(JobRecord::new(job_id.clone(), filename))?;

        let cancel = Arc::new(watch::channel(false).0);
        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .insert(job_id.clone(), cancel);

        permit.send(QueuedJob {
            job_id: job_id.clone(),
            media_path,
        });

        info!(job_id = %job_id, filename = %filename, "Job submitted");
        Ok(job_id)
    }

    /// Snapshot of one job's record.
    pub fn status_of(&self, job_id: &JobId) -> EngineResult<JobRecord> {
        self.store.read(job_id)
    }

    /// The analysis result. Available iff the job completed.
    pub fn result_of(&self, job_id: &JobId) -> EngineResult<AnalysisResult> {
        let snapshot = self.store.read(job_id)?;
        match snapshot.status {
            JobStatus::Completed => snapshot
                .result
                .ok_or_else(|| EngineError::NotReady(job_id.to_string())),
            JobStatus::Failed => Err(EngineError::JobFailed {
                kind: snapshot.error_kind.unwrap_or(ErrorKind::Cancelled),
                detail: snapshot.error_detail.unwrap_or_default(),
            }),
            _ => Err(EngineError::NotReady(job_id.to_string())),
        }
    }

    /// The final anomaly timeline. Available iff the job completed.
    pub fn events_of(&self, job_id: &JobId) -> EngineResult<Vec<AnomalyEvent>> {
        Ok(self.result_of(job_id)?.events)
    }

    /// Request cancellation of a job.
    ///
    /// Returns `true` when this call delivered the first effective signal;
    /// repeated cancels and cancels of terminal jobs are no-ops.
    pub fn cancel(&self, job_id: &JobId) -> EngineResult<bool> {
        let snapshot = self.store.read(job_id)?;
        if snapshot.status.is_terminal() {
            return Ok(false);
        }

        let cancels = self.cancels.lock().expect("cancel map lock poisoned");
        match cancels.get(job_id) {
            Some(tx) if !*tx.borrow() => {
                let _ = tx.send(true);
                info!(job_id = %job_id, "Cancellation requested");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Stop accepting submissions and wind the dispatcher down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn take_cancel(&self, job_id: &JobId) -> Arc<watch::Sender<bool>> {
        let mut cancels = self.cancels.lock().expect("cancel map lock poisoned");
        cancels
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| Arc::new(watch::channel(false).0))
    }

    fn drop_cancel(&self, job_id: &JobId) {
        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .remove(job_id);
    }
}

/// Pull queued jobs and run them under the top-level concurrency cap.
async fn dispatch_loop(
    service: Arc<AnalysisService>,
    orchestrator: Orchestrator,
    mut submit_rx: mpsc::Receiver<QueuedJob>,
) {
    let slots = Arc::new(Semaphore::new(orchestrator.config.max_concurrent_jobs));
    let mut shutdown_rx = service.shutdown_tx.subscribe();

    info!(
        max_jobs = orchestrator.config.max_concurrent_jobs,
        "Dispatcher started"
    );

    'outer: loop {
        let queued = tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            queued = submit_rx.recv() => match queued {
                Some(q) => q,
                None => break,
            },
        };

        // Wait for a job slot; on shutdown, drain the queued job as
        // cancelled rather than leaving it pending forever.
        let permit = 'acquire: loop {
            tokio::select! {
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(p) => break 'acquire p,
                    Err(_) => {
                        abort_queued(&service, queued).await;
                        break 'outer;
                    }
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        abort_queued(&service, queued).await;
                        break 'outer;
                    }
                }
            }
        };

        let service = Arc::clone(&service);
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let cancel = service.take_cancel(&queued.job_id);
            orchestrator
                .run_job(&queued.job_id, queued.media_path, cancel)
                .await;
            service.drop_cancel(&queued.job_id);
        });
    }

    info!("Dispatcher stopped");
}

async fn abort_queued(service: &AnalysisService, queued: QueuedJob) {
    warn!(job_id = %queued.job_id, "Dropping queued job on shutdown");
    let _ = tokio::fs::remove_file(&queued.media_path).await;
    let _ = service.store.update(&queued.job_id, |r| {
        r.fail(ErrorKind::Cancelled, "engine shut down before the job ran");
    });
    service.drop_cancel(&queued.job_id);
}

fn has_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let ext = e.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
