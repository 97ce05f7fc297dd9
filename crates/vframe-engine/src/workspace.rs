//! Per-job scratch directories.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use vframe_models::JobId;

use crate::error::{EngineError, EngineResult};

/// Allocates and releases per-job temp directories under a base path.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Path a job's workspace would occupy, whether or not it exists.
    pub fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.base.join(job_id.as_str())
    }

    /// Create the private directory for a job.
    ///
    /// Failure here is a fatal job error; the caller maps it to a terminal
    /// `WorkspaceError`.
    pub async fn acquire(&self, job_id: &JobId) -> EngineResult<Workspace> {
        let dir = self.path_for(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::workspace(format!("create {}: {}", dir.display(), e)))?;
        debug!(job_id = %job_id, "Acquired workspace {}", dir.display());
        Ok(Workspace {
            dir,
            released: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Handle to one job's private directory.
///
/// `release` deletes the directory recursively and is idempotent; a failed
/// delete is logged, never propagated.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
    released: Arc<AtomicBool>,
}

impl Workspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete the workspace directory. Safe to call more than once.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!("Released workspace {}", self.dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to release workspace {}: {}", self.dir.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_creates_private_dir() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(base.path());
        let job_id = JobId::new();

        let ws = manager.acquire(&job_id).await.unwrap();
        assert!(ws.dir().is_dir());
        assert_eq!(ws.dir(), manager.path_for(&job_id));
    }

    #[tokio::test]
    async fn test_release_removes_dir_and_is_idempotent() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(base.path());
        let ws = manager.acquire(&JobId::new()).await.unwrap();

        tokio::fs::write(ws.dir().join("audio.wav"), b"data")
            .await
            .unwrap();

        ws.release().await;
        assert!(!ws.dir().exists());

        // Second release is a no-op
        ws.release().await;
        assert!(!ws.dir().exists());
    }

    #[tokio::test]
    async fn test_acquire_failure_is_workspace_error() {
        // A base under a regular file cannot be created
        let base = TempDir::new().unwrap();
        let blocker = base.path().join("blocker");
        tokio::fs::write(&blocker, b"file").await.unwrap();

        let manager = WorkspaceManager::new(&blocker);
        let err = manager.acquire(&JobId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Workspace(_)));
    }
}
