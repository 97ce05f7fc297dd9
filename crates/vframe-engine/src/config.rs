//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Version tag stamped on every result. Fusion weights are frozen per
/// version.
pub const PIPELINE_VERSION: &str = "veriframe_v1";

/// Static engine configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum orchestrators runnable simultaneously
    pub max_concurrent_jobs: usize,
    /// Maximum inspectors running concurrently within one job
    pub max_concurrent_inspectors: usize,
    /// Bounded admission queue length; overflow rejects the submission
    pub admission_queue_capacity: usize,
    /// Frame sampling cadence
    pub target_fps: u32,
    /// Maximum seconds of media to analyze
    pub max_duration_sec: f64,
    /// Upload size cap in bytes
    pub max_upload_bytes: u64,
    /// Wall-clock budget for the sampling stage
    pub sampling_timeout: Duration,
    /// Overall per-job budget; expiry cancels the job
    pub per_job_timeout: Duration,
    /// Base directory for per-job workspaces
    pub workspace_base: PathBuf,
    /// Pipeline version stamped on results
    pub pipeline_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_concurrent_inspectors: 4,
            admission_queue_capacity: 64,
            target_fps: 8,
            max_duration_sec: 30.0,
            max_upload_bytes: 100 * 1024 * 1024, // 100 MiB
            sampling_timeout: Duration::from_secs(120),
            per_job_timeout: Duration::from_secs(600),
            workspace_base: std::env::temp_dir().join("veriframe"),
            pipeline_version: PIPELINE_VERSION.to_string(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("ENGINE_MAX_JOBS", defaults.max_concurrent_jobs),
            max_concurrent_inspectors: env_parse(
                "ENGINE_MAX_INSPECTORS_PER_JOB",
                defaults.max_concurrent_inspectors,
            ),
            admission_queue_capacity: env_parse(
                "ENGINE_QUEUE_CAPACITY",
                defaults.admission_queue_capacity,
            ),
            target_fps: env_parse("ENGINE_TARGET_FPS", defaults.target_fps),
            max_duration_sec: env_parse("ENGINE_MAX_DURATION_SEC", defaults.max_duration_sec),
            max_upload_bytes: env_parse("ENGINE_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            sampling_timeout: Duration::from_secs(env_parse(
                "ENGINE_SAMPLING_TIMEOUT_SECS",
                defaults.sampling_timeout.as_secs(),
            )),
            per_job_timeout: Duration::from_secs(env_parse(
                "ENGINE_JOB_TIMEOUT_SECS",
                defaults.per_job_timeout.as_secs(),
            )),
            workspace_base: std::env::var("ENGINE_WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_base),
            pipeline_version: defaults.pipeline_version,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.max_concurrent_inspectors, 4);
        assert_eq!(config.admission_queue_capacity, 64);
        assert_eq!(config.target_fps, 8);
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.per_job_timeout, Duration::from_secs(600));
    }
}
