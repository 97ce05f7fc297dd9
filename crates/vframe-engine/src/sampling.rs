//! Seam between the orchestrator and the concrete media decoder.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::watch;

use vframe_media::{MediaResult, SampleOptions, SampledMedia};

use crate::config::EngineConfig;

/// Produces the canonical sampled bundle for one job.
///
/// The production implementation shells out to ffmpeg; tests substitute a
/// synthetic source.
#[async_trait]
pub trait MediaSampler: Send + Sync {
    async fn sample(
        &self,
        input: &Path,
        workspace: &Path,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<SampledMedia>;
}

/// FFmpeg-backed sampler.
pub struct FfmpegSampler {
    opts: SampleOptions,
}

impl FfmpegSampler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            opts: SampleOptions {
                target_fps: config.target_fps,
                max_duration_sec: config.max_duration_sec,
                timeout_secs: config.sampling_timeout.as_secs(),
            },
        }
    }
}

#[async_trait]
impl MediaSampler for FfmpegSampler {
    async fn sample(
        &self,
        input: &Path,
        workspace: &Path,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<SampledMedia> {
        vframe_media::sample(input, workspace, &self.opts, cancel).await
    }
}
