//! VeriFrame analysis engine.
//!
//! This crate owns the hard core of the service: the job store, the per-job
//! workspace lifecycle, the inspector registry and runner, event
//! aggregation, score fusion, and the orchestrator that drives every job
//! from submission to a terminal, concurrently observable status.

pub mod config;
pub mod error;
pub mod events;
pub mod fusion;
pub mod inspector;
pub mod inspectors;
pub mod registry;
pub mod runner;
pub mod sampling;
pub mod service;
pub mod store;
pub mod workspace;

mod orchestrator;

pub use config::{EngineConfig, PIPELINE_VERSION};
pub use error::{EngineError, EngineResult};
pub use events::EventAggregator;
pub use fusion::{fuse, label_for};
pub use inspector::{ArtifactBag, Inspector, InspectorCtx, InspectorReport};
pub use registry::{InspectorDescriptor, InspectorRegistry, RegisteredInspector, Requires};
pub use runner::{Outcome, FAILED_EVENT_TAG, NEUTRAL_SCORE};
pub use sampling::{FfmpegSampler, MediaSampler};
pub use service::AnalysisService;
pub use store::JobStore;
pub use workspace::{Workspace, WorkspaceManager};

#[cfg(test)]
pub(crate) mod testutil {
    use async_trait::async_trait;
    use std::path::PathBuf;
    use vframe_media::{Frame, SampledMedia};

    use crate::error::EngineResult;
    use crate::inspector::{ArtifactBag, Inspector, InspectorCtx, InspectorReport};

    /// A square frame of uniform mid-gray.
    pub fn flat_frame(ts: f64, size: u32) -> Frame {
        Frame {
            ts,
            width: size,
            height: size,
            rgb: vec![64; (size * size * 3) as usize],
        }
    }

    /// A bundle of flat frames with no audio.
    pub fn synthetic_bundle(duration_sec: f64, fps: u32) -> SampledMedia {
        let count = (duration_sec * fps as f64).ceil() as usize;
        let frames = (0..count)
            .map(|i| flat_frame(i as f64 / fps as f64, 40))
            .collect();
        bundle_from_frames(frames, fps)
    }

    /// Wrap explicit frames into a bundle.
    pub fn bundle_from_frames(frames: Vec<Frame>, fps: u32) -> SampledMedia {
        let duration = frames.len() as f64 / fps as f64;
        SampledMedia {
            frames,
            audio_path: PathBuf::from("/nonexistent/audio.wav"),
            has_audio: false,
            source_path: PathBuf::from("/nonexistent/source.mp4"),
            original_duration_sec: duration,
            effective_duration_sec: duration,
            target_fps: fps,
        }
    }

    /// Inspector that always returns score zero.
    pub struct NoopInspector {
        name: String,
    }

    impl NoopInspector {
        pub fn new(name: impl Into<String>) -> Self {
            Self { name: name.into() }
        }
    }

    #[async_trait]
    impl Inspector for NoopInspector {
        fn name(&self) -> &str {
            &self.name
        }

        async fn inspect(
            &self,
            _ctx: &InspectorCtx,
            _bundle: &SampledMedia,
            _derived: &ArtifactBag,
        ) -> EngineResult<InspectorReport> {
            Ok(InspectorReport::score(0.0))
        }
    }
}
