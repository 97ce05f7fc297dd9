//! Built-in inspector catalogue.

use std::sync::Arc;

pub mod heuristics;
pub mod remote;

pub use heuristics::{
    AudioLoopInspector, BlinkInspector, LightingInspector, MotionFlowInspector,
    OcrGibberishInspector, VisualArtifactsInspector,
};
pub use remote::{
    InferenceClient, InferenceConfig, LipsyncInspector, TranscriptInspector, VisualClipInspector,
};

use crate::error::EngineResult;
use crate::registry::{InspectorDescriptor, InspectorRegistry, Requires};

/// Build the default nine-slot registry.
///
/// Weights, timeouts and event vocabularies are frozen per pipeline
/// version. The `transcript` producer carries weight zero and runs before
/// every transcript-dependent inspector.
pub fn default_registry() -> EngineResult<InspectorRegistry> {
    default_registry_with(Arc::new(InferenceClient::from_env()?))
}

/// Build the default registry against an explicit inference client.
pub fn default_registry_with(client: Arc<InferenceClient>) -> EngineResult<InspectorRegistry> {
    let mut registry = InspectorRegistry::new();

    registry.register(
        InspectorDescriptor::new("visual_clip", Requires::FRAMES, 0.20, 60),
        Arc::new(VisualClipInspector::new(Arc::clone(&client))),
    )?;
    registry.register(
        InspectorDescriptor::new("visual_artifacts", Requires::FRAMES, 0.15, 120)
            .emits("visual_artifact"),
        Arc::new(VisualArtifactsInspector),
    )?;
    registry.register(
        InspectorDescriptor::new(
            "lipsync",
            Requires {
                frames: true,
                audio: true,
                transcript: true,
            },
            0.15,
            120,
        )
        .emits("lipsync_mismatch"),
        Arc::new(LipsyncInspector::new(Arc::clone(&client))),
    )?;
    registry.register(
        InspectorDescriptor::new("blink", Requires::FRAMES, 0.10, 90).emits("abnormal_blink"),
        Arc::new(BlinkInspector),
    )?;
    registry.register(
        InspectorDescriptor::new("ocr_gibberish", Requires::FRAMES, 0.05, 60)
            .emits("gibberish_text"),
        Arc::new(OcrGibberishInspector),
    )?;
    registry.register(
        InspectorDescriptor::new("motion_flow", Requires::FRAMES, 0.10, 60).emits("flow_spike"),
        Arc::new(MotionFlowInspector),
    )?;
    registry.register(
        InspectorDescriptor::new("audio_loop", Requires::AUDIO, 0.05, 30).emits("audio_loop"),
        Arc::new(AudioLoopInspector),
    )?;
    registry.register(
        InspectorDescriptor::new("lighting", Requires::FRAMES, 0.05, 30).emits("light_change"),
        Arc::new(LightingInspector),
    )?;
    registry.register(
        InspectorDescriptor::new("transcript", Requires::AUDIO, 0.00, 60),
        Arc::new(TranscriptInspector::new(client)),
    )?;

    Ok(registry)
}
