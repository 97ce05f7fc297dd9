//! Static catalogue of inspector descriptors.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::inspector::Inspector;

/// Inputs an inspector needs from the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requires {
    pub frames: bool,
    pub audio: bool,
    pub transcript: bool,
}

impl Requires {
    pub const FRAMES: Self = Self {
        frames: true,
        audio: false,
        transcript: false,
    };
    pub const AUDIO: Self = Self {
        frames: false,
        audio: true,
        transcript: false,
    };
}

/// Contract metadata for one inspector slot.
#[derive(Debug, Clone)]
pub struct InspectorDescriptor {
    /// Unique name
    pub name: String,
    /// Inputs the inspector consumes
    pub requires: Requires,
    /// Weight of the inspector's score in fusion, in [0, 1]
    pub weight: f64,
    /// Hard wall-clock cap for one invocation
    pub timeout: Duration,
    /// Event tags the inspector may emit
    pub may_emit: Vec<String>,
    /// Whether a failure of this inspector fails the whole job
    pub fatal_on_failure: bool,
}

impl InspectorDescriptor {
    pub fn new(name: impl Into<String>, requires: Requires, weight: f64, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            requires,
            weight,
            timeout: Duration::from_secs(timeout_secs),
            may_emit: Vec::new(),
            fatal_on_failure: false,
        }
    }

    pub fn emits(mut self, tag: impl Into<String>) -> Self {
        self.may_emit.push(tag.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal_on_failure = true;
        self
    }
}

/// A descriptor paired with its implementation.
#[derive(Clone)]
pub struct RegisteredInspector {
    pub descriptor: InspectorDescriptor,
    pub inspector: Arc<dyn Inspector>,
}

/// Open catalogue of inspectors. Registration order is the fan-out order.
#[derive(Default)]
pub struct InspectorRegistry {
    entries: Vec<RegisteredInspector>,
}

impl InspectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inspector. Names must be unique and weights in [0, 1].
    pub fn register(
        &mut self,
        descriptor: InspectorDescriptor,
        inspector: Arc<dyn Inspector>,
    ) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&descriptor.weight) {
            return Err(EngineError::Registry(format!(
                "inspector '{}' has weight {} outside [0, 1]",
                descriptor.name, descriptor.weight
            )));
        }
        if self.entries.iter().any(|e| e.descriptor.name == descriptor.name) {
            return Err(EngineError::Registry(format!(
                "inspector '{}' already registered",
                descriptor.name
            )));
        }
        self.entries.push(RegisteredInspector {
            descriptor,
            inspector,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredInspector> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredInspector> {
        self.entries.iter().find(|e| e.descriptor.name == name)
    }

    /// Inspectors that must run before the transcript-dependent wave:
    /// currently the `transcript` producer itself.
    pub fn artifact_producers(&self) -> Vec<&RegisteredInspector> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.name == "transcript")
            .collect()
    }

    /// Inspectors scheduled in the concurrent fan-out wave, in
    /// registration (FIFO) order.
    pub fn fan_out(&self) -> Vec<&RegisteredInspector> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.name != "transcript")
            .collect()
    }

    /// The longest single-inspector timeout, used as the cancellation
    /// grace period.
    pub fn max_timeout(&self) -> Duration {
        self.entries
            .iter()
            .map(|e| e.descriptor.timeout)
            .max()
            .unwrap_or(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{ArtifactBag, InspectorCtx, InspectorReport};
    use async_trait::async_trait;
    use vframe_media::SampledMedia;

    struct Noop(&'static str);

    #[async_trait]
    impl crate::inspector::Inspector for Noop {
        fn name(&self) -> &str {
            self.0
        }
        async fn inspect(
            &self,
            _ctx: &InspectorCtx,
            _bundle: &SampledMedia,
            _derived: &ArtifactBag,
        ) -> crate::error::EngineResult<InspectorReport> {
            Ok(InspectorReport::score(0.0))
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = InspectorRegistry::new();
        registry
            .register(
                InspectorDescriptor::new("blink", Requires::FRAMES, 0.1, 90),
                Arc::new(Noop("blink")),
            )
            .unwrap();

        let err = registry
            .register(
                InspectorDescriptor::new("blink", Requires::FRAMES, 0.1, 90),
                Arc::new(Noop("blink")),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Registry(_)));
    }

    #[test]
    fn test_weight_out_of_range_rejected() {
        let mut registry = InspectorRegistry::new();
        let err = registry
            .register(
                InspectorDescriptor::new("bad", Requires::FRAMES, 1.5, 60),
                Arc::new(Noop("bad")),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Registry(_)));
    }

    #[test]
    fn test_transcript_partitioned_from_fan_out() {
        let mut registry = InspectorRegistry::new();
        registry
            .register(
                InspectorDescriptor::new("transcript", Requires::AUDIO, 0.0, 60),
                Arc::new(Noop("transcript")),
            )
            .unwrap();
        registry
            .register(
                InspectorDescriptor::new("lipsync", Requires::FRAMES, 0.15, 120),
                Arc::new(Noop("lipsync")),
            )
            .unwrap();

        assert_eq!(registry.artifact_producers().len(), 1);
        assert_eq!(registry.fan_out().len(), 1);
        assert_eq!(registry.fan_out()[0].descriptor.name, "lipsync");
        assert_eq!(registry.max_timeout(), Duration::from_secs(120));
    }
}
