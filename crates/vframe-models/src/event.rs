//! Timestamped anomaly events.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A timestamped observation attributed to one inspection module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnomalyEvent {
    /// Name of the inspector that emitted the event
    pub module: String,

    /// Event tag (from the inspector's declared vocabulary)
    pub event: String,

    /// Offset into the sampled media, in seconds
    pub ts: f64,

    /// Duration of the observation, in seconds (0 for instantaneous)
    pub dur: f64,

    /// Scalar metadata attached by the inspector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl AnomalyEvent {
    /// Create an event with no metadata.
    pub fn new(module: impl Into<String>, event: impl Into<String>, ts: f64, dur: f64) -> Self {
        Self {
            module: module.into(),
            event: event.into(),
            ts,
            dur,
            meta: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Timeline ordering: (ts ascending, module ascending, event ascending).
    pub fn timeline_cmp(&self, other: &Self) -> Ordering {
        self.ts
            .total_cmp(&other.ts)
            .then_with(|| self.module.cmp(&other.module))
            .then_with(|| self.event.cmp(&other.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_ordering() {
        let a = AnomalyEvent::new("flow", "flow_spike", 1.1, 0.0);
        let b = AnomalyEvent::new("blink", "abnormal_blink", 1.1, 0.0);
        let c = AnomalyEvent::new("lighting", "light_change", 7.5, 0.2);

        assert_eq!(b.timeline_cmp(&a), Ordering::Less); // same ts, module order
        assert_eq!(a.timeline_cmp(&c), Ordering::Less);
    }

    #[test]
    fn test_wire_shape() {
        let event = AnomalyEvent::new("audio", "audio_loop", 0.0, 2.5).with_meta("period_s", 2.5);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["module"], "audio");
        assert_eq!(json["event"], "audio_loop");
        assert_eq!(json["ts"], 0.0);
        assert_eq!(json["dur"], 2.5);
        assert_eq!(json["meta"]["period_s"], 2.5);
    }

    #[test]
    fn test_empty_meta_omitted() {
        let event = AnomalyEvent::new("flow", "flow_spike", 1.0, 0.0);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("meta"));
    }
}
