//! Per-job anomaly event aggregation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use vframe_models::AnomalyEvent;

/// Collects events from concurrently running inspectors and produces the
/// final deterministic timeline.
#[derive(Debug, Default)]
pub struct EventAggregator {
    events: Mutex<Vec<AnomalyEvent>>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append events from one inspector outcome. Safe to call from
    /// concurrent tasks.
    pub fn append(&self, events: Vec<AnomalyEvent>) {
        if events.is_empty() {
            return;
        }
        let mut guard = self.events.lock().expect("event aggregator lock poisoned");
        guard.extend(events);
    }

    /// Produce the final ordered timeline.
    ///
    /// Events running past the effective duration are clamped and tagged
    /// `clamped = true`. Events identical under
    /// `(module, event, ts@0.01s, dur@0.01s)` are merged into one, with
    /// metadata merged shallowly (later writer wins). The result is sorted
    /// by (ts, module, event).
    pub fn finalize(&self, effective_duration_sec: f64) -> Vec<AnomalyEvent> {
        let drained = {
            let mut guard = self.events.lock().expect("event aggregator lock poisoned");
            std::mem::take(&mut *guard)
        };

        let mut merged: BTreeMap<(String, String, i64, i64), AnomalyEvent> = BTreeMap::new();

        for mut event in drained {
            if event.ts + event.dur > effective_duration_sec {
                event.ts = event.ts.min(effective_duration_sec);
                event.dur = (effective_duration_sec - event.ts).max(0.0);
                event.meta.insert("clamped".to_string(), true.into());
            }

            let key = (
                event.module.clone(),
                event.event.clone(),
                centis(event.ts),
                centis(event.dur),
            );
            match merged.get_mut(&key) {
                Some(existing) => {
                    // Shallow merge, later writer wins on collisions
                    existing.meta.extend(event.meta);
                }
                None => {
                    merged.insert(key, event);
                }
            }
        }

        let mut timeline: Vec<AnomalyEvent> = merged.into_values().collect();
        timeline.sort_by(|a, b| a.timeline_cmp(b));
        timeline
    }
}

/// Round seconds to hundredths for the deduplication key.
fn centis(seconds: f64) -> i64 {
    (seconds * 100.0).round() as i64
}
