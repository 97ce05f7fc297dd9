//! Single-inspector execution with timeout and failure isolation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use vframe_media::SampledMedia;
use vframe_models::{AnomalyEvent, JobId};

use crate::inspector::{ArtifactBag, InspectorCtx, InspectorReport};
use crate::registry::RegisteredInspector;

/// Score substituted for a non-success outcome: maximally uncertain.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Diagnostic tag emitted when an inspector fails non-fatally.
pub const FAILED_EVENT_TAG: &str = "inspector_failed";

/// Diagnostic tag recorded when an out-of-range score was clamped.
pub const CLAMPED_EVENT_TAG: &str = "score_clamped";

/// How long a cancelled or timed-out inspector gets to observe its token
/// before the task is torn down.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Terminal outcome of one inspector invocation.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        score: f64,
        events: Vec<AnomalyEvent>,
        artifacts: BTreeMap<String, String>,
    },
    Timeout,
    Error {
        detail: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Short description of a non-success outcome.
    pub fn failure_reason(&self) -> String {
        match self {
            Outcome::Success { .. } => String::new(),
            Outcome::Timeout => "timeout".to_string(),
            Outcome::Error { detail } => detail.clone(),
        }
    }
}

/// Execute one inspector against the bundle under its wall-clock cap.
///
/// The inspector runs in its own task so panics are contained. On timeout
/// or job cancellation the invocation's token is triggered first
/// (cooperative), then the task is torn down after a short grace.
pub async fn run(
    entry: &RegisteredInspector,
    job_id: &JobId,
    bundle: Arc<SampledMedia>,
    derived: ArtifactBag,
    mut job_cancel: watch::Receiver<bool>,
) -> Outcome {
    let name = entry.descriptor.name.clone();
    let (run_cancel_tx, run_cancel_rx) = watch::channel(false);

    let ctx = InspectorCtx {
        job_id: job_id.clone(),
        cancel: run_cancel_rx,
    };

    let inspector = Arc::clone(&entry.inspector);
    let mut handle = tokio::spawn(async move { inspector.inspect(&ctx, &bundle, &derived).await });

    let timeout = tokio::time::sleep(entry.descriptor.timeout);
    tokio::pin!(timeout);

    let outcome = tokio::select! {
        res = &mut handle => classify(entry, res),
        _ = &mut timeout => {
            warn!(
                job_id = %job_id,
                inspector = %name,
                "Inspector exceeded its {:?} budget, cancelling",
                entry.descriptor.timeout
            );
            let _ = run_cancel_tx.send(true);
            let _ = tokio::time::timeout(CANCEL_GRACE, &mut handle).await;
            handle.abort();
            Outcome::Timeout
        }
        _ = cancelled(&mut job_cancel) => {
            debug!(job_id = %job_id, inspector = %name, "Job cancelled mid-inspection");
            let _ = run_cancel_tx.send(true);
            let _ = tokio::time::timeout(CANCEL_GRACE, &mut handle).await;
            handle.abort();
            Outcome::Error { detail: "cancelled".to_string() }
        }
    };

    debug!(
        job_id = %job_id,
        inspector = %name,
        success = outcome.is_success(),
        "Inspector finished"
    );
    outcome
}

/// Resolve once the watch observes `true`; pends forever if the sender is
/// dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Classify the raw task result into an outcome, enforcing the contract:
/// scores are clamped to [0, 1] and events outside the declared vocabulary
/// are dropped.
fn classify(
    entry: &RegisteredInspector,
    res: Result<crate::error::EngineResult<InspectorReport>, tokio::task::JoinError>,
) -> Outcome {
    let descriptor = &entry.descriptor;
    let report = match res {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            return Outcome::Error {
                detail: e.to_string(),
            }
        }
        Err(join) if join.is_panic() => {
            return Outcome::Error {
                detail: format!("inspector '{}' panicked", descriptor.name),
            }
        }
        Err(_) => {
            return Outcome::Error {
                detail: "inspector task aborted".to_string(),
            }
        }
    };

    if report.score.is_nan() {
        return Outcome::Error {
            detail: "inspector returned a NaN score".to_string(),
        };
    }

    let mut events: Vec<AnomalyEvent> = report
        .events
        .into_iter()
        .filter(|e| {
            let allowed = descriptor.may_emit.iter().any(|tag| tag == &e.event)
                || e.event == FAILED_EVENT_TAG
                || e.event == CLAMPED_EVENT_TAG;
            if !allowed {
                warn!(
                    inspector = %descriptor.name,
                    tag = %e.event,
                    "Dropping event with undeclared tag"
                );
            }
            allowed
        })
        .map(|mut e| {
            // Events are attributed to the inspector that ran, whatever the
            // implementation wrote in the module field.
            e.module = descriptor.name.clone();
            e
        })
        .collect();

    let mut score = report.score;
    if !(0.0..=1.0).contains(&score) {
        let clamped = score.clamp(0.0, 1.0);
        events.push(
            AnomalyEvent::new(descriptor.name.clone(), CLAMPED_EVENT_TAG, 0.0, 0.0)
                .with_meta("raw", score),
        );
        score = clamped;
    }

    Outcome::Success {
        score,
        events,
        artifacts: report.artifacts,
    }
}

/// Diagnostic event recorded when an inspector degrades to the neutral
/// score: spans the whole analyzed segment.
pub fn failure_event(name: &str, effective_duration_sec: f64, reason: &str) -> AnomalyEvent {
    AnomalyEvent::new(name, FAILED_EVENT_TAG, 0.0, effective_duration_sec)
        .with_meta("reason", reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use crate::inspector::Inspector;
    use crate::registry::{InspectorDescriptor, Requires};
    use crate::testutil::synthetic_bundle;
    use async_trait::async_trait;

    struct Fixed {
        score: f64,
        events: Vec<AnomalyEvent>,
    }

    #[async_trait]
    impl Inspector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn inspect(
            &self,
            _ctx: &InspectorCtx,
            _bundle: &SampledMedia,
            _derived: &ArtifactBag,
        ) -> EngineResult<InspectorReport> {
            Ok(InspectorReport {
                score: self.score,
                events: self.events.clone(),
                artifacts: BTreeMap::new(),
            })
        }
    }

    struct Hangs;

    #[async_trait]
    impl Inspector for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }
        async fn inspect(
            &self,
            ctx: &InspectorCtx,
            _bundle: &SampledMedia,
            _derived: &ArtifactBag,
        ) -> EngineResult<InspectorReport> {
            let mut cancel = ctx.cancel.clone();
            loop {
                if cancel.changed().await.is_err() || *cancel.borrow() {
                    return Err(EngineError::inspector("cancelled"));
                }
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl Inspector for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        async fn inspect(
            &self,
            _ctx: &InspectorCtx,
            _bundle: &SampledMedia,
            _derived: &ArtifactBag,
        ) -> EngineResult<InspectorReport> {
            panic!("boom");
        }
    }

    fn entry(
        name: &str,
        timeout_secs: u64,
        may_emit: &[&str],
        inspector: Arc<dyn Inspector>,
    ) -> RegisteredInspector {
        let mut descriptor = InspectorDescriptor::new(name, Requires::FRAMES, 0.1, timeout_secs);
        for tag in may_emit {
            descriptor = descriptor.emits(*tag);
        }
        RegisteredInspector {
            descriptor,
            inspector,
        }
    }

    fn idle_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive for the duration of the test
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_clean_success_passes_through() {
        let events = vec![AnomalyEvent::new("fixed", "flow_spike", 1.0, 0.0)];
        let entry = entry(
            "fixed",
            5,
            &["flow_spike"],
            Arc::new(Fixed { score: 0.3, events }),
        );

        let outcome = run(
            &entry,
            &JobId::new(),
            Arc::new(synthetic_bundle(10.0, 8)),
            ArtifactBag::new(),
            idle_cancel(),
        )
        .await;

        match outcome {
            Outcome::Success { score, events, .. } => {
                assert!((score - 0.3).abs() < 1e-9);
                assert_eq!(events.len(), 1);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_score_clamped_with_event() {
        let entry = entry(
            "fixed",
            5,
            &[],
            Arc::new(Fixed {
                score: 1.7,
                events: Vec::new(),
            }),
        );

        let outcome = run(
            &entry,
            &JobId::new(),
            Arc::new(synthetic_bundle(10.0, 8)),
            ArtifactBag::new(),
            idle_cancel(),
        )
        .await;

        match outcome {
            Outcome::Success { score, events, .. } => {
                assert_eq!(score, 1.0);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].event, CLAMPED_EVENT_TAG);
                assert_eq!(events[0].meta["raw"], serde_json::json!(1.7));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undeclared_tags_dropped_and_module_forced() {
        let events = vec![
            AnomalyEvent::new("spoofed", "flow_spike", 1.0, 0.0),
            AnomalyEvent::new("fixed", "made_up_tag", 2.0, 0.0),
        ];
        let entry = entry(
            "fixed",
            5,
            &["flow_spike"],
            Arc::new(Fixed { score: 0.2, events }),
        );

        let outcome = run(
            &entry,
            &JobId::new(),
            Arc::new(synthetic_bundle(10.0, 8)),
            ArtifactBag::new(),
            idle_cancel(),
        )
        .await;

        match outcome {
            Outcome::Success { events, .. } => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].module, "fixed");
                assert_eq!(events[0].event, "flow_spike");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_inspector_times_out() {
        let entry = entry("hangs", 1, &[], Arc::new(Hangs));

        let outcome = run(
            &entry,
            &JobId::new(),
            Arc::new(synthetic_bundle(10.0, 8)),
            ArtifactBag::new(),
            idle_cancel(),
        )
        .await;

        assert!(matches!(outcome, Outcome::Timeout));
    }

    #[tokio::test]
    async fn test_panic_is_contained_as_error() {
        let entry = entry("panics", 5, &[], Arc::new(Panics));

        let outcome = run(
            &entry,
            &JobId::new(),
            Arc::new(synthetic_bundle(10.0, 8)),
            ArtifactBag::new(),
            idle_cancel(),
        )
        .await;

        match outcome {
            Outcome::Error { detail } => assert!(detail.contains("panicked")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_job_cancel_stops_running_inspector() {
        let entry = entry("hangs", 600, &[], Arc::new(Hangs));
        let (tx, rx) = watch::channel(false);

        let job_id = JobId::new();
        let bundle = Arc::new(synthetic_bundle(10.0, 8));
        let fut = run(&entry, &job_id, bundle, ArtifactBag::new(), rx);
        tokio::pin!(fut);

        // Let the inspector start, then cancel
        tokio::select! {
            _ = &mut fut => panic!("inspector finished before cancel"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        tx.send(true).unwrap();

        let outcome = fut.await;
        match outcome {
            Outcome::Error { detail } => assert!(detail.contains("cancelled")),
            other => panic!("expected cancel error, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_event_spans_segment() {
        let event = failure_event("lipsync", 15.0, "timeout");
        assert_eq!(event.module, "lipsync");
        assert_eq!(event.event, FAILED_EVENT_TAG);
        assert_eq!(event.ts, 0.0);
        assert_eq!(event.dur, 15.0);
        assert_eq!(event.meta["reason"], "timeout");
    }
}
