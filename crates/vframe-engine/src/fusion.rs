//! Deterministic score fusion.

use std::collections::BTreeMap;

use vframe_models::Label;

use crate::registry::InspectorRegistry;

/// Confidence at or above which a video is labelled likely real.
const REAL_THRESHOLD: f64 = 0.70;

/// Confidence at or above which a video is labelled uncertain; below is
/// likely fake.
const UNCERTAIN_THRESHOLD: f64 = 0.40;

/// Fuse per-inspector scores into an overall confidence and label.
///
/// Scores follow the higher-is-more-synthetic convention; the weighted mean
/// over the non-zero-weight inspectors present in `scores` is inverted into
/// a confidence that the video is real. Pure and deterministic: identical
/// score maps produce identical outputs.
pub fn fuse(scores: &BTreeMap<String, f64>, registry: &InspectorRegistry) -> (f64, Label) {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for (name, score) in scores {
        let weight = match registry.get(name) {
            Some(entry) => entry.descriptor.weight,
            None => continue,
        };
        if weight <= 0.0 {
            continue;
        }
        weighted_sum += weight * score;
        weight_total += weight;
    }

    if weight_total <= 0.0 {
        return (0.5, Label::Uncertain);
    }

    let fake_score = weighted_sum / weight_total;
    let confidence = (1.0 - fake_score).clamp(0.0, 1.0);
    (confidence, label_for(confidence))
}

/// The exact piecewise label function, inclusive on lower bounds.
pub fn label_for(confidence: f64) -> Label {
    if confidence >= REAL_THRESHOLD {
        Label::LikelyReal
    } else if confidence >= UNCERTAIN_THRESHOLD {
        Label::Uncertain
    } else {
        Label::LikelyFake
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InspectorDescriptor, Requires};
    use crate::testutil::NoopInspector;
    use std::sync::Arc;

    fn registry_with(weights: &[(&str, f64)]) -> InspectorRegistry {
        let mut registry = InspectorRegistry::new();
        for (name, weight) in weights {
            registry
                .register(
                    InspectorDescriptor::new(*name, Requires::FRAMES, *weight, 60),
                    Arc::new(NoopInspector::new(*name)),
                )
                .unwrap();
        }
        registry
    }

    fn default_weights() -> InspectorRegistry {
        registry_with(&[
            ("visual_clip", 0.20),
            ("visual_artifacts", 0.15),
            ("lipsync", 0.15),
            ("blink", 0.10),
            ("ocr_gibberish", 0.05),
            ("motion_flow", 0.10),
            ("audio_loop", 0.05),
            ("lighting", 0.05),
            ("transcript", 0.00),
        ])
    }

    #[test]
    fn test_uniform_low_scores_label_real() {
        let registry = default_weights();
        let scores: BTreeMap<String, f64> = registry
            .iter()
            .map(|e| (e.descriptor.name.clone(), 0.1))
            .collect();

        let (confidence, label) = fuse(&scores, &registry);
        assert!((confidence - 0.9).abs() < 1e-9);
        assert_eq!(label, Label::LikelyReal);
    }

    #[test]
    fn test_mixed_scores_match_weighted_mean() {
        let registry = default_weights();
        let scores = BTreeMap::from([
            ("visual_clip".to_string(), 0.9),
            ("visual_artifacts".to_string(), 0.85),
            ("lipsync".to_string(), 0.8),
            ("blink".to_string(), 0.7),
            ("ocr_gibberish".to_string(), 0.6),
            ("motion_flow".to_string(), 0.75),
            ("audio_loop".to_string(), 0.5),
            ("lighting".to_string(), 0.8),
        ]);

        // fakeScore = sum(w * s) / sum(w) over the scored inspectors
        let expected_mean = (0.20 * 0.9
            + 0.15 * 0.85
            + 0.15 * 0.8
            + 0.10 * 0.7
            + 0.05 * 0.6
            + 0.10 * 0.75
            + 0.05 * 0.5
            + 0.05 * 0.8)
            / 0.85;

        let (confidence, label) = fuse(&scores, &registry);
        assert!((confidence - (1.0 - expected_mean)).abs() < 1e-9);
        assert_eq!(label, Label::LikelyFake);
    }

    #[test]
    fn test_zero_weight_scores_ignored() {
        let registry = default_weights();
        let mut scores = BTreeMap::from([("visual_clip".to_string(), 0.0)]);
        scores.insert("transcript".to_string(), 1.0);

        let (confidence, _) = fuse(&scores, &registry);
        assert!((confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_scores_are_uncertain() {
        let registry = default_weights();
        let (confidence, label) = fuse(&BTreeMap::new(), &registry);
        assert_eq!(confidence, 0.5);
        assert_eq!(label, Label::Uncertain);
    }

    #[test]
    fn test_unknown_inspector_names_ignored() {
        let registry = registry_with(&[("visual_clip", 0.2)]);
        let scores = BTreeMap::from([
            ("visual_clip".to_string(), 0.5),
            ("not_registered".to_string(), 1.0),
        ]);

        let (confidence, _) = fuse(&scores, &registry);
        assert!((confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_edges_belong_to_higher_bucket() {
        assert_eq!(label_for(0.70), Label::LikelyReal);
        assert_eq!(label_for(0.699_999_9), Label::Uncertain);
        assert_eq!(label_for(0.40), Label::Uncertain);
        assert_eq!(label_for(0.399_999_9), Label::LikelyFake);
        assert_eq!(label_for(1.0), Label::LikelyReal);
        assert_eq!(label_for(0.0), Label::LikelyFake);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let registry = default_weights();
        let scores = BTreeMap::from([
            ("visual_clip".to_string(), 0.37),
            ("blink".to_string(), 0.62),
        ]);

        let first = fuse(&scores, &registry);
        for _ in 0..10 {
            assert_eq!(fuse(&scores, &registry), first);
        }
    }
}
