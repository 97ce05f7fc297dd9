//! Pure-Rust heuristic inspectors operating on the sampled bundle.
//!
//! Each inspector computes a cheap signal directly from the decoded frames
//! or the extracted PCM track. Scores follow the shared convention: higher
//! means more likely synthetic.

use async_trait::async_trait;
use vframe_media::{Frame, SampledMedia};
use vframe_models::AnomalyEvent;

use crate::error::{EngineError, EngineResult};
use crate::inspector::{ArtifactBag, Inspector, InspectorCtx, InspectorReport};

/// How often frame loops re-check the cancellation token.
const CANCEL_CHECK_STRIDE: usize = 16;

fn check_cancel(ctx: &InspectorCtx, index: usize) -> EngineResult<()> {
    if index % CANCEL_CHECK_STRIDE == 0 && ctx.is_cancelled() {
        return Err(EngineError::inspector("cancelled"));
    }
    Ok(())
}

/// Mean absolute luma difference between two frames, sampled on a coarse
/// pixel grid.
fn frame_delta(a: &Frame, b: &Frame) -> f64 {
    let stride = 4 * 3; // every 4th pixel
    let len = a.rgb.len().min(b.rgb.len());
    if len == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut count = 0u32;
    let mut i = 0;
    while i + 2 < len {
        let la = 0.299 * a.rgb[i] as f64 + 0.587 * a.rgb[i + 1] as f64 + 0.114 * a.rgb[i + 2] as f64;
        let lb = 0.299 * b.rgb[i] as f64 + 0.587 * b.rgb[i + 1] as f64 + 0.114 * b.rgb[i + 2] as f64;
        sum += (la - lb).abs();
        count += 1;
        i += stride;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, var.sqrt() + 1e-6)
}

// ============================================================================
// motion_flow
// ============================================================================

/// Flags abrupt inter-frame motion spikes.
///
/// Builds a per-transition motion magnitude series, then reports
/// transitions whose z-score exceeds 2, throttled to at most one event per
/// second of media.
pub struct MotionFlowInspector;

#[async_trait]
impl Inspector for MotionFlowInspector {
    fn name(&self) -> &str {
        "motion_flow"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let frames = &bundle.frames;
        if frames.len() < 2 {
            return Ok(InspectorReport::score(0.0));
        }

        let mut magnitudes = Vec::with_capacity(frames.len() - 1);
        for (i, pair) in frames.windows(2).enumerate() {
            check_cancel(ctx, i)?;
            magnitudes.push(frame_delta(&pair[0], &pair[1]));
        }
        if magnitudes.len() < 5 {
            return Ok(InspectorReport::score(0.0));
        }

        let (mean, std) = mean_std(&magnitudes);
        let fps = bundle.target_fps as f64;

        let mut events = Vec::new();
        let mut last_event_ts = f64::NEG_INFINITY;
        for (i, magnitude) in magnitudes.iter().enumerate() {
            let ts = (i as f64 + 0.5) / fps;
            if ts < last_event_ts + 1.0 {
                continue;
            }
            let z = (magnitude - mean) / std;
            if z > 2.0 {
                events.push(
                    AnomalyEvent::new("motion_flow", "flow_spike", round2(ts), 0.0)
                        .with_meta("z", round2(z)),
                );
                last_event_ts = ts;
            }
        }

        let score = if events.is_empty() { 0.0 } else { 0.10 };
        Ok(InspectorReport {
            score,
            events,
            ..Default::default()
        })
    }
}

// ============================================================================
// lighting
// ============================================================================

/// Luma delta (0-255 scale) treated as an abrupt lighting change.
const LIGHT_JUMP_THRESHOLD: f64 = 28.0;

/// Flags abrupt global lighting changes between consecutive frames.
pub struct LightingInspector;

#[async_trait]
impl Inspector for LightingInspector {
    fn name(&self) -> &str {
        "lighting"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let mut lumas = Vec::with_capacity(bundle.frames.len());
        for (i, frame) in bundle.frames.iter().enumerate() {
            check_cancel(ctx, i)?;
            lumas.push(frame.mean_luma());
        }

        let fps = bundle.target_fps as f64;
        let mut events = Vec::new();
        for (i, pair) in lumas.windows(2).enumerate() {
            let jump = (pair[1] - pair[0]).abs();
            if jump > LIGHT_JUMP_THRESHOLD {
                events.push(
                    AnomalyEvent::new("lighting", "light_change", round2((i + 1) as f64 / fps), 0.0)
                        .with_meta("delta", round2(jump)),
                );
            }
        }

        let score = if events.is_empty() { 0.0 } else { 0.10 };
        Ok(InspectorReport {
            score,
            events,
            ..Default::default()
        })
    }
}

// ============================================================================
// audio_loop
// ============================================================================

/// Envelope hop size in seconds (20 ms frames at 16 kHz).
const ENVELOPE_HOP_SEC: f64 = 0.02;

/// Detects looped audio via autocorrelation of the RMS envelope.
///
/// A strong repeat (correlation above 0.8 of the zero-lag energy at a lag
/// of at least half a second) is reported as an `audio_loop` event whose
/// duration is the loop period.
pub struct AudioLoopInspector;

#[async_trait]
impl Inspector for AudioLoopInspector {
    fn name(&self) -> &str {
        "audio_loop"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        if !bundle.has_audio {
            return Ok(InspectorReport::score(0.0));
        }
        let (samples, sample_rate) = bundle.audio_samples()?;
        if samples.is_empty() {
            return Ok(InspectorReport::score(0.0));
        }
        if ctx.is_cancelled() {
            return Err(EngineError::inspector("cancelled"));
        }

        let hop = (sample_rate as f64 * ENVELOPE_HOP_SEC) as usize;
        let envelope = rms_envelope(&samples, hop.max(1));

        match loop_period(&envelope, ENVELOPE_HOP_SEC) {
            Some(period_s) => {
                let event = AnomalyEvent::new("audio_loop", "audio_loop", 0.0, round2(period_s))
                    .with_meta("period_s", round2(period_s));
                Ok(InspectorReport {
                    score: 0.10,
                    events: vec![event],
                    ..Default::default()
                })
            }
            None => Ok(InspectorReport::score(0.0)),
        }
    }
}

/// RMS energy per hop of `hop` samples.
fn rms_envelope(samples: &[f32], hop: usize) -> Vec<f64> {
    samples
        .chunks(hop)
        .map(|chunk| {
            let energy: f64 = chunk.iter().map(|s| (*s as f64).powi(2)).sum();
            (energy / chunk.len() as f64).sqrt()
        })
        .collect()
}

/// Smallest lag (≥ 0.5 s) whose autocorrelation exceeds 0.8 of zero-lag.
fn loop_period(envelope: &[f64], hop_sec: f64) -> Option<f64> {
    let n = envelope.len();
    let min_lag = (0.5 / hop_sec) as usize;
    if n < min_lag * 2 {
        return None;
    }

    let mean = envelope.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = envelope.iter().map(|v| v - mean).collect();
    let zero_lag: f64 = centered.iter().map(|v| v * v).sum();
    if zero_lag < 1e-12 {
        return None;
    }

    for lag in min_lag..(n / 2) {
        let corr: f64 = centered[..n - lag]
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum();
        if corr > 0.8 * zero_lag {
            return Some(lag as f64 * hop_sec);
        }
    }
    None
}

// ============================================================================
// visual_artifacts
// ============================================================================

/// Blockiness ratio above which a frame is reported as artifacted.
const BLOCKINESS_EVENT_THRESHOLD: f64 = 1.35;

/// Scores compression-style blocking artifacts.
///
/// Compares horizontal luma gradients across 8-pixel block boundaries with
/// gradients elsewhere; heavily re-generated content shows boundary-aligned
/// energy.
pub struct VisualArtifactsInspector;

#[async_trait]
impl Inspector for VisualArtifactsInspector {
    fn name(&self) -> &str {
        "visual_artifacts"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let fps = bundle.target_fps as f64;
        let mut ratios = Vec::new();
        let mut events = Vec::new();
        let mut last_event_ts = f64::NEG_INFINITY;

        // Every other frame is plenty for a blockiness estimate
        for (i, frame) in bundle.frames.iter().enumerate().step_by(2) {
            check_cancel(ctx, i)?;
            let ratio = blockiness(frame);
            ratios.push(ratio);

            let ts = i as f64 / fps;
            if ratio > BLOCKINESS_EVENT_THRESHOLD && ts >= last_event_ts + 1.0 {
                events.push(
                    AnomalyEvent::new("visual_artifacts", "visual_artifact", round2(ts), 0.0)
                        .with_meta("blockiness", round2(ratio)),
                );
                last_event_ts = ts;
            }
        }

        if ratios.is_empty() {
            return Ok(InspectorReport::score(0.0));
        }
        let mean_ratio = ratios.iter().sum::<f64>() / ratios.len() as f64;
        let score = (mean_ratio - 1.0).clamp(0.0, 1.0);

        Ok(InspectorReport {
            score,
            events,
            ..Default::default()
        })
    }
}

/// Ratio of mean luma gradient at 8-pixel column boundaries to the mean
/// gradient elsewhere. ~1.0 for natural content.
fn blockiness(frame: &Frame) -> f64 {
    if frame.width < 17 || frame.height < 2 {
        return 1.0;
    }
    let mut boundary_sum = 0.0;
    let mut boundary_n = 0u32;
    let mut interior_sum = 0.0;
    let mut interior_n = 0u32;

    // Coarse row sampling keeps this linear in width
    let row_step = (frame.height / 32).max(1);
    let mut y = 0;
    while y < frame.height {
        for x in 1..frame.width {
            let grad = (frame.luma_at(x, y) - frame.luma_at(x - 1, y)).abs();
            if x % 8 == 0 {
                boundary_sum += grad;
                boundary_n += 1;
            } else {
                interior_sum += grad;
                interior_n += 1;
            }
        }
        y += row_step;
    }

    if boundary_n == 0 || interior_n == 0 {
        return 1.0;
    }
    let interior_mean = interior_sum / interior_n as f64;
    if interior_mean < 1e-6 {
        return 1.0;
    }
    (boundary_sum / boundary_n as f64) / interior_mean
}

// ============================================================================
// blink
// ============================================================================

/// Seconds of media below which blink statistics are unreliable.
const BLINK_MIN_DURATION_SEC: f64 = 8.0;

/// Flags implausible blink cadence.
///
/// Tracks the luma of the upper-center region (where a talking head's eyes
/// sit in the overwhelming majority of uploads) and treats sharp dips as
/// blink candidates. No blinks at all over a long clip, or machine-gun
/// blinking, are both synthetic tells.
pub struct BlinkInspector;

#[async_trait]
impl Inspector for BlinkInspector {
    fn name(&self) -> &str {
        "blink"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let duration = bundle.effective_duration_sec;
        if bundle.frames.len() < 4 || duration < BLINK_MIN_DURATION_SEC {
            return Ok(InspectorReport::score(0.2));
        }

        let mut signal = Vec::with_capacity(bundle.frames.len());
        for (i, frame) in bundle.frames.iter().enumerate() {
            check_cancel(ctx, i)?;
            signal.push(upper_center_luma(frame));
        }

        let (mean, std) = mean_std(&signal);
        let fps = bundle.target_fps as f64;

        // A blink candidate is a local minimum well below the baseline
        let mut dips: Vec<f64> = Vec::new();
        for i in 1..signal.len() - 1 {
            let v = signal[i];
            if v < signal[i - 1] && v <= signal[i + 1] && v < mean - 1.5 * std {
                dips.push(i as f64 / fps);
            }
        }

        let rate = dips.len() as f64 / duration;
        if dips.is_empty() {
            let event = AnomalyEvent::new("blink", "abnormal_blink", 0.0, round2(duration))
                .with_meta("observed_blinks", 0);
            return Ok(InspectorReport {
                score: 0.65,
                events: vec![event],
                ..Default::default()
            });
        }
        if rate > 1.0 {
            let events = dips
                .iter()
                .take(3)
                .map(|ts| {
                    AnomalyEvent::new("blink", "abnormal_blink", round2(*ts), 0.0)
                        .with_meta("rate_hz", round2(rate))
                })
                .collect();
            return Ok(InspectorReport {
                score: 0.7,
                events,
                ..Default::default()
            });
        }

        Ok(InspectorReport::score(0.2))
    }
}

/// Mean luma of the region where eyes typically sit: the center half of
/// the frame horizontally, between 1/6 and 1/2 of its height.
fn upper_center_luma(frame: &Frame) -> f64 {
    let x0 = frame.width / 4;
    let x1 = (3 * frame.width / 4).max(x0 + 1);
    let y0 = frame.height / 6;
    let y1 = (frame.height / 2).max(y0 + 1);

    let mut sum = 0.0;
    let mut count = 0u32;
    let mut y = y0;
    while y < y1 {
        let mut x = x0;
        while x < x1 {
            sum += frame.luma_at(x, y);
            count += 1;
            x += 2;
        }
        y += 2;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

// ============================================================================
// ocr_gibberish
// ============================================================================

/// Per-row transition density above which a row reads as a text band.
const TEXT_BAND_THRESHOLD: f64 = 0.08;

/// Flags unstable text-like regions.
///
/// Overlaid captions are stable across frames; synthesized "text" flickers.
/// Measures edge-transition density over the bottom third of each frame
/// and reports high temporal instability of detected text bands.
pub struct OcrGibberishInspector;

#[async_trait]
impl Inspector for OcrGibberishInspector {
    fn name(&self) -> &str {
        "ocr_gibberish"
    }

    async fn inspect(
        &self,
        ctx: &InspectorCtx,
        bundle: &SampledMedia,
        _derived: &ArtifactBag,
    ) -> EngineResult<InspectorReport> {
        let mut densities = Vec::new();
        for (i, frame) in bundle.frames.iter().enumerate() {
            check_cancel(ctx, i)?;
            densities.push(caption_band_density(frame));
        }
        if densities.is_empty() {
            return Ok(InspectorReport::score(0.0));
        }

        let (mean, std) = mean_std(&densities);
        if mean < TEXT_BAND_THRESHOLD {
            // No text-like band at all
            return Ok(InspectorReport::score(0.05));
        }

        let instability = std / mean;
        if instability > 0.5 {
            let fps = bundle.target_fps as f64;
            // Report the most unstable frame
            let worst = densities
                .iter()
                .enumerate()
                .max_by(|a, b| {
                    (a.1 - mean).abs().total_cmp(&(b.1 - mean).abs())
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            let event = AnomalyEvent::new(
                "ocr_gibberish",
                "gibberish_text",
                round2(worst as f64 / fps),
                0.0,
            )
            .with_meta("instability", round2(instability));
            return Ok(InspectorReport {
                score: (0.3 + instability * 0.4).clamp(0.0, 1.0),
                events: vec![event],
                ..Default::default()
            });
        }

        Ok(InspectorReport::score(0.1))
    }
}

/// Fraction of strong horizontal luma transitions in the bottom third of
/// the frame, where burned-in captions live.
fn caption_band_density(frame: &Frame) -> f64 {
    if frame.width < 2 || frame.height < 3 {
        return 0.0;
    }
    let y0 = 2 * frame.height / 3;
    let mut transitions = 0u32;
    let mut total = 0u32;

    let mut y = y0;
    while y < frame.height {
        for x in 1..frame.width {
            if (frame.luma_at(x, y) - frame.luma_at(x - 1, y)).abs() > 60.0 {
                transitions += 1;
            }
            total += 1;
        }
        y += 4;
    }
    if total == 0 {
        0.0
    } else {
        transitions as f64 / total as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bundle_from_frames, flat_frame, synthetic_bundle};
    use tokio::sync::watch;
    use vframe_models::JobId;

    fn ctx() -> InspectorCtx {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        InspectorCtx {
            job_id: JobId::new(),
            cancel: rx,
        }
    }

    #[tokio::test]
    async fn test_motion_flow_quiet_on_static_frames() {
        let bundle = synthetic_bundle(10.0, 8);
        let report = MotionFlowInspector
            .inspect(&ctx(), &bundle, &ArtifactBag::new())
            .await
            .unwrap();
        assert_eq!(report.score, 0.0);
        assert!(report.events.is_empty());
    }

    #[tokio::test]
    async fn test_motion_flow_flags_single_jump() {
        // Static luma with one hard cut in the middle
        let mut frames: Vec<Frame> = (0..40).map(|i| flat_frame(i as f64 / 8.0, 40)).collect();
        for frame in frames.iter_mut().skip(20) {
            frame.rgb.iter_mut().for_each(|b| *b = 220);
        }
        let bundle = bundle_from_frames(frames, 8);

        let report = MotionFlowInspector
            .inspect(&ctx(), &bundle, &ArtifactBag::new())
            .await
            .unwrap();
        assert!(report.score > 0.0);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].event, "flow_spike");
        // The spike sits at the cut: transition index 19 => (19 + 0.5) / 8
        assert!((report.events[0].ts - 2.44).abs() < 0.02);
    }

    #[tokio::test]
    async fn test_lighting_flags_luma_jump() {
        let mut frames: Vec<Frame> = (0..16).map(|i| flat_frame(i as f64 / 8.0, 40)).collect();
        for frame in frames.iter_mut().skip(8) {
            frame.rgb.iter_mut().for_each(|b| *b = 160);
        }
        let bundle = bundle_from_frames(frames, 8);

        let report = LightingInspector
            .inspect(&ctx(), &bundle, &ArtifactBag::new())
            .await
            .unwrap();
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].event, "light_change");
        assert!((report.events[0].ts - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_audio_loop_quiet_without_audio() {
        let bundle = synthetic_bundle(10.0, 8);
        let report = AudioLoopInspector
            .inspect(&ctx(), &bundle, &ArtifactBag::new())
            .await
            .unwrap();
        assert_eq!(report.score, 0.0);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_loop_period_detects_repeating_envelope() {
        // 2-second period on a 20 ms hop: 100 hops per cycle
        let envelope: Vec<f64> = (0..600)
            .map(|i| ((i % 100) as f64 / 100.0 * std::f64::consts::TAU).sin() + 2.0)
            .collect();
        let period = loop_period(&envelope, 0.02).expect("period not found");
        assert!((period - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_loop_period_none_for_noise_free_constant() {
        let envelope = vec![1.0; 600];
        assert!(loop_period(&envelope, 0.02).is_none());
    }

    #[tokio::test]
    async fn test_blink_zero_blinks_on_long_clip_is_abnormal() {
        let bundle = synthetic_bundle(12.0, 8);
        let report = BlinkInspector
            .inspect(&ctx(), &bundle, &ArtifactBag::new())
            .await
            .unwrap();
        assert!(report.score > 0.5);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].event, "abnormal_blink");
    }

    #[tokio::test]
    async fn test_blink_short_clip_is_inconclusive() {
        let bundle = synthetic_bundle(3.0, 8);
        let report = BlinkInspector
            .inspect(&ctx(), &bundle, &ArtifactBag::new())
            .await
            .unwrap();
        assert!(report.events.is_empty());
        assert!(report.score < 0.5);
    }

    #[tokio::test]
    async fn test_heuristics_observe_cancellation() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let cancelled_ctx = InspectorCtx {
            job_id: JobId::new(),
            cancel: rx,
        };

        let bundle = synthetic_bundle(10.0, 8);
        let err = MotionFlowInspector
            .inspect(&cancelled_ctx, &bundle, &ArtifactBag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_blockiness_near_one_for_flat_frame() {
        let frame = flat_frame(0.0, 64);
        let ratio = blockiness(&frame);
        assert!((ratio - 1.0).abs() < 0.01);
    }
}
