//! Final analysis result payload.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::event::AnomalyEvent;
use crate::job::JobId;

/// Categorical verdict for an analyzed video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Label {
    #[serde(rename = "LIKELY_REAL")]
    LikelyReal,
    #[serde(rename = "UNCERTAIN")]
    Uncertain,
    #[serde(rename = "LIKELY_FAKE")]
    LikelyFake,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::LikelyReal => "LIKELY_REAL",
            Label::Uncertain => "UNCERTAIN",
            Label::LikelyFake => "LIKELY_FAKE",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived pipeline details carried alongside the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DerivedDetails {
    /// Visual authenticity signal (the visual_clip inspector's score)
    pub visual_score: f64,
    /// Duration of the analyzed segment, in seconds
    pub video_length: f64,
    /// Duration of the original upload, in seconds
    pub original_video_length: f64,
    /// First ~150 characters of the speech transcript
    pub transcript_snippet: String,
    /// Wall-clock pipeline time, in seconds
    pub processing_time_sec: f64,
    /// Version tag of the pipeline that produced this result
    pub pipeline_version: String,
}

/// Complete result of one analysis job. Wire-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Job this result belongs to
    pub job_id: JobId,

    /// Final categorical label
    pub label: Label,

    /// Confidence that the video is real, in [0, 1]
    pub confidence: f64,

    /// Per-inspector scores on the higher-is-more-synthetic convention
    pub per_inspector_scores: BTreeMap<String, f64>,

    /// Deduplicated anomaly timeline, sorted by (ts, module, event)
    pub events: Vec<AnomalyEvent>,

    /// Derived pipeline details
    pub derived: DerivedDetails,

    /// When the result was produced
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_wire_form() {
        assert_eq!(
            serde_json::to_string(&Label::LikelyReal).unwrap(),
            "\"LIKELY_REAL\""
        );
        assert_eq!(
            serde_json::to_string(&Label::LikelyFake).unwrap(),
            "\"LIKELY_FAKE\""
        );
    }

    #[test]
    fn test_result_wire_field_names() {
        let result = AnalysisResult {
            job_id: JobId::from_string("job-1"),
            label: Label::Uncertain,
            confidence: 0.5,
            per_inspector_scores: BTreeMap::from([("visual_clip".to_string(), 0.5)]),
            events: vec![AnomalyEvent::new("flow", "flow_spike", 1.1, 0.0)],
            derived: DerivedDetails {
                visual_score: 0.5,
                video_length: 15.0,
                original_video_length: 15.0,
                transcript_snippet: "hello".to_string(),
                processing_time_sec: 2.0,
                pipeline_version: "veriframe_v1".to_string(),
            },
            processed_at: Utc::now(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["perInspectorScores"]["visual_clip"], 0.5);
        assert_eq!(json["derived"]["visualScore"], 0.5);
        assert_eq!(json["derived"]["originalVideoLength"], 15.0);
        assert_eq!(json["derived"]["pipelineVersion"], "veriframe_v1");
        assert!(json["processedAt"].is_string());
    }

    #[test]
    fn test_result_round_trip() {
        let result = AnalysisResult {
            job_id: JobId::new(),
            label: Label::LikelyFake,
            confidence: 0.2075,
            per_inspector_scores: BTreeMap::from([
                ("visual_clip".to_string(), 0.9),
                ("lipsync".to_string(), 0.8),
            ]),
            events: Vec::new(),
            derived: DerivedDetails {
                visual_score: 0.9,
                video_length: 15.0,
                original_video_length: 42.0,
                transcript_snippet: String::new(),
                processing_time_sec: 11.3,
                pipeline_version: "veriframe_v1".to_string(),
            },
            processed_at: Utc::now(),
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
