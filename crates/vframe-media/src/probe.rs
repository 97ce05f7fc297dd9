//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels (pre-rotation)
    pub width: u32,
    /// Height in pixels (pre-rotation)
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Display rotation in degrees (0, 90, 180, 270)
    pub rotation: u32,
    /// Whether the file carries an audio stream
    pub has_audio: bool,
    /// Video codec
    pub codec: String,
    /// File size in bytes
    pub size: u64,
}

impl VideoInfo {
    /// Frame dimensions after applying the display rotation.
    pub fn display_dimensions(&self) -> (u32, u32) {
        if self.rotation == 90 || self.rotation == 270 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    parse_probe(probe)
}

fn parse_probe(probe: FfprobeOutput) -> MediaResult<VideoInfo> {
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::unsupported("no video stream found"))?;

    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    // Container duration, falling back to the longest stream duration
    let mut duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    if duration <= 0.0 {
        duration = probe
            .streams
            .iter()
            .filter_map(|s| s.duration.as_ref().and_then(|d| d.parse::<f64>().ok()))
            .fold(0.0, f64::max);
    }
    if duration <= 0.0 {
        return Err(MediaError::unsupported("media reports zero duration"));
    }

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::unsupported("video stream has zero dimensions"));
    }

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .or(video_stream.r_frame_rate.as_ref())
        .and_then(|r| parse_frame_rate(r))
        .unwrap_or(30.0);

    let rotation = video_stream
        .tags
        .get("rotate")
        .map(|t| parse_rotation(t))
        .unwrap_or(0);

    Ok(VideoInfo {
        duration,
        width,
        height,
        fps,
        rotation,
        has_audio,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size,
    })
}

/// Parse a frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }
    s.parse().ok()
}

/// Parse a rotation tag, tolerating fractional forms like "90.000".
fn parse_rotation(tag: &str) -> u32 {
    let degrees: i64 = tag
        .split('.')
        .next()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    degrees.rem_euclid(360) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_json(json: &str) -> MediaResult<VideoInfo> {
        parse_probe(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_rotation() {
        assert_eq!(parse_rotation("90"), 90);
        assert_eq!(parse_rotation("90.000"), 90);
        assert_eq!(parse_rotation("-90"), 270);
        assert_eq!(parse_rotation("garbage"), 0);
    }

    #[test]
    fn test_parse_probe_with_audio() {
        let info = probe_json(
            r#"{
                "format": {"duration": "15.0", "size": "1024"},
                "streams": [
                    {"codec_type": "video", "codec_name": "h264", "width": 1280,
                     "height": 720, "avg_frame_rate": "30/1"},
                    {"codec_type": "audio", "codec_name": "aac"}
                ]
            }"#,
        )
        .unwrap();

        assert!((info.duration - 15.0).abs() < 1e-9);
        assert_eq!((info.width, info.height), (1280, 720));
        assert!(info.has_audio);
        assert_eq!(info.display_dimensions(), (1280, 720));
    }

    #[test]
    fn test_parse_probe_rotated_dimensions() {
        let info = probe_json(
            r#"{
                "format": {"duration": "5.0"},
                "streams": [
                    {"codec_type": "video", "width": 1920, "height": 1080,
                     "r_frame_rate": "30/1", "tags": {"rotate": "90"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(info.rotation, 90);
        assert_eq!(info.display_dimensions(), (1080, 1920));
    }

    #[test]
    fn test_parse_probe_duration_from_streams() {
        let info = probe_json(
            r#"{
                "format": {},
                "streams": [
                    {"codec_type": "video", "width": 640, "height": 480,
                     "duration": "7.5", "avg_frame_rate": "25/1"}
                ]
            }"#,
        )
        .unwrap();
        assert!((info.duration - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_rejects_audio_only() {
        let err = probe_json(
            r#"{
                "format": {"duration": "3.0"},
                "streams": [{"codec_type": "audio", "codec_name": "mp3"}]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedMedia(_)));
    }

    #[test]
    fn test_parse_probe_rejects_zero_duration() {
        let err = probe_json(
            r#"{
                "format": {"duration": "0"},
                "streams": [{"codec_type": "video", "width": 640, "height": 480}]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedMedia(_)));
    }
}
