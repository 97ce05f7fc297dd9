//! Uniform frame sampling and audio extraction.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bundle::{Frame, SampledMedia};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// Audio extraction target: mono 16 kHz signed 16-bit PCM.
const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Options controlling one sampling run.
#[derive(Debug, Clone)]
pub struct SampleOptions {
    /// Frames per second to sample at
    pub target_fps: u32,
    /// Maximum duration to analyze, in seconds
    pub max_duration_sec: f64,
    /// Overall wall-clock budget for the sampling stage
    pub timeout_secs: u64,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            target_fps: 8,
            max_duration_sec: 30.0,
            timeout_secs: 120,
        }
    }
}

/// Sample a video into the canonical bundle.
///
/// Probes the input, decodes frames at exactly `target_fps` starting at
/// t = 0 for `min(duration, max_duration_sec)` seconds, and extracts the
/// audio track into `workspace/audio.wav`. Sources without audio get an
/// empty WAV and `has_audio = false`.
///
/// The run is bounded by `timeout_secs` and observes `cancel`; both paths
/// kill any in-flight decoder process.
pub async fn sample(
    input: &Path,
    workspace: &Path,
    opts: &SampleOptions,
    mut cancel: watch::Receiver<bool>,
) -> MediaResult<SampledMedia> {
    let work = sample_inner(input, workspace, opts);
    tokio::pin!(work);

    let timeout = tokio::time::sleep(Duration::from_secs(opts.timeout_secs));
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            res = &mut work => return res,
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return Err(MediaError::Cancelled);
                }
            }
            _ = &mut timeout => return Err(MediaError::SamplingTimeout(opts.timeout_secs)),
        }
    }
}

async fn sample_inner(
    input: &Path,
    workspace: &Path,
    opts: &SampleOptions,
) -> MediaResult<SampledMedia> {
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let info = probe_video(input).await?;

    let effective = info.duration.min(opts.max_duration_sec);
    if info.duration > opts.max_duration_sec {
        info!(
            "Source duration {:.2}s exceeds cap {:.2}s, analyzing the leading segment only",
            info.duration, opts.max_duration_sec
        );
    }

    let (width, height) = info.display_dimensions();

    let raw = decode_raw_frames(input, info.rotation, opts.target_fps, effective).await?;
    let max_frames = (effective * opts.target_fps as f64).ceil() as usize;
    let frames = split_frames(&raw, width, height, opts.target_fps, max_frames);
    if frames.is_empty() {
        return Err(MediaError::unsupported("decoder produced no frames"));
    }
    debug!(
        "Sampled {} frames at {} fps over {:.2}s",
        frames.len(),
        opts.target_fps,
        effective
    );

    let audio_path = workspace.join("audio.wav");
    let mut has_audio = info.has_audio;
    if has_audio {
        if let Err(e) = extract_audio(input, &audio_path, effective).await {
            warn!("Audio extraction failed, continuing without audio: {}", e);
            has_audio = false;
        }
    }
    if !has_audio {
        write_empty_wav(&audio_path)?;
    }

    Ok(SampledMedia {
        frames,
        audio_path,
        has_audio,
        source_path: input.to_path_buf(),
        original_duration_sec: info.duration,
        effective_duration_sec: effective,
        target_fps: opts.target_fps,
    })
}

/// Decode `duration` seconds of the input as packed RGB24 frames on stdout.
async fn decode_raw_frames(
    input: &Path,
    rotation: u32,
    target_fps: u32,
    duration: f64,
) -> MediaResult<Vec<u8>> {
    let filter = frame_filter(rotation, target_fps);

    let output = Command::new("ffmpeg")
        .arg("-v")
        .arg("error")
        .arg("-noautorotate")
        .arg("-t")
        .arg(format!("{duration:.3}"))
        .arg("-i")
        .arg(input)
        .arg("-vf")
        .arg(&filter)
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "frame decode failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    Ok(output.stdout)
}

/// Extract the audio track, truncated to `duration` seconds.
async fn extract_audio(input: &Path, out: &Path, duration: f64) -> MediaResult<()> {
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-v")
        .arg("error")
        .arg("-t")
        .arg(format!("{duration:.3}"))
        .arg("-i")
        .arg(input)
        .arg("-vn")
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg(AUDIO_SAMPLE_RATE.to_string())
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg(out)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "audio extraction failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    Ok(())
}

/// Build the decode filter chain for the display rotation and cadence.
fn frame_filter(rotation: u32, target_fps: u32) -> String {
    let fps = format!("fps={target_fps}");
    match rotation {
        90 => format!("transpose=1,{fps}"),
        180 => format!("hflip,vflip,{fps}"),
        270 => format!("transpose=2,{fps}"),
        _ => fps,
    }
}

/// Slice a raw RGB24 byte stream into timestamped frames.
///
/// The i-th produced frame gets timestamp `i / target_fps`; any trailing
/// partial frame is discarded and the count is capped at `max_frames`.
fn split_frames(
    raw: &[u8],
    width: u32,
    height: u32,
    target_fps: u32,
    max_frames: usize,
) -> Vec<Frame> {
    let bytes_per_frame = (width as usize) * (height as usize) * 3;
    if bytes_per_frame == 0 || target_fps == 0 {
        return Vec::new();
    }

    let count = (raw.len() / bytes_per_frame).min(max_frames);
    (0..count)
        .map(|i| Frame {
            ts: i as f64 / target_fps as f64,
            width,
            height,
            rgb: raw[i * bytes_per_frame..(i + 1) * bytes_per_frame].to_vec(),
        })
        .collect()
}

/// Write a valid zero-sample WAV for audio-less sources.
fn write_empty_wav(path: &Path) -> MediaResult<PathBuf> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: AUDIO_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let writer = hound::WavWriter::create(path, spec)?;
    writer.finalize()?;
    Ok(path.to_path_buf())
}
