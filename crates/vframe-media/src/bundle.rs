//! The canonical sampled-media bundle consumed by all inspectors.

use std::path::PathBuf;

/// A single decoded frame, RGB24, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Offset into the sampled media, in seconds
    pub ts: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Packed RGB pixel data (`width * height * 3` bytes)
    pub rgb: Vec<u8>,
}

impl Frame {
    /// Mean luma of the frame (Rec. 601 weights), in [0, 255].
    pub fn mean_luma(&self) -> f64 {
        if self.rgb.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .rgb
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
            .sum();
        sum / (self.rgb.len() / 3) as f64
    }

    /// Luma value of the pixel at (x, y).
    pub fn luma_at(&self, x: u32, y: u32) -> f64 {
        let idx = ((y * self.width + x) * 3) as usize;
        let px = &self.rgb[idx..idx + 3];
        0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
    }
}

/// Sampled representation of one uploaded video.
///
/// Frames are sampled uniformly at `target_fps` starting at t = 0, with
/// strictly increasing timestamps `i / target_fps`. The audio track is mono
/// 16 kHz signed 16-bit PCM written inside the owning job's workspace, and is
/// an empty WAV when the source has no audio stream.
#[derive(Debug, Clone)]
pub struct SampledMedia {
    /// Ordered decoded frames
    pub frames: Vec<Frame>,
    /// Extracted audio track (WAV, inside the job workspace)
    pub audio_path: PathBuf,
    /// Whether the source carried an audio stream
    pub has_audio: bool,
    /// Path of the source file inside the job workspace
    pub source_path: PathBuf,
    /// Duration of the original upload, in seconds
    pub original_duration_sec: f64,
    /// Duration of the analyzed segment, in seconds
    pub effective_duration_sec: f64,
    /// Sampling cadence
    pub target_fps: u32,
}

impl SampledMedia {
    /// Number of sampled frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Read the extracted audio track as f32 samples in [-1, 1].
    ///
    /// Returns an empty vector for audio-less sources.
    pub fn audio_samples(&self) -> crate::MediaResult<(Vec<f32>, u32)> {
        let mut reader = hound::WavReader::open(&self.audio_path)?;
        let spec = reader.spec();
        let samples: Result<Vec<f32>, _> = reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect();
        Ok((samples?, spec.sample_rate))
    }
}
