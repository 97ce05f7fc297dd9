//! Media probing and sampling.
//!
//! This crate turns an uploaded video file into the canonical sampled
//! representation the inspection pipeline consumes: uniformly sampled RGB
//! frames plus a mono 16 kHz PCM audio track, both bounded by a configurable
//! maximum duration. Decoding is delegated to `ffmpeg`/`ffprobe` found on
//! `PATH`.

pub mod bundle;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod sampler;

pub use bundle::{Frame, SampledMedia};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use sampler::{sample, SampleOptions};
