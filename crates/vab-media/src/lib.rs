//! Media layer of the VAB pipeline.
//!
//! Two halves:
//! - **prep**: ffmpeg/ffprobe wrappers that normalize the source, decode
//!   keyframes, slice audio and segment the video into shots.
//! - **detect**: the uniform [`detect::Detector`] interface, the static
//!   registry, and every detector adapter (object passes, super-resolution,
//!   mask refinement, faces, text, color, motion, audio, transitions).

pub mod command;
pub mod detect;
pub mod error;
pub mod frames;
pub mod prep;
pub mod probe;

pub use command::FfmpegCommand;
pub use error::{MediaError, MediaResult};
pub use prep::{prepare, PrepOutput, VideoSourceMeta};
pub use probe::{probe_video, VideoInfo};
