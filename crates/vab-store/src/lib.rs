//! On-disk store for the VAB service.
//!
//! Layout, partitioned by video id so each job owns its directory:
//!
//! ```text
//! store/<video_id>/
//!   video.mp4
//!   audio.wav
//!   frames/frame_XXXXXXXX.jpg
//!   vab.json
//! ```

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::VideoStore;
