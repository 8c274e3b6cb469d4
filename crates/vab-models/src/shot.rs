//! Shot descriptors produced by the prep stage.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The slice of the audio track belonging to a shot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioWindow {
    /// Window start in seconds
    pub start_s: f64,
    /// Window end in seconds
    pub end_s: f64,
}

impl AudioWindow {
    pub fn duration_s(&self) -> f64 {
        (self.end_s - self.start_s).max(0.0)
    }
}

/// A contiguous range of frames between detected boundaries. Derived once in
/// prep and immutable thereafter; the unit of per-detector work.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Shot {
    /// Shot identifier (`sh_000`, ...)
    pub shot_id: String,
    /// First frame (inclusive)
    pub start_frame: u64,
    /// Last frame (exclusive)
    pub end_frame: u64,
    /// Number of frames in the shot
    pub frame_count: u64,
    /// Shot duration in seconds
    pub duration_s: f64,
    /// Ordered paths of the decoded keyframes for this shot
    pub frame_paths: Vec<PathBuf>,
    /// Audio slice covered by this shot
    pub audio_window: AudioWindow,
}

impl Shot {
    /// Path of the middle keyframe, the canonical per-shot sample.
    pub fn mid_frame(&self) -> Option<&PathBuf> {
        self.frame_paths.get(self.frame_paths.len() / 2)
    }

    /// Path of the first keyframe.
    pub fn first_frame(&self) -> Option<&PathBuf> {
        self.frame_paths.first()
    }

    /// Path of the last keyframe.
    pub fn last_frame(&self) -> Option<&PathBuf> {
        self.frame_paths.last()
    }

    /// Sample up to `max` frame paths evenly spaced across the shot.
    pub fn sample_frames(&self, max: usize) -> Vec<PathBuf> {
        if max == 0 || self.frame_paths.is_empty() {
            return Vec::new();
        }
        if self.frame_paths.len() <= max {
            return self.frame_paths.clone();
        }
        let step = self.frame_paths.len() as f64 / max as f64;
        (0..max)
            .map(|i| self.frame_paths[(i as f64 * step) as usize].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot_with_frames(n: usize) -> Shot {
        Shot {
            shot_id: "sh_000".to_string(),
            start_frame: 0,
            end_frame: n as u64,
            frame_count: n as u64,
            duration_s: n as f64 / 30.0,
            frame_paths: (0..n)
                .map(|i| PathBuf::from(format!("frames/frame_{:08}.jpg", i)))
                .collect(),
            audio_window: AudioWindow {
                start_s: 0.0,
                end_s: n as f64 / 30.0,
            },
        }
    }

    #[test]
    fn sample_frames_even_spacing() {
        let shot = shot_with_frames(100);
        let sampled = shot.sample_frames(10);
        assert_eq!(sampled.len(), 10);
        assert_eq!(sampled[0], shot.frame_paths[0]);
        // Last sample lands in the final tenth of the shot.
        assert_eq!(sampled[9], shot.frame_paths[90]);
    }

    #[test]
    fn sample_frames_short_shot_returns_all() {
        let shot = shot_with_frames(3);
        assert_eq!(shot.sample_frames(12).len(), 3);
        assert!(shot.sample_frames(0).is_empty());
    }

    #[test]
    fn mid_frame_selection() {
        let shot = shot_with_frames(5);
        assert_eq!(shot.mid_frame(), Some(&shot.frame_paths[2]));
    }
}
