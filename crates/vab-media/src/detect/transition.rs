//! Transition classification between adjacent shots.
//!
//! Compares the last frame of the previous shot with the first frame of the
//! current one. The scheduler only invokes this adapter when both shots are
//! prepped; a shot with no predecessor gets a `no_adjacent_shot` skip.

use async_trait::async_trait;
use image::GrayImage;
use serde::Serialize;
use tracing::debug;

use vab_models::{DetectorKind, DetectorPayload, Provenance, TransitionInfo, TransitionKind};

use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

const CUT_THRESHOLD: f64 = 0.3;
const NONE_THRESHOLD: f64 = 0.9;
const HARD_THRESHOLD: f64 = 0.5;
const FADE_BRIGHTNESS_DELTA: f64 = 50.0 / 255.0;
const DARK_LEVEL: f64 = 30.0 / 255.0;

#[derive(Debug, Default)]
pub struct TransitionDetector;

#[derive(Serialize)]
struct TransitionParams {
    method: &'static str,
    cut_threshold: f64,
    none_threshold: f64,
}

/// Classify the transition from the boundary frames and their similarity.
pub fn classify(prev: &GrayImage, curr: &GrayImage, similarity: f64) -> TransitionKind {
    if similarity > NONE_THRESHOLD {
        return TransitionKind::None;
    }
    if similarity < CUT_THRESHOLD {
        return TransitionKind::Cut;
    }

    let prev_mean = frames::mean_brightness(prev);
    let curr_mean = frames::mean_brightness(curr);
    let delta = (curr_mean - prev_mean).abs();

    if delta > FADE_BRIGHTNESS_DELTA {
        if curr_mean < DARK_LEVEL {
            TransitionKind::FadeToBlack
        } else if prev_mean < DARK_LEVEL {
            TransitionKind::FadeFromBlack
        } else {
            TransitionKind::Fade
        }
    } else {
        TransitionKind::Dissolve
    }
}

#[async_trait]
impl Detector for TransitionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Transition
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let prev_shot = ctx
            .prev_shot
            .ok_or_else(|| DetectError::input_defect("no adjacent shot"))?;

        let prev_path = prev_shot
            .last_frame()
            .ok_or_else(|| DetectError::input_defect("previous shot has no frames"))?;
        let curr_path = ctx
            .shot
            .first_frame()
            .ok_or_else(|| DetectError::input_defect("shot has no frames"))?;

        let prev =
            frames::load_luma(prev_path).map_err(|e| DetectError::input_defect(e.to_string()))?;
        let curr =
            frames::load_luma(curr_path).map_err(|e| DetectError::input_defect(e.to_string()))?;

        // Downscale for speed; SSIM needs matching dimensions.
        let prev_small = frames::downscale(&prev, 480);
        let curr_small = frames::downscale(&curr, 480);
        if prev_small.dimensions() != curr_small.dimensions() {
            return Err(DetectError::input_defect("boundary frame size mismatch"));
        }

        let similarity = frames::ssim(&prev_small, &curr_small);
        let kind = classify(&prev_small, &curr_small, similarity);

        debug!(
            shot = %ctx.shot.shot_id,
            similarity = similarity,
            kind = ?kind,
            "transition classified"
        );

        let info = TransitionInfo {
            kind,
            similarity: (similarity * 1000.0).round() / 1000.0,
            sharpness: if similarity < HARD_THRESHOLD {
                "hard"
            } else {
                "soft"
            }
            .to_string(),
        };

        let provenance = Provenance::new(
            "transition_detector",
            "1.0",
            Some("ssim".to_string()),
            &TransitionParams {
                method: "ssim",
                cut_threshold: CUT_THRESHOLD,
                none_threshold: NONE_THRESHOLD,
            },
        );
        Ok(Detection::new(DetectorPayload::Transition(info), provenance))
    }
}
