//! Conditional super-resolution of the shot's middle frame.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use vab_models::{DetectorKind, DetectorPayload, Provenance};

use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

/// Fixed upscale factor of the SR engine.
pub const SR_SCALE: u32 = 4;

/// Where the upscaled copy of a frame lives (`frame_x.jpg` -> `frame_x_sr.jpg`).
pub fn sr_frame_path(frame: &std::path::Path) -> std::path::PathBuf {
    let stem = frame
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frame");
    frame.with_file_name(format!("{}_sr.jpg", stem))
}

/// Upscales the middle frame when the source is below the trigger height and
/// SR is still enabled. The upscaled frame is written next to the original
/// with an `_sr` suffix; the fine object pass reads it from the chain state.
#[derive(Debug, Default)]
pub struct SuperResDetector;

#[derive(Serialize)]
struct SrParams {
    engine: &'static str,
    scale: u32,
    trigger_min_h: u32,
}

impl SuperResDetector {
    fn provenance(&self, trigger_min_h: u32) -> Provenance {
        Provenance::new(
            "superres",
            "0.3.0",
            Some("bicubic_x4".to_string()),
            &SrParams {
                engine: "bicubic_x4",
                scale: SR_SCALE,
                trigger_min_h,
            },
        )
    }
}

#[async_trait]
impl Detector for SuperResDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SuperRes
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let trigger_min_h = ctx.cfg.detect.superres.trigger_min_h;
        let provenance = self.provenance(trigger_min_h);

        if !ctx.cfg.detect.superres.enabled {
            return Ok(Detection::new(DetectorPayload::SrUsed(false), provenance));
        }

        let path = ctx.mid_frame()?;
        let image = frames::load_rgb(path).map_err(|e| DetectError::input_defect(e.to_string()))?;

        if image.height() >= trigger_min_h {
            return Ok(Detection::new(DetectorPayload::SrUsed(false), provenance));
        }

        let upscaled = image::imageops::resize(
            &image,
            image.width() * SR_SCALE,
            image.height() * SR_SCALE,
            image::imageops::FilterType::CatmullRom,
        );

        let sr_path = sr_frame_path(path);
        upscaled
            .save(&sr_path)
            .map_err(|e| DetectError::internal(format!("failed to write SR frame: {}", e)))?;

        debug!(
            shot = %ctx.shot.shot_id,
            from_h = image.height(),
            to_h = upscaled.height(),
            "super-resolution applied"
        );

        Ok(Detection::new(DetectorPayload::SrUsed(true), provenance))
    }
}
