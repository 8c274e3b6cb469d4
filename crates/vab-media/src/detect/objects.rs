//! Object detection passes: coarse full-frame, tiled multi-scale, and the
//! fine pass over super-resolved frames.
//!
//! Each pass returns only its own boxes; the scheduler folds passes together
//! with cross-pass NMS so the tie-break rules live in one place.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use vab_models::{
    DetectionPass, DetectorKind, DetectorPayload, ObjectBox, Provenance,
};

use crate::detect::providers::{Proposal, VisionProvider};
use crate::detect::tiling::tile_grid;
use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

const CONF_THRESHOLD: f64 = 0.18;
const NMS_IOU: f64 = 0.65;

fn to_object(p: Proposal, pass: DetectionPass) -> ObjectBox {
    let area = (p.bbox[2] - p.bbox[0]).max(0.0) * (p.bbox[3] - p.bbox[1]).max(0.0);
    ObjectBox {
        label: p.label,
        conf: p.conf,
        bbox: p.bbox,
        area,
        class_id: p.class_id,
        pass,
        has_refined_mask: false,
    }
}

fn load_mid_frame(ctx: &ShotContext<'_>) -> DetectResult<RgbImage> {
    let path = ctx.mid_frame()?;
    frames::load_rgb(path).map_err(|e| DetectError::input_defect(e.to_string()))
}

/// Full-frame object pass.
pub struct CoarseObjectsDetector {
    provider: Arc<dyn VisionProvider>,
}

impl CoarseObjectsDetector {
    pub fn new(provider: Arc<dyn VisionProvider>) -> Self {
        Self { provider }
    }
}

#[derive(Serialize)]
struct CoarseParams<'a> {
    model: &'a str,
    conf: f64,
    iou: f64,
}

#[async_trait]
impl Detector for CoarseObjectsDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ObjectsCoarse
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let image = load_mid_frame(ctx)?;
        let proposals = self.provider.propose(&image, CONF_THRESHOLD)?;
        let objects: Vec<ObjectBox> = proposals
            .into_iter()
            .map(|p| to_object(p, DetectionPass::Coarse))
            .collect();

        debug!(shot = %ctx.shot.shot_id, count = objects.len(), "coarse object pass");

        let provenance = Provenance::new(
            self.provider.name(),
            self.provider.version(),
            Some(self.provider.checkpoint().to_string()),
            &CoarseParams {
                model: self.provider.name(),
                conf: CONF_THRESHOLD,
                iou: NMS_IOU,
            },
        );
        Ok(Detection::new(DetectorPayload::Objects(objects), provenance))
    }
}

/// Tiled multi-scale object pass. Tiles the native frame (and, unless the
/// ladder restricted it, a half-resolution copy) so small objects down to the
/// configured minimum stay detectable.
pub struct TiledObjectsDetector {
    provider: Arc<dyn VisionProvider>,
}

impl TiledObjectsDetector {
    pub fn new(provider: Arc<dyn VisionProvider>) -> Self {
        Self { provider }
    }

    fn detect_on_tiles(
        &self,
        image: &RgbImage,
        tile: u32,
        stride: u32,
        coord_scale: f64,
    ) -> DetectResult<Vec<ObjectBox>> {
        let mut objects = Vec::new();
        for t in tile_grid(image.width(), image.height(), tile, stride) {
            let view = image::imageops::crop_imm(image, t.x, t.y, t.w, t.h).to_image();
            for p in self.provider.propose(&view, CONF_THRESHOLD)? {
                let mut bbox = p.bbox;
                bbox[0] = (bbox[0] + t.x as f64) * coord_scale;
                bbox[1] = (bbox[1] + t.y as f64) * coord_scale;
                bbox[2] = (bbox[2] + t.x as f64) * coord_scale;
                bbox[3] = (bbox[3] + t.y as f64) * coord_scale;
                objects.push(to_object(Proposal { bbox, ..p }, DetectionPass::Tiled));
            }
        }
        Ok(objects)
    }
}

#[derive(Serialize)]
struct TiledParams<'a> {
    model: &'a str,
    tile_size: u32,
    stride: u32,
    single_scale: bool,
    conf: f64,
}

#[async_trait]
impl Detector for TiledObjectsDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ObjectsTiled
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let tile_cfg = &ctx.cfg.detect.tile;
        let image = load_mid_frame(ctx)?;

        let mut objects =
            self.detect_on_tiles(&image, tile_cfg.size, tile_cfg.stride, 1.0)?;

        if !tile_cfg.single_scale && image.width() >= 2 && image.height() >= 2 {
            let half = image::imageops::resize(
                &image,
                image.width() / 2,
                image.height() / 2,
                image::imageops::FilterType::Triangle,
            );
            objects.extend(self.detect_on_tiles(&half, tile_cfg.size, tile_cfg.stride, 2.0)?);
        }

        debug!(shot = %ctx.shot.shot_id, count = objects.len(), "tiled object pass");

        let provenance = Provenance::new(
            format!("tile_{}", self.provider.name()),
            self.provider.version(),
            Some(self.provider.checkpoint().to_string()),
            &TiledParams {
                model: self.provider.name(),
                tile_size: tile_cfg.size,
                stride: tile_cfg.stride,
                single_scale: tile_cfg.single_scale,
                conf: CONF_THRESHOLD,
            },
        );
        Ok(Detection::new(DetectorPayload::Objects(objects), provenance))
    }
}

/// Fine object pass over the super-resolved middle frame. Runs only on
/// regions that survived the coarse+tiled NMS; detections map back to source
/// coordinates by the SR scale factor.
pub struct FineObjectsDetector {
    provider: Arc<dyn VisionProvider>,
}

impl FineObjectsDetector {
    pub fn new(provider: Arc<dyn VisionProvider>) -> Self {
        Self { provider }
    }
}

#[derive(Serialize)]
struct FineParams<'a> {
    model: &'a str,
    scale: u32,
    conf: f64,
}

#[async_trait]
impl Detector for FineObjectsDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ObjectsFine
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let provenance = Provenance::new(
            format!("fine_{}", self.provider.name()),
            self.provider.version(),
            Some(self.provider.checkpoint().to_string()),
            &FineParams {
                model: self.provider.name(),
                scale: super::superres::SR_SCALE,
                conf: CONF_THRESHOLD,
            },
        );

        // Nothing to refine when SR did not run for this shot.
        let Some(sr_path) = ctx.chain.sr_frame.as_deref() else {
            return Ok(Detection::new(DetectorPayload::Objects(Vec::new()), provenance));
        };

        let sr_image =
            frames::load_rgb(sr_path).map_err(|e| DetectError::input_defect(e.to_string()))?;
        let scale = super::superres::SR_SCALE as f64;

        let mut objects = Vec::new();
        for p in self.provider.propose(&sr_image, CONF_THRESHOLD)? {
            let bbox = [
                p.bbox[0] / scale,
                p.bbox[1] / scale,
                p.bbox[2] / scale,
                p.bbox[3] / scale,
            ];
            // Keep only proposals that refine a surviving region.
            let refines_existing = ctx
                .chain
                .objects
                .iter()
                .any(|o| vab_models::iou(&o.bbox, &bbox) > 0.1);
            if refines_existing {
                objects.push(to_object(Proposal { bbox, ..p }, DetectionPass::Fine));
            }
        }

        debug!(shot = %ctx.shot.shot_id, count = objects.len(), "fine object pass");
        Ok(Detection::new(DetectorPayload::Objects(objects), provenance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_to_object_computes_area() {
        let obj = to_object(
            Proposal {
                bbox: [10.0, 20.0, 30.0, 60.0],
                conf: 0.5,
                class_id: 0,
                label: "person".to_string(),
            },
            DetectionPass::Coarse,
        );
        assert_eq!(obj.area, 20.0 * 40.0);
        assert_eq!(obj.pass, DetectionPass::Coarse);
    }
}
