//! Mask refinement over surviving detections.
//!
//! Stand-in for a promptable segmenter: each surviving box is tightened to
//! the smallest sub-rectangle holding the bulk of the box's edge energy.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use vab_models::{DetectorKind, DetectorPayload, ObjectBox, Provenance};

use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

const MIN_AREA_PX: f64 = 64.0;
const KEEP_ENERGY: f64 = 0.9;

#[derive(Debug, Default)]
pub struct MaskRefineDetector;

#[derive(Serialize)]
struct MaskParams {
    method: &'static str,
    min_area: f64,
    keep_energy: f64,
}

/// Shrink `bbox` along each axis until only the rows/columns holding
/// `KEEP_ENERGY` of the edge energy remain.
fn tighten(edges: &[f64], width: u32, height: u32, bbox: &[f64; 4]) -> Option<[f64; 4]> {
    let x0 = bbox[0].max(0.0) as u32;
    let y0 = bbox[1].max(0.0) as u32;
    let x1 = (bbox[2] as u32).min(width);
    let y1 = (bbox[3] as u32).min(height);
    if x1 <= x0 + 1 || y1 <= y0 + 1 {
        return None;
    }

    let col_energy: Vec<f64> = (x0..x1)
        .map(|x| frames::region_edge_density(edges, width, x, y0, x + 1, y1))
        .collect();
    let row_energy: Vec<f64> = (y0..y1)
        .map(|y| frames::region_edge_density(edges, width, x0, y, x1, y + 1))
        .collect();

    let trim = |energy: &[f64]| -> (usize, usize) {
        let total: f64 = energy.iter().sum();
        if total <= 0.0 {
            return (0, energy.len());
        }
        let budget = total * (1.0 - KEEP_ENERGY) / 2.0;
        let mut lo = 0usize;
        let mut acc = 0.0;
        while lo < energy.len() && acc + energy[lo] < budget {
            acc += energy[lo];
            lo += 1;
        }
        let mut hi = energy.len();
        acc = 0.0;
        while hi > lo + 1 && acc + energy[hi - 1] < budget {
            acc += energy[hi - 1];
            hi -= 1;
        }
        (lo, hi)
    };

    let (cx0, cx1) = trim(&col_energy);
    let (ry0, ry1) = trim(&row_energy);

    Some([
        (x0 + cx0 as u32) as f64,
        (y0 + ry0 as u32) as f64,
        (x0 + cx1 as u32) as f64,
        (y0 + ry1 as u32) as f64,
    ])
}

#[async_trait]
impl Detector for MaskRefineDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::MaskRefine
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let provenance = Provenance::new(
            "mask_refine",
            "2.0",
            Some("edge_trim".to_string()),
            &MaskParams {
                method: "edge_trim",
                min_area: MIN_AREA_PX,
                keep_energy: KEEP_ENERGY,
            },
        );

        if ctx.chain.objects.is_empty() {
            return Ok(Detection::new(DetectorPayload::Objects(Vec::new()), provenance));
        }

        let path = ctx.mid_frame()?;
        let luma =
            frames::load_luma(path).map_err(|e| DetectError::input_defect(e.to_string()))?;
        let (width, height) = luma.dimensions();
        let edges = frames::edge_map(&luma);

        let mut refined: Vec<ObjectBox> = Vec::with_capacity(ctx.chain.objects.len());
        let mut refined_count = 0usize;
        for obj in &ctx.chain.objects {
            let mut obj = obj.clone();
            if obj.area >= MIN_AREA_PX {
                if let Some(tight) = tighten(&edges, width, height, &obj.bbox) {
                    obj.bbox = tight;
                    obj.area = obj.width() * obj.height();
                    obj.has_refined_mask = true;
                    refined_count += 1;
                }
            }
            refined.push(obj);
        }

        debug!(
            shot = %ctx.shot.shot_id,
            refined = refined_count,
            total = refined.len(),
            "mask refinement"
        );
        Ok(Detection::new(DetectorPayload::Objects(refined), provenance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn tighten_shrinks_to_textured_core() {
        // Texture only in the middle third of a 60x60 box.
        let mut img = GrayImage::from_pixel(100, 100, Luma([0]));
        for y in 40..60u32 {
            for x in 40..60u32 {
                if (x + y) % 2 == 0 {
                    img.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let edges = frames::edge_map(&img);
        let tight = tighten(&edges, 100, 100, &[20.0, 20.0, 80.0, 80.0]).unwrap();
        // The tightened box pulls in toward the textured region.
        assert!(tight[0] >= 20.0 && tight[0] <= 45.0);
        assert!(tight[2] <= 80.0 && tight[2] >= 55.0);
        assert!(tight[0] > 20.0 || tight[1] > 20.0 || tight[2] < 80.0 || tight[3] < 80.0);
    }

    #[test]
    fn tighten_rejects_degenerate_boxes() {
        let img = GrayImage::from_pixel(10, 10, Luma([0]));
        let edges = frames::edge_map(&img);
        assert!(tighten(&edges, 10, 10, &[5.0, 5.0, 5.5, 5.5]).is_none());
    }
}
