//! Motion and saliency analysis.

use async_trait::async_trait;
use image::GrayImage;
use serde::Serialize;

use vab_models::{DetectorKind, DetectorPayload, MotionStats, Provenance, SaliencyStats};

use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

const PROC_EDGE: u32 = 128;
const MAX_SHIFT: i64 = 12;

#[derive(Debug, Default)]
pub struct MotionSaliencyDetector;

#[derive(Serialize)]
struct MotionParams {
    flow_method: &'static str,
    saliency_method: &'static str,
}

/// Row/column intensity profiles of a luma image.
fn projections(img: &GrayImage) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = img.dimensions();
    let mut cols = vec![0.0f64; w as usize];
    let mut rows = vec![0.0f64; h as usize];
    for (x, y, p) in img.enumerate_pixels() {
        cols[x as usize] += p.0[0] as f64;
        rows[y as usize] += p.0[0] as f64;
    }
    for c in cols.iter_mut() {
        *c /= h as f64;
    }
    for r in rows.iter_mut() {
        *r /= w as f64;
    }
    (cols, rows)
}

/// Best 1-D shift of `b` against `a` by minimal mean absolute difference.
fn best_shift(a: &[f64], b: &[f64]) -> i64 {
    let n = a.len() as i64;
    let mut best = 0i64;
    let mut best_err = f64::MAX;
    for shift in -MAX_SHIFT..=MAX_SHIFT {
        let mut err = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            let j = i + shift;
            if j < 0 || j >= n {
                continue;
            }
            err += (a[i as usize] - b[j as usize]).abs();
            count += 1;
        }
        if count == 0 {
            continue;
        }
        err /= count as f64;
        if err < best_err {
            best_err = err;
            best = shift;
        }
    }
    best
}

/// Estimate the dominant translation between two frames via projection
/// correlation, in source-frame pixels.
fn estimate_flow(first: &GrayImage, second: &GrayImage, source_width: u32) -> (f64, f64) {
    let a = frames::downscale(first, PROC_EDGE);
    let b = frames::downscale(second, PROC_EDGE);
    if a.dimensions() != b.dimensions() {
        return (0.0, 0.0);
    }
    let (a_cols, a_rows) = projections(&a);
    let (b_cols, b_rows) = projections(&b);

    let scale = source_width as f64 / a.width().max(1) as f64;
    let dx = best_shift(&a_cols, &b_cols) as f64 * scale;
    let dy = best_shift(&a_rows, &b_rows) as f64 * scale;
    (dx, dy)
}

fn classify_motion(dx: f64, dy: f64) -> MotionStats {
    let magnitude = (dx * dx + dy * dy).sqrt();
    let motion_type = if magnitude <= 2.0 {
        "static"
    } else if dx.abs() > dy.abs() * 2.0 {
        "pan_horizontal"
    } else if dy.abs() > dx.abs() * 2.0 {
        "pan_vertical"
    } else {
        "complex"
    };
    MotionStats {
        camera_motion: magnitude > 1.0,
        motion_type: motion_type.to_string(),
        avg_flow: [
            (dx * 1000.0).round() / 1000.0,
            (dy * 1000.0).round() / 1000.0,
        ],
        magnitude: (magnitude * 1000.0).round() / 1000.0,
    }
}

/// Center-surround saliency on an 8px block grid: blocks far from the global
/// mean luma are salient.
fn saliency(img: &GrayImage) -> SaliencyStats {
    const BLOCK: u32 = 8;
    let small = frames::downscale(img, 256);
    let (w, h) = small.dimensions();
    let bw = (w / BLOCK).max(1);
    let bh = (h / BLOCK).max(1);

    let global_mean = frames::mean_brightness(&small) * 255.0;

    let mut scores = vec![0.0f64; (bw * bh) as usize];
    for by in 0..bh {
        for bx in 0..bw {
            let mut sum = 0.0;
            let mut count = 0u32;
            for y in by * BLOCK..((by + 1) * BLOCK).min(h) {
                for x in bx * BLOCK..((bx + 1) * BLOCK).min(w) {
                    sum += small.get_pixel(x, y).0[0] as f64;
                    count += 1;
                }
            }
            let mean = if count > 0 { sum / count as f64 } else { 0.0 };
            scores[(by * bw + bx) as usize] = (mean - global_mean).abs() / 255.0;
        }
    }

    // Threshold at the 95th percentile.
    let mut sorted = scores.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
    let p95 = sorted[idx];

    let mut cx = 0.0;
    let mut cy = 0.0;
    let mut salient = 0usize;
    for by in 0..bh {
        for bx in 0..bw {
            // Strictly above the p95 cutoff, so a uniform frame has no
            // salient blocks at all.
            if scores[(by * bw + bx) as usize] > p95 {
                cx += bx as f64 + 0.5;
                cy += by as f64 + 0.5;
                salient += 1;
            }
        }
    }
    let (center_x, center_y) = if salient > 0 {
        (cx / salient as f64 / bw as f64, cy / salient as f64 / bh as f64)
    } else {
        (0.5, 0.5)
    };

    SaliencyStats {
        salient_center: [
            (center_x * 1000.0).round() / 1000.0,
            (center_y * 1000.0).round() / 1000.0,
        ],
        salient_area_pct: (salient as f64 / scores.len() as f64 * 10000.0).round() / 100.0,
        avg_saliency: (scores.iter().sum::<f64>() / scores.len() as f64 * 1000.0).round() / 1000.0,
    }
}

#[async_trait]
impl Detector for MotionSaliencyDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Motion
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        if ctx.shot.frame_paths.len() < 2 {
            return Err(DetectError::input_defect(
                "motion analysis needs at least two frames",
            ));
        }
        let first_path = ctx.shot.first_frame().expect("checked above");
        let mid_path = ctx.mid_frame()?;

        let first =
            frames::load_luma(first_path).map_err(|e| DetectError::input_defect(e.to_string()))?;
        let mid =
            frames::load_luma(mid_path).map_err(|e| DetectError::input_defect(e.to_string()))?;

        let (dx, dy) = estimate_flow(&first, &mid, first.width());
        let motion = classify_motion(dx, dy);
        let saliency = saliency(&mid);

        let provenance = Provenance::new(
            "flow_saliency",
            "4.8.0",
            None,
            &MotionParams {
                flow_method: "projection_correlation",
                saliency_method: "center_surround",
            },
        );
        Ok(Detection::new(
            DetectorPayload::Motion { motion, saliency },
            provenance,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(w: u32, h: u32, offset: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let v = (((x + offset) / 8 + y / 8) % 2) as u8 * 200 + 20;
            Luma([v])
        })
    }

    #[test]
    fn static_frames_classified_static() {
        let a = textured(128, 96, 0);
        let (dx, dy) = estimate_flow(&a, &a, 128);
        let motion = classify_motion(dx, dy);
        assert_eq!(motion.motion_type, "static");
        assert!(!motion.camera_motion);
    }

    #[test]
    fn horizontal_shift_reads_as_pan() {
        let a = textured(256, 96, 0);
        let b = textured(256, 96, 16);
        let (dx, dy) = estimate_flow(&a, &b, 256);
        let motion = classify_motion(dx, dy);
        assert!(motion.camera_motion);
        assert_eq!(motion.motion_type, "pan_horizontal");
        assert!(dy.abs() < dx.abs());
    }

    #[test]
    fn saliency_finds_bright_patch() {
        let mut img = GrayImage::from_pixel(256, 192, Luma([20]));
        for y in 0..40u32 {
            for x in 200..256u32 {
                img.put_pixel(x, y, Luma([250]));
            }
        }
        let s = saliency(&img);
        // Bright patch sits top-right.
        assert!(s.salient_center[0] > 0.5);
        assert!(s.salient_center[1] < 0.5);
        assert!(s.salient_area_pct > 0.0);
    }
}
