//! Pluggable model backends behind provider traits.
//!
//! The adapters in this module tree are thin: geometry, coordinate mapping
//! and provenance live in the adapter, while the actual proposal machinery
//! sits behind these traits. The default implementations are deterministic
//! analytic stand-ins (block saliency, chroma rules, gradient profiles); an
//! ONNX- or service-backed provider plugs in behind the same trait and its
//! identity flows into provenance via `name`/`checkpoint`/`version`.

use image::{GrayImage, RgbImage};

use crate::detect::DetectResult;
use crate::frames;

/// A raw box proposal from a vision backend, in source-image pixels.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub bbox: [f64; 4],
    pub conf: f64,
    pub class_id: u32,
    pub label: String,
}

/// Object-proposal backend used by every object pass.
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn checkpoint(&self) -> &'static str;

    /// Propose object regions with confidence at or above `conf_threshold`.
    fn propose(&self, image: &RgbImage, conf_threshold: f64) -> DetectResult<Vec<Proposal>>;
}

/// Face-box backend.
pub trait FaceProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn checkpoint(&self) -> &'static str;

    fn propose_faces(&self, image: &RgbImage) -> DetectResult<Vec<Proposal>>;
}

/// Text-region backend.
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn checkpoint(&self) -> &'static str;

    fn propose_text(&self, image: &RgbImage) -> DetectResult<Vec<Proposal>>;
}

// ============================================================================
// Default analytic providers
// ============================================================================

const BLOCK: u32 = 8;
const PROC_EDGE: u32 = 192;

/// Saliency-block object proposals: high edge-energy blocks are grouped into
/// connected regions and returned as boxes.
#[derive(Debug, Default)]
pub struct BlockSaliencyProvider;

impl BlockSaliencyProvider {
    fn block_energy(luma: &GrayImage) -> (Vec<f64>, u32, u32) {
        let edges = frames::edge_map(luma);
        let (w, h) = luma.dimensions();
        let bw = (w / BLOCK).max(1);
        let bh = (h / BLOCK).max(1);

        let mut energy = vec![0.0f64; (bw * bh) as usize];
        for by in 0..bh {
            for bx in 0..bw {
                energy[(by * bw + bx) as usize] = frames::region_edge_density(
                    &edges,
                    w,
                    bx * BLOCK,
                    by * BLOCK,
                    ((bx + 1) * BLOCK).min(w),
                    ((by + 1) * BLOCK).min(h),
                );
            }
        }
        (energy, bw, bh)
    }
}

/// Group adjacent above-threshold cells into bounding boxes on the cell grid.
/// Returns `(x0, y0, x1, y1, mean_score)` per component, in cell units.
fn connected_components(
    scores: &[f64],
    grid_w: u32,
    grid_h: u32,
    threshold: f64,
) -> Vec<(u32, u32, u32, u32, f64)> {
    let mut visited = vec![false; scores.len()];
    let mut components = Vec::new();

    for start in 0..scores.len() {
        if visited[start] || scores[start] < threshold {
            continue;
        }
        let mut stack = vec![start];
        visited[start] = true;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
        let mut total = 0.0;
        let mut count = 0usize;

        while let Some(idx) = stack.pop() {
            let x = idx as u32 % grid_w;
            let y = idx as u32 / grid_w;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            total += scores[idx];
            count += 1;

            let mut push = |nx: i64, ny: i64| {
                if nx < 0 || ny < 0 || nx >= grid_w as i64 || ny >= grid_h as i64 {
                    return;
                }
                let nidx = (ny as u32 * grid_w + nx as u32) as usize;
                if !visited[nidx] && scores[nidx] >= threshold {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            push(x as i64 - 1, y as i64);
            push(x as i64 + 1, y as i64);
            push(x as i64, y as i64 - 1);
            push(x as i64, y as i64 + 1);
        }

        components.push((min_x, min_y, max_x + 1, max_y + 1, total / count as f64));
    }
    components
}

impl VisionProvider for BlockSaliencyProvider {
    fn name(&self) -> &'static str {
        "block_saliency"
    }

    fn version(&self) -> &'static str {
        "1.2.0"
    }

    fn checkpoint(&self) -> &'static str {
        "analytic"
    }

    fn propose(&self, image: &RgbImage, conf_threshold: f64) -> DetectResult<Vec<Proposal>> {
        let luma = image::imageops::grayscale(image);
        let small = frames::downscale(&luma, PROC_EDGE);
        let (energy, bw, bh) = Self::block_energy(&small);

        let mean = energy.iter().sum::<f64>() / energy.len().max(1) as f64;
        let var = energy.iter().map(|e| (e - mean) * (e - mean)).sum::<f64>()
            / energy.len().max(1) as f64;
        let std = var.sqrt();
        // A near-uniform frame has nothing to propose.
        if std < 1e-4 {
            return Ok(Vec::new());
        }
        let threshold = mean + std;

        let scale_x = image.width() as f64 / small.width() as f64;
        let scale_y = image.height() as f64 / small.height() as f64;

        let mut proposals = Vec::new();
        for (x0, y0, x1, y1, score) in connected_components(&energy, bw, bh, threshold) {
            // Confidence from how far the region sits above the scene mean.
            let conf = ((score - mean) / (threshold - mean + 1e-6)).clamp(0.0, 1.0) * 0.6 + 0.2;
            if conf < conf_threshold {
                continue;
            }
            let bbox = [
                x0 as f64 * BLOCK as f64 * scale_x,
                y0 as f64 * BLOCK as f64 * scale_y,
                (x1 as f64 * BLOCK as f64 * scale_x).min(image.width() as f64),
                (y1 as f64 * BLOCK as f64 * scale_y).min(image.height() as f64),
            ];
            let w = bbox[2] - bbox[0];
            let h = bbox[3] - bbox[1];
            let label = if h > 1.5 * w {
                "person"
            } else if w > 2.5 * h {
                "banner"
            } else {
                "object"
            };
            proposals.push(Proposal {
                bbox,
                conf,
                class_id: match label {
                    "person" => 0,
                    "banner" => 1,
                    _ => 2,
                },
                label: label.to_string(),
            });
        }
        Ok(proposals)
    }
}

/// Chroma-rule face proposals: skin-probability blocks grouped into
/// square-ish regions.
#[derive(Debug, Default)]
pub struct ChromaFaceProvider;

fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (rf, gf, bf) = (r as i32, g as i32, b as i32);
    rf > 95 && gf > 40 && bf > 20 && rf > gf && rf > bf && (rf - gf).abs() > 15
}

impl FaceProvider for ChromaFaceProvider {
    fn name(&self) -> &'static str {
        "chroma_face"
    }

    fn version(&self) -> &'static str {
        "1.0.1"
    }

    fn checkpoint(&self) -> &'static str {
        "analytic"
    }

    fn propose_faces(&self, image: &RgbImage) -> DetectResult<Vec<Proposal>> {
        let (w, h) = image.dimensions();
        if w < BLOCK || h < BLOCK {
            return Ok(Vec::new());
        }
        let bw = w / BLOCK;
        let bh = h / BLOCK;

        let mut skin_ratio = vec![0.0f64; (bw * bh) as usize];
        for by in 0..bh {
            for bx in 0..bw {
                let mut hits = 0u32;
                for y in by * BLOCK..(by + 1) * BLOCK {
                    for x in bx * BLOCK..(bx + 1) * BLOCK {
                        let p = image.get_pixel(x, y);
                        if is_skin(p.0[0], p.0[1], p.0[2]) {
                            hits += 1;
                        }
                    }
                }
                skin_ratio[(by * bw + bx) as usize] = hits as f64 / (BLOCK * BLOCK) as f64;
            }
        }

        let mut proposals = Vec::new();
        for (x0, y0, x1, y1, score) in connected_components(&skin_ratio, bw, bh, 0.5) {
            let bw_px = (x1 - x0) * BLOCK;
            let bh_px = (y1 - y0) * BLOCK;
            // Faces are roughly square; reject extreme aspect ratios.
            let aspect = bw_px as f64 / bh_px.max(1) as f64;
            if !(0.4..=2.0).contains(&aspect) {
                continue;
            }
            proposals.push(Proposal {
                bbox: [
                    (x0 * BLOCK) as f64,
                    (y0 * BLOCK) as f64,
                    (x1 * BLOCK).min(w) as f64,
                    (y1 * BLOCK).min(h) as f64,
                ],
                conf: (score * 0.9).clamp(0.0, 1.0),
                class_id: 0,
                label: "face".to_string(),
            });
        }
        Ok(proposals)
    }
}

/// Gradient-profile text proposals: rows dense in horizontal gradients are
/// merged into caption-like line boxes.
#[derive(Debug, Default)]
pub struct GradientTextProvider;

impl TextProvider for GradientTextProvider {
    fn name(&self) -> &'static str {
        "gradient_text"
    }

    fn version(&self) -> &'static str {
        "1.1.0"
    }

    fn checkpoint(&self) -> &'static str {
        "analytic"
    }

    fn propose_text(&self, image: &RgbImage) -> DetectResult<Vec<Proposal>> {
        let luma = image::imageops::grayscale(image);
        let (w, h) = luma.dimensions();
        if w < 16 || h < 16 {
            return Ok(Vec::new());
        }
        let edges = frames::edge_map(&luma);

        // Per-row edge density.
        let row_density: Vec<f64> = (0..h)
            .map(|y| frames::region_edge_density(&edges, w, 0, y, w, y + 1))
            .collect();
        let mean = row_density.iter().sum::<f64>() / h as f64;
        let threshold = (mean * 2.2).max(0.08);

        // Merge consecutive dense rows into bands.
        let mut proposals = Vec::new();
        let mut band_start: Option<u32> = None;
        for y in 0..=h {
            let dense = y < h && row_density[y as usize] >= threshold;
            match (dense, band_start) {
                (true, None) => band_start = Some(y),
                (false, Some(start)) => {
                    let height = y - start;
                    // Text bands are thin relative to the frame.
                    if height >= 6 && height <= h / 4 {
                        let (x0, x1) = band_extent(&edges, w, start, y, threshold);
                        if x1 > x0 {
                            proposals.push(Proposal {
                                bbox: [x0 as f64, start as f64, x1 as f64, y as f64],
                                conf: 0.6,
                                class_id: 0,
                                label: String::new(),
                            });
                        }
                    }
                    band_start = None;
                }
                _ => {}
            }
        }
        Ok(proposals)
    }
}

/// Horizontal extent of the dense columns within a row band.
fn band_extent(edges: &[f64], width: u32, y0: u32, y1: u32, threshold: f64) -> (u32, u32) {
    let mut x0 = width;
    let mut x1 = 0u32;
    for x in 0..width {
        let d = frames::region_edge_density(edges, width, x, y0, x + 1, y1);
        if d >= threshold {
            x0 = x0.min(x);
            x1 = x1.max(x + 1);
        }
    }
    if x0 >= x1 {
        (0, 0)
    } else {
        (x0, x1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn flat_image_yields_no_object_proposals() {
        let img = RgbImage::from_pixel(320, 240, Rgb([120, 120, 120]));
        let proposals = BlockSaliencyProvider
            .propose(&img, 0.2)
            .expect("propose on flat image");
        assert!(proposals.is_empty());
    }

    #[test]
    fn textured_patch_is_proposed() {
        let mut img = RgbImage::from_pixel(320, 240, Rgb([30, 30, 30]));
        // A coarse checkerboard patch in the center keeps its edge energy
        // through the provider's downscale.
        for y in 100..140u32 {
            for x in 140..180u32 {
                if (x / 8 + y / 8) % 2 == 0 {
                    img.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        let proposals = BlockSaliencyProvider.propose(&img, 0.2).unwrap();
        assert!(!proposals.is_empty());
        let p = &proposals[0];
        // The proposal overlaps the textured patch.
        assert!(p.bbox[0] < 180.0 && p.bbox[2] > 140.0);
        assert!(p.bbox[1] < 140.0 && p.bbox[3] > 100.0);
    }

    #[test]
    fn skin_patch_is_proposed_as_face() {
        let mut img = RgbImage::from_pixel(160, 120, Rgb([10, 60, 10]));
        for y in 40..80u32 {
            for x in 60..100u32 {
                img.put_pixel(x, y, Rgb([200, 140, 110]));
            }
        }
        let faces = ChromaFaceProvider.propose_faces(&img).unwrap();
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert!(f.bbox[0] <= 64.0 && f.bbox[2] >= 96.0);
    }

    #[test]
    fn connected_components_split_disjoint_regions() {
        // Two separate hot cells on a 4x1 grid.
        let scores = vec![1.0, 0.0, 0.0, 1.0];
        let comps = connected_components(&scores, 4, 1, 0.5);
        assert_eq!(comps.len(), 2);
    }
}
