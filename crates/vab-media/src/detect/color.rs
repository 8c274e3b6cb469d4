//! Color and composition analysis.

use async_trait::async_trait;
use image::RgbImage;
use serde::Serialize;

use vab_models::{ColorStats, Composition, DetectorKind, DetectorPayload, Provenance};

use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

const N_COLORS: usize = 5;
const KMEANS_ITERS: usize = 10;

#[derive(Debug, Default)]
pub struct ColorDetector;

#[derive(Serialize)]
struct ColorParams {
    n_colors: usize,
    analysis: [&'static str; 4],
}

/// K-means over a pixel sample. Seeds are spread across the sample
/// deterministically, so the same frame always yields the same palette.
fn dominant_colors(image: &RgbImage, k: usize) -> Vec<[u8; 3]> {
    // Sample at most ~4096 pixels on a regular grid.
    let (w, h) = image.dimensions();
    let step = (((w as u64 * h as u64) as f64 / 4096.0).sqrt().ceil() as u32).max(1);
    let samples: Vec<[f64; 3]> = (0..h)
        .step_by(step as usize)
        .flat_map(|y| {
            (0..w).step_by(step as usize).map(move |x| {
                let p = image.get_pixel(x, y);
                [p.0[0] as f64, p.0[1] as f64, p.0[2] as f64]
            })
        })
        .collect();

    if samples.is_empty() {
        return Vec::new();
    }
    let k = k.min(samples.len());

    // Evenly spaced seeds.
    let mut centers: Vec<[f64; 3]> = (0..k)
        .map(|i| samples[i * (samples.len() - 1) / k.max(1)])
        .collect();

    let mut assignment = vec![0usize; samples.len()];
    for _ in 0..KMEANS_ITERS {
        // Assign.
        for (i, s) in samples.iter().enumerate() {
            let mut best = 0usize;
            let mut best_d = f64::MAX;
            for (c, center) in centers.iter().enumerate() {
                let d = (0..3).map(|j| (s[j] - center[j]).powi(2)).sum::<f64>();
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            assignment[i] = best;
        }
        // Update.
        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (i, s) in samples.iter().enumerate() {
            let c = assignment[i];
            for j in 0..3 {
                sums[c][j] += s[j];
            }
            counts[c] += 1;
        }
        for c in 0..k {
            if counts[c] > 0 {
                for j in 0..3 {
                    centers[c][j] = sums[c][j] / counts[c] as f64;
                }
            }
        }
    }

    // Order clusters by population.
    let mut counts = vec![0usize; k];
    for &a in &assignment {
        counts[a] += 1;
    }
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by_key(|&c| std::cmp::Reverse(counts[c]));

    order
        .into_iter()
        .filter(|&c| counts[c] > 0)
        .map(|c| {
            [
                centers[c][0].round() as u8,
                centers[c][1].round() as u8,
                centers[c][2].round() as u8,
            ]
        })
        .collect()
}

/// Rule-of-thirds interest grid from edge density.
fn composition(image: &RgbImage) -> Composition {
    let luma = image::imageops::grayscale(image);
    let small = frames::downscale(&luma, 240);
    let (w, h) = small.dimensions();
    let edges = frames::edge_map(&small);

    let mut grid = [[0.0f64; 3]; 3];
    for (i, row) in grid.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            let y0 = h * i as u32 / 3;
            let y1 = h * (i as u32 + 1) / 3;
            let x0 = w * j as u32 / 3;
            let x1 = w * (j as u32 + 1) / 3;
            *cell = (frames::region_edge_density(&edges, w, x0, y0, x1, y1) * 1000.0).round()
                / 1000.0;
        }
    }

    Composition {
        rule_of_thirds_score: (grid[0][2] + grid[2][0]) / 2.0,
        grid_interest: grid,
    }
}

#[async_trait]
impl Detector for ColorDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Color
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let path = ctx.mid_frame()?;
        let image = frames::load_rgb(path).map_err(|e| DetectError::input_defect(e.to_string()))?;
        let luma = image::imageops::grayscale(&image);

        let stats = ColorStats {
            dominant_colors: dominant_colors(&image, N_COLORS),
            brightness: (frames::mean_brightness(&luma) * 1000.0).round() / 1000.0,
            contrast: (frames::luma_stddev(&luma) * 1000.0).round() / 1000.0,
            saturation: (frames::mean_saturation(&image) * 1000.0).round() / 1000.0,
            composition: composition(&image),
        };

        let provenance = Provenance::new(
            "color_comp",
            "4.8.0",
            None,
            &ColorParams {
                n_colors: N_COLORS,
                analysis: ["brightness", "contrast", "saturation", "composition"],
            },
        );
        Ok(Detection::new(DetectorPayload::Color(stats), provenance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn dominant_colors_of_two_tone_image() {
        let mut img = RgbImage::from_pixel(64, 64, Rgb([255, 0, 0]));
        for y in 0..64u32 {
            for x in 32..64u32 {
                img.put_pixel(x, y, Rgb([0, 0, 255]));
            }
        }
        let colors = dominant_colors(&img, 2);
        assert_eq!(colors.len(), 2);
        // One mostly red, one mostly blue cluster.
        let has_red = colors.iter().any(|c| c[0] > 200 && c[2] < 50);
        let has_blue = colors.iter().any(|c| c[2] > 200 && c[0] < 50);
        assert!(has_red && has_blue, "colors: {:?}", colors);
    }

    #[test]
    fn dominant_colors_deterministic() {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 100]));
        assert_eq!(dominant_colors(&img, 3), dominant_colors(&img, 3));
    }

    #[test]
    fn composition_grid_flags_busy_cell() {
        let mut img = RgbImage::from_pixel(240, 240, Rgb([0, 0, 0]));
        // Texture in the top-right third.
        for y in 0..60u32 {
            for x in 180..240u32 {
                if (x + y) % 2 == 0 {
                    img.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        let comp = composition(&img);
        assert!(comp.grid_interest[0][2] > comp.grid_interest[1][1]);
        assert!(comp.rule_of_thirds_score > 0.0);
    }
}
