//! Frame loading and shared pixel math.
//!
//! Every detector that looks at pixels goes through these helpers so frame
//! handling (decode, downscale, luma conversion) happens one way.

use std::path::Path;

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};

use crate::error::{MediaError, MediaResult};

/// Load a frame as RGB.
pub fn load_rgb(path: &Path) -> MediaResult<RgbImage> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    Ok(image::open(path)?.to_rgb8())
}

/// Load a frame as 8-bit luma.
pub fn load_luma(path: &Path) -> MediaResult<GrayImage> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    Ok(image::open(path)?.to_luma8())
}

/// Downscale so the longest edge is at most `max_edge`, preserving aspect.
pub fn downscale(img: &GrayImage, max_edge: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let edge = w.max(h);
    if edge <= max_edge {
        return img.clone();
    }
    let scale = max_edge as f64 / edge as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    image::imageops::resize(img, nw, nh, FilterType::Triangle)
}

/// Mean luma in [0, 1].
pub fn mean_brightness(img: &GrayImage) -> f64 {
    if img.is_empty() {
        return 0.0;
    }
    let sum: u64 = img.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / (img.len() as f64 * 255.0)
}

/// Luma standard deviation (contrast).
pub fn luma_stddev(img: &GrayImage) -> f64 {
    if img.is_empty() {
        return 0.0;
    }
    let n = img.len() as f64;
    let mean: f64 = img.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    let var: f64 = img
        .pixels()
        .map(|p| {
            let d = p.0[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt()
}

/// Mean HSV saturation in [0, 1].
pub fn mean_saturation(img: &RgbImage) -> f64 {
    let n = (img.width() as u64 * img.height() as u64) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for p in img.pixels() {
        let max = p.0.iter().copied().max().unwrap_or(0) as f64;
        let min = p.0.iter().copied().min().unwrap_or(0) as f64;
        if max > 0.0 {
            sum += (max - min) / max;
        }
    }
    sum / n
}

/// Normalized 64-bin luma histogram.
pub fn luma_histogram(img: &GrayImage) -> [f64; 64] {
    let mut hist = [0f64; 64];
    if img.is_empty() {
        return hist;
    }
    for p in img.pixels() {
        hist[(p.0[0] / 4) as usize] += 1.0;
    }
    let total = img.pixels().len() as f64;
    for bin in hist.iter_mut() {
        *bin /= total;
    }
    hist
}

/// Histogram intersection similarity in [0, 1].
pub fn histogram_intersection(a: &[f64; 64], b: &[f64; 64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.min(*y)).sum()
}

/// Windowed structural similarity between two equally sized luma images.
///
/// 8x8 windows, standard SSIM constants; the per-window scores are averaged.
pub fn ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    const C1: f64 = 6.5025; // (0.01 * 255)^2
    const C2: f64 = 58.5225; // (0.03 * 255)^2
    const WIN: u32 = 8;

    let (w, h) = a.dimensions();
    if b.dimensions() != (w, h) || w < WIN || h < WIN {
        return 0.0;
    }

    let mut total = 0.0f64;
    let mut windows = 0usize;

    for wy in (0..h - WIN + 1).step_by(WIN as usize) {
        for wx in (0..w - WIN + 1).step_by(WIN as usize) {
            let n = (WIN * WIN) as f64;
            let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for dy in 0..WIN {
                for dx in 0..WIN {
                    let pa = a.get_pixel(wx + dx, wy + dy).0[0] as f64;
                    let pb = b.get_pixel(wx + dx, wy + dy).0[0] as f64;
                    sa += pa;
                    sb += pb;
                    saa += pa * pa;
                    sbb += pb * pb;
                    sab += pa * pb;
                }
            }
            let mu_a = sa / n;
            let mu_b = sb / n;
            let var_a = (saa / n - mu_a * mu_a).max(0.0);
            let var_b = (sbb / n - mu_b * mu_b).max(0.0);
            let cov = sab / n - mu_a * mu_b;

            let score = ((2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2))
                / ((mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2));
            total += score;
            windows += 1;
        }
    }

    if windows == 0 {
        0.0
    } else {
        (total / windows as f64).clamp(-1.0, 1.0)
    }
}

/// Per-pixel Sobel edge magnitude, normalized to [0, 1].
pub fn edge_map(img: &GrayImage) -> Vec<f64> {
    let gx = imageproc::gradients::horizontal_sobel(img);
    let gy = imageproc::gradients::vertical_sobel(img);
    gx.pixels()
        .zip(gy.pixels())
        .map(|(x, y)| {
            let dx = x.0[0] as f64;
            let dy = y.0[0] as f64;
            ((dx * dx + dy * dy).sqrt() / 1448.0).min(1.0) // 4*255*sqrt(2)
        })
        .collect()
}

/// Mean edge magnitude of a rectangular region of a precomputed edge map.
pub fn region_edge_density(
    edges: &[f64],
    width: u32,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for y in y0..y1 {
        for x in x0..x1 {
            if let Some(v) = edges.get((y * width + x) as usize) {
                sum += v;
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn flat(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| Luma([(x * 255 / w.max(1)) as u8]))
    }

    #[test]
    fn brightness_of_flat_images() {
        assert_eq!(mean_brightness(&flat(16, 16, 0)), 0.0);
        assert!((mean_brightness(&flat(16, 16, 255)) - 1.0).abs() < 1e-9);
        assert!((mean_brightness(&flat(16, 16, 128)) - 0.502).abs() < 0.01);
    }

    #[test]
    fn contrast_zero_for_flat() {
        assert_eq!(luma_stddev(&flat(16, 16, 77)), 0.0);
        assert!(luma_stddev(&gradient(64, 16)) > 10.0);
    }

    #[test]
    fn ssim_identical_is_one() {
        let img = gradient(64, 64);
        assert!((ssim(&img, &img) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ssim_inverted_is_low() {
        let img = gradient(64, 64);
        let inv = GrayImage::from_fn(64, 64, |x, y| {
            Luma([255 - img.get_pixel(x, y).0[0]])
        });
        assert!(ssim(&img, &inv) < 0.3);
    }

    #[test]
    fn ssim_size_mismatch_is_zero() {
        assert_eq!(ssim(&flat(32, 32, 10), &flat(16, 16, 10)), 0.0);
    }

    #[test]
    fn histogram_intersection_bounds() {
        let a = luma_histogram(&flat(16, 16, 10));
        let b = luma_histogram(&flat(16, 16, 200));
        assert!((histogram_intersection(&a, &a) - 1.0).abs() < 1e-9);
        assert!(histogram_intersection(&a, &b) < 1e-9);
    }

    #[test]
    fn downscale_respects_max_edge() {
        let img = flat(640, 360, 5);
        let small = downscale(&img, 128);
        assert!(small.width().max(small.height()) <= 128);
        // Aspect preserved within rounding.
        let ratio = small.width() as f64 / small.height() as f64;
        assert!((ratio - 640.0 / 360.0).abs() < 0.1);
    }
}
