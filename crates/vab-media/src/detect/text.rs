//! Text and typography adapter.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use vab_models::{DetectorKind, DetectorPayload, FontInfo, Provenance, TextRegion};

use crate::detect::providers::TextProvider;
use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

pub struct TextDetector {
    provider: Arc<dyn TextProvider>,
}

impl TextDetector {
    pub fn new(provider: Arc<dyn TextProvider>) -> Self {
        Self { provider }
    }
}

#[derive(Serialize)]
struct TextParams<'a> {
    det_model: &'a str,
    lang: &'a str,
}

/// Estimate typography attributes from the cropped text band.
fn font_properties(image: &RgbImage, bbox: &[f64; 4]) -> FontInfo {
    let x0 = bbox[0].max(0.0) as u32;
    let y0 = bbox[1].max(0.0) as u32;
    let x1 = (bbox[2] as u32).min(image.width());
    let y1 = (bbox[3] as u32).min(image.height());

    let height = y1.saturating_sub(y0);
    let size_est = ((height as f64) * 0.7).max(8.0) as u32;

    // Boldness from the dark-pixel ratio inside the band.
    let mut dark = 0u32;
    let mut total = 0u32;
    for y in y0..y1 {
        for x in x0..x1 {
            let p = image.get_pixel(x, y);
            let luma = (p.0[0] as u32 + p.0[1] as u32 + p.0[2] as u32) / 3;
            if luma < 100 {
                dark += 1;
            }
            total += 1;
        }
    }
    let is_bold = total > 0 && dark as f64 / total as f64 > 0.6;

    FontInfo {
        family: "sans-serif".to_string(),
        size_est,
        is_bold,
        is_italic: false,
    }
}

#[async_trait]
impl Detector for TextDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Text
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let path = ctx.mid_frame()?;
        let image = frames::load_rgb(path).map_err(|e| DetectError::input_defect(e.to_string()))?;

        let regions: Vec<TextRegion> = self
            .provider
            .propose_text(&image)?
            .into_iter()
            .map(|p| {
                let font = font_properties(&image, &p.bbox);
                TextRegion {
                    text: p.label,
                    conf: p.conf,
                    bbox: p.bbox,
                    font,
                }
            })
            .collect();

        debug!(shot = %ctx.shot.shot_id, count = regions.len(), "text detection");

        let provenance = Provenance::new(
            self.provider.name(),
            self.provider.version(),
            Some(self.provider.checkpoint().to_string()),
            &TextParams {
                det_model: self.provider.name(),
                lang: "en",
            },
        );
        Ok(Detection::new(DetectorPayload::Text(regions), provenance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn font_size_tracks_band_height() {
        let img = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let info = font_properties(&img, &[0.0, 50.0, 100.0, 70.0]);
        assert_eq!(info.size_est, 14); // 20px band * 0.7
        assert!(!info.is_bold);
    }

    #[test]
    fn dark_band_reads_as_bold() {
        let img = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        let info = font_properties(&img, &[0.0, 0.0, 100.0, 20.0]);
        assert!(info.is_bold);
    }
}
