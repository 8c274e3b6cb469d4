//! Non-maximum suppression across detection passes.

use vab_models::ObjectBox;

/// Suppress overlapping boxes by IoU. Ties are broken by highest confidence,
/// then by earliest pass (coarse before tiled before fine).
pub fn nms(mut detections: Vec<ObjectBox>, iou_threshold: f64) -> Vec<ObjectBox> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.conf
            .partial_cmp(&a.conf)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.pass.cmp(&b.pass))
    });

    let mut keep: Vec<ObjectBox> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = keep.iter().any(|k| k.iou(&det) > iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

/// Drop boxes whose smaller edge is below the detectable minimum.
pub fn filter_small(detections: Vec<ObjectBox>, min_px: u32) -> Vec<ObjectBox> {
    let min = min_px as f64;
    detections
        .into_iter()
        .filter(|d| d.width() >= min && d.height() >= min)
        .collect()
}
