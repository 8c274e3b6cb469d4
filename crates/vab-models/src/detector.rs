//! Detector kinds, resource classes and per-detector payload schemas.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::provenance::Provenance;

/// The closed set of detector kinds driven by the scheduler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Full-frame object detection
    ObjectsCoarse,
    /// Tiled multi-scale object detection
    ObjectsTiled,
    /// Conditional 4x super-resolution
    SuperRes,
    /// Fine object pass on upscaled regions
    ObjectsFine,
    /// Mask refinement on surviving detections
    MaskRefine,
    /// Face detection
    Faces,
    /// OCR and typography
    Text,
    /// Color and composition
    Color,
    /// Motion and saliency
    Motion,
    /// Audio engineering metrics
    Audio,
    /// Inter-shot transition classification
    Transition,
    /// Vision-language reasoning
    Reasoning,
}

impl DetectorKind {
    /// All kinds, in scheduler order (GPU chain, then fan-out, then VL).
    pub const ALL: [DetectorKind; 12] = [
        DetectorKind::ObjectsCoarse,
        DetectorKind::ObjectsTiled,
        DetectorKind::SuperRes,
        DetectorKind::ObjectsFine,
        DetectorKind::MaskRefine,
        DetectorKind::Faces,
        DetectorKind::Text,
        DetectorKind::Color,
        DetectorKind::Motion,
        DetectorKind::Audio,
        DetectorKind::Transition,
        DetectorKind::Reasoning,
    ];

    /// Declared admission class of the detector.
    pub fn resource_class(&self) -> ResourceClass {
        match self {
            DetectorKind::ObjectsCoarse
            | DetectorKind::ObjectsTiled
            | DetectorKind::SuperRes
            | DetectorKind::ObjectsFine
            | DetectorKind::MaskRefine => ResourceClass::GpuHeavy,
            DetectorKind::Faces | DetectorKind::Text => ResourceClass::GpuLight,
            DetectorKind::Color
            | DetectorKind::Motion
            | DetectorKind::Audio
            | DetectorKind::Transition => ResourceClass::Cpu,
            // Served over HTTP by an external collaborator.
            DetectorKind::Reasoning => ResourceClass::Io,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::ObjectsCoarse => "objects_coarse",
            DetectorKind::ObjectsTiled => "objects_tiled",
            DetectorKind::SuperRes => "superres",
            DetectorKind::ObjectsFine => "objects_fine",
            DetectorKind::MaskRefine => "mask_refine",
            DetectorKind::Faces => "faces",
            DetectorKind::Text => "text",
            DetectorKind::Color => "color",
            DetectorKind::Motion => "motion",
            DetectorKind::Audio => "audio",
            DetectorKind::Transition => "transition",
            DetectorKind::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission class; determines whether a detector must hold a pool permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    GpuHeavy,
    GpuLight,
    Cpu,
    Io,
}

impl ResourceClass {
    /// Whether this class acquires from the GPU pool before running.
    pub fn needs_gpu_permit(&self) -> bool {
        matches!(self, ResourceClass::GpuHeavy | ResourceClass::GpuLight)
    }
}

/// Which object pass produced a detection. Used as the NMS tie-break after
/// confidence: earlier passes win.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPass {
    Coarse,
    Tiled,
    Fine,
}

/// A detected object.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObjectBox {
    /// Class label
    pub label: String,
    /// Detection confidence [0, 1]
    pub conf: f64,
    /// Bounding box `[x1, y1, x2, y2]` in source-frame pixels
    pub bbox: [f64; 4],
    /// Box area in pixels
    pub area: f64,
    /// Numeric class id of the provider's label set
    pub class_id: u32,
    /// Pass that produced this box
    pub pass: DetectionPass,
    /// Whether mask refinement produced a tightened region
    #[serde(default)]
    pub has_refined_mask: bool,
}

impl ObjectBox {
    pub fn width(&self) -> f64 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &ObjectBox) -> f64 {
        iou(&self.bbox, &other.bbox)
    }
}

/// Intersection-over-union of two `[x1, y1, x2, y2]` boxes.
pub fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// A detected face.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FaceBox {
    pub face_id: String,
    pub conf: f64,
    /// Bounding box `[x1, y1, x2, y2]` in pixels
    pub bbox: [f64; 4],
}

/// Typography attributes estimated for a text region.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FontInfo {
    pub family: String,
    pub size_est: u32,
    pub is_bold: bool,
    pub is_italic: bool,
}

/// A recognized text region.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TextRegion {
    pub text: String,
    pub conf: f64,
    /// Bounding box `[x1, y1, x2, y2]` in pixels
    pub bbox: [f64; 4],
    pub font: FontInfo,
}

/// Rule-of-thirds composition summary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Composition {
    /// Edge-density interest for each cell of a 3x3 grid
    pub grid_interest: [[f64; 3]; 3],
    pub rule_of_thirds_score: f64,
}

/// Color and composition statistics for a shot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ColorStats {
    /// Dominant colors as RGB triplets
    pub dominant_colors: Vec<[u8; 3]>,
    /// Mean brightness [0, 1]
    pub brightness: f64,
    /// Luma standard deviation
    pub contrast: f64,
    /// Mean saturation [0, 1]
    pub saturation: f64,
    pub composition: Composition,
}

/// Camera-motion statistics for a shot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MotionStats {
    pub camera_motion: bool,
    /// `static`, `pan_horizontal`, `pan_vertical` or `complex`
    pub motion_type: String,
    /// Average flow vector `[dx, dy]` in pixels
    pub avg_flow: [f64; 2],
    pub magnitude: f64,
}

/// Saliency statistics for a shot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SaliencyStats {
    /// Center of salient mass, normalized to [0, 1]
    pub salient_center: [f64; 2],
    pub salient_area_pct: f64,
    pub avg_saliency: f64,
}

/// Speech presence estimate.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpeechStats {
    pub has_speech: bool,
    pub speech_ratio: f64,
}

/// Music presence estimate.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MusicStats {
    pub has_music: bool,
    pub estimated_tempo: f64,
}

/// Dialogue intelligibility.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DialogueStats {
    /// Speech clarity score [0, 1]
    pub stoi: f64,
    /// `good` or `poor`
    pub intelligibility: String,
}

/// Stereo-field analysis.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StereoStats {
    pub correlation: f64,
    pub phase_coherence: f64,
    pub phase_warning: bool,
}

/// Audio engineering metrics for a shot's audio window.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioStats {
    /// Integrated loudness approximation (LUFS)
    pub lufs: f64,
    /// True peak in dBTP
    pub true_peak_dbtp: f64,
    pub dynamic_range_db: f64,
    pub speech: SpeechStats,
    pub music: MusicStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<DialogueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stereo: Option<StereoStats>,
}

/// Transition classification between a shot and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    None,
    Cut,
    Fade,
    FadeToBlack,
    FadeFromBlack,
    Dissolve,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransitionInfo {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    /// SSIM between the boundary frames
    pub similarity: f64,
    /// `hard` or `soft`
    pub sharpness: String,
}

/// Structured output of the VL reasoner for a shot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Reasoning {
    pub summary: String,
    pub mood: String,
    pub intent: String,
    #[serde(default)]
    pub composition_notes: Vec<String>,
    #[serde(default)]
    pub transition_guess: String,
}

/// Why a detector slot is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Disabled by a fallback ladder step
    ResourceExhausted,
    /// Disabled by an ablation flag
    DisabledByAblation,
    /// Corrupt frame, missing audio, or similar input problem
    InputDefect,
    /// Unexpected detector error
    InternalError,
    /// The VL endpoint could not be reached
    VlUnreachable,
    /// The VL reply never parsed to the required shape
    ParseFailed,
    /// Transition classification needs a predecessor shot
    NoAdjacentShot,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ResourceExhausted => "resource_exhausted",
            SkipReason::DisabledByAblation => "disabled_by_ablation",
            SkipReason::InputDefect => "input_defect",
            SkipReason::InternalError => "internal_error",
            SkipReason::VlUnreachable => "vl_unreachable",
            SkipReason::ParseFailed => "parse_failed",
            SkipReason::NoAdjacentShot => "no_adjacent_shot",
        }
    }
}

/// Record of a skipped detector slot inside a shot's `detectors` map.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SkippedDetector {
    pub kind: DetectorKind,
    pub reason: SkipReason,
}

/// Typed payload produced by one detector invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorPayload {
    Objects(Vec<ObjectBox>),
    SrUsed(bool),
    Faces(Vec<FaceBox>),
    Text(Vec<TextRegion>),
    Color(ColorStats),
    Motion {
        motion: MotionStats,
        saliency: SaliencyStats,
    },
    Audio(AudioStats),
    Transition(TransitionInfo),
    Reasoning(Reasoning),
    /// Explicit empty payload for a skipped invocation
    Empty,
}

/// One detector invocation's result, as handed to the merge stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorRecord {
    pub kind: DetectorKind,
    pub payload: DetectorPayload,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl DetectorRecord {
    pub fn new(kind: DetectorKind, payload: DetectorPayload, provenance: Provenance) -> Self {
        Self {
            kind,
            payload,
            provenance,
            skipped: None,
        }
    }

    /// An empty payload plus a provenance stub carrying the skip reason.
    pub fn skipped(kind: DetectorKind, reason: SkipReason) -> Self {
        Self {
            kind,
            payload: DetectorPayload::Empty,
            provenance: Provenance::skipped_stub(kind, reason),
            skipped: Some(reason),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// The per-shot `detectors` map in the bundle. Every enabled kind has either a
/// populated slot or an entry in `skipped`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ShotDetectors {
    #[serde(default)]
    pub objects: Vec<ObjectBox>,
    #[serde(default)]
    pub faces: Vec<FaceBox>,
    #[serde(default)]
    pub text: Vec<TextRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion: Option<MotionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saliency: Option<SaliencyStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionInfo>,
    #[serde(default)]
    pub sr_used: bool,
    /// Slots left empty, with the reason
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedDetector>,
}

impl ShotDetectors {
    /// Whether `kind` has either a populated slot or a recorded skip.
    pub fn accounts_for(&self, kind: DetectorKind) -> bool {
        if self.skipped.iter().any(|s| s.kind == kind) {
            return true;
        }
        match kind {
            DetectorKind::ObjectsCoarse
            | DetectorKind::ObjectsTiled
            | DetectorKind::ObjectsFine
            | DetectorKind::MaskRefine => true, // folded into `objects`
            DetectorKind::SuperRes => true,     // always reported via `sr_used`
            DetectorKind::Faces => true,
            DetectorKind::Text => true,
            DetectorKind::Color => self.color.is_some(),
            DetectorKind::Motion => self.motion.is_some(),
            DetectorKind::Audio => self.audio.is_some(),
            DetectorKind::Transition => self.transition.is_some(),
            DetectorKind::Reasoning => true, // carried on the shot itself
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_classes() {
        assert_eq!(
            DetectorKind::MaskRefine.resource_class(),
            ResourceClass::GpuHeavy
        );
        assert_eq!(DetectorKind::Faces.resource_class(), ResourceClass::GpuLight);
        assert_eq!(DetectorKind::Audio.resource_class(), ResourceClass::Cpu);
        assert_eq!(DetectorKind::Reasoning.resource_class(), ResourceClass::Io);
        assert!(ResourceClass::GpuLight.needs_gpu_permit());
        assert!(!ResourceClass::Io.needs_gpu_permit());
    }

    #[test]
    fn iou_disjoint_and_identical() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn iou_partial_overlap() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [5.0, 0.0, 15.0, 10.0];
        // intersection 50, union 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn skipped_record_carries_reason() {
        let rec = DetectorRecord::skipped(DetectorKind::MaskRefine, SkipReason::ResourceExhausted);
        assert!(rec.is_skipped());
        assert!(matches!(rec.payload, DetectorPayload::Empty));
        assert_eq!(
            rec.provenance.skipped_reason.as_deref(),
            Some("resource_exhausted")
        );
    }

    #[test]
    fn shot_detectors_accounting() {
        let mut d = ShotDetectors::default();
        assert!(!d.accounts_for(DetectorKind::Color));
        d.skipped.push(SkippedDetector {
            kind: DetectorKind::Color,
            reason: SkipReason::InputDefect,
        });
        assert!(d.accounts_for(DetectorKind::Color));
    }
}
