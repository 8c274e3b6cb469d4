//! The Video Analysis Bundle (VAB): the single structured document the
//! pipeline emits, plus schema-level validation.

use std::collections::{BTreeMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageReport;
use crate::detector::{Reasoning, ShotDetectors};
use crate::ids::VideoId;
use crate::provenance::Provenance;

/// Fixed schema version; evolution bumps this with a migration note.
pub const SCHEMA_VERSION: &str = "1.1.0";

/// Final quality state of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    Ok,
    Degraded,
    Failed,
}

impl BundleState {
    /// Combine two states, keeping the worse one.
    pub fn worst(self, other: BundleState) -> BundleState {
        use BundleState::*;
        match (self, other) {
            (Failed, _) | (_, Failed) => Failed,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Ok,
        }
    }
}

/// Bundle status block: state, every reason that lowered it, and coverage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Status {
    pub state: BundleState,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub coverage: CoverageReport,
}

/// Per-run resource metrics embedded in `video.metrics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunMetrics {
    /// Wall-clock latency per stage, milliseconds
    #[serde(default)]
    pub latency_ms: BTreeMap<String, f64>,
    #[serde(default)]
    pub gpu_mem_mb_peak: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub oom_trips: u32,
}

/// Video file metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoMeta {
    pub video_id: VideoId,
    pub path: String,
    pub sha256: String,
    pub metrics: RunMetrics,
}

/// Detection rollup across all shots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DetectionTotals {
    pub total_objects: usize,
    pub total_faces: usize,
    pub total_text_regions: usize,
    /// Object-class histogram
    #[serde(default)]
    pub object_counts: BTreeMap<String, usize>,
    pub unique_object_classes: usize,
}

/// Frame resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub w: u32,
    pub h: u32,
}

/// Global video statistics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GlobalStats {
    pub total_frames: u64,
    pub duration_s: f64,
    pub fps: f64,
    pub resolution: Resolution,
    pub detections: DetectionTotals,
}

/// Aggregate audio features of a scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneAudioFeatures {
    pub avg_loudness: f64,
    pub has_speech: bool,
    pub has_music: bool,
}

/// Aggregate features of a scene, computed from its shots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneFeatures {
    pub avg_brightness: f64,
    pub dominant_mood: String,
    pub has_camera_motion: bool,
    pub shot_count: usize,
    pub total_duration_s: f64,
    pub audio: SceneAudioFeatures,
}

/// Scene-level VL output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Narrative {
    #[serde(default)]
    pub narrative_function: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub motifs: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// A group of visually and temporally coherent shots. References shots by id,
/// never by pointer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SceneEntry {
    pub scene_id: String,
    pub shots: Vec<String>,
    pub start_frame: u64,
    pub end_frame: u64,
    pub features: SceneFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<Narrative>,
}

/// A shot together with everything the detectors produced for it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ShotAnalysis {
    pub shot_id: String,
    pub start_frame: u64,
    pub end_frame: u64,
    pub frame_count: u64,
    pub duration_s: f64,
    pub detectors: ShotDetectors,
    /// Flattened reasoning fields, empty when the VL pass was skipped
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub composition_notes: Vec<String>,
    #[serde(default)]
    pub transition_guess: String,
}

impl ShotAnalysis {
    /// Copy the VL reasoning fields onto the shot.
    pub fn apply_reasoning(&mut self, reasoning: &Reasoning) {
        self.summary = reasoning.summary.clone();
        self.mood = reasoning.mood.clone();
        self.intent = reasoning.intent.clone();
        self.composition_notes = reasoning.composition_notes.clone();
        self.transition_guess = reasoning.transition_guess.clone();
    }
}

/// Risk type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    LowDialogueIntelligibility,
    AudioClipping,
    CaptionFaceOverlap,
    DegradedDetection,
}

/// Risk severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Med,
    High,
}

/// A risk flag derived from detector metrics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Risk {
    pub shot_id: String,
    #[serde(rename = "type")]
    pub kind: RiskKind,
    pub severity: Severity,
    /// Snapshot of the metric that triggered the risk
    pub metric: serde_json::Value,
}

/// Expected operating point of a detector family.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Calibration {
    pub family: String,
    pub expected_tpr: f64,
    pub expected_fpr: f64,
}

impl Calibration {
    /// The static calibration table emitted in every bundle.
    pub fn defaults() -> Vec<Calibration> {
        vec![
            Calibration {
                family: "objects".to_string(),
                expected_tpr: 0.94,
                expected_fpr: 0.06,
            },
            Calibration {
                family: "ocr".to_string(),
                expected_tpr: 0.97,
                expected_fpr: 0.03,
            },
            Calibration {
                family: "audio".to_string(),
                expected_tpr: 0.98,
                expected_fpr: 0.02,
            },
        ]
    }
}

/// The Video Analysis Bundle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Vab {
    pub schema_version: String,
    pub status: Status,
    pub video: VideoMeta,
    pub global: GlobalStats,
    pub scenes: Vec<SceneEntry>,
    pub shots: Vec<ShotAnalysis>,
    /// Persistent object tracks across shots (reserved, currently empty)
    #[serde(default)]
    pub tracks: Vec<serde_json::Value>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
    #[serde(default)]
    pub calibration: Vec<Calibration>,
}

impl Vab {
    /// Validate schema invariants before the bundle is persisted:
    /// shots partition the frame range, every shot belongs to exactly one
    /// scene, and the provenance list is unique by its dedup key.
    ///
    /// Returns the list of violations (empty means valid).
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        // Shots cover [0, total_frames) without gaps or overlap.
        let mut expected_start = 0u64;
        for shot in &self.shots {
            if shot.start_frame != expected_start {
                violations.push(format!(
                    "shot {} starts at {} (expected {})",
                    shot.shot_id, shot.start_frame, expected_start
                ));
            }
            if shot.end_frame < shot.start_frame {
                violations.push(format!("shot {} has negative extent", shot.shot_id));
            }
            expected_start = shot.end_frame;
        }
        if expected_start != self.global.total_frames {
            violations.push(format!(
                "shots end at {} but video has {} frames",
                expected_start, self.global.total_frames
            ));
        }

        // Scene partition: multiset of shot ids in scenes == shots.
        let shot_ids: HashSet<&str> = self.shots.iter().map(|s| s.shot_id.as_str()).collect();
        let mut seen = HashSet::new();
        for scene in &self.scenes {
            for id in &scene.shots {
                if !shot_ids.contains(id.as_str()) {
                    violations.push(format!("scene {} references unknown shot {}", scene.scene_id, id));
                }
                if !seen.insert(id.as_str()) {
                    violations.push(format!("shot {} appears in more than one scene", id));
                }
            }
        }
        if seen.len() != shot_ids.len() {
            violations.push("some shots belong to no scene".to_string());
        }

        // Provenance uniqueness by (tool, version, params_hash).
        let mut keys = HashSet::new();
        for p in &self.provenance {
            if !keys.insert(p.dedup_key()) {
                violations.push(format!("duplicate provenance entry for tool {}", p.tool));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{AudioCoverage, SpatialCoverage, TemporalCoverage};

    fn shot(id: &str, start: u64, end: u64) -> ShotAnalysis {
        ShotAnalysis {
            shot_id: id.to_string(),
            start_frame: start,
            end_frame: end,
            frame_count: end - start,
            duration_s: (end - start) as f64 / 30.0,
            detectors: ShotDetectors::default(),
            summary: String::new(),
            mood: String::new(),
            intent: String::new(),
            composition_notes: Vec::new(),
            transition_guess: String::new(),
        }
    }

    fn bundle(shots: Vec<ShotAnalysis>, scenes: Vec<SceneEntry>, total_frames: u64) -> Vab {
        Vab {
            schema_version: SCHEMA_VERSION.to_string(),
            status: Status {
                state: BundleState::Ok,
                reasons: Vec::new(),
                coverage: CoverageReport {
                    spatial: SpatialCoverage {
                        tile_size: 512,
                        stride: 256,
                        sr_used: false,
                        pixels_covered_pct: 100.0,
                        min_detectable_px: 8,
                    },
                    temporal: TemporalCoverage {
                        frame_stride: 1,
                        frames_analyzed_pct: 100.0,
                    },
                    audio: AudioCoverage {
                        lufs_trace_pct: 100.0,
                        stoi_pct: 100.0,
                    },
                },
            },
            video: VideoMeta {
                video_id: VideoId::new("t1"),
                path: "store/t1/video.mp4".to_string(),
                sha256: "0".repeat(64),
                metrics: RunMetrics::default(),
            },
            global: GlobalStats {
                total_frames,
                duration_s: total_frames as f64 / 30.0,
                fps: 30.0,
                resolution: Resolution { w: 640, h: 360 },
                detections: DetectionTotals::default(),
            },
            scenes,
            shots,
            tracks: Vec::new(),
            risks: Vec::new(),
            provenance: Vec::new(),
            calibration: Calibration::defaults(),
        }
    }

    fn scene(id: &str, shots: &[&str], start: u64, end: u64) -> SceneEntry {
        SceneEntry {
            scene_id: id.to_string(),
            shots: shots.iter().map(|s| s.to_string()).collect(),
            start_frame: start,
            end_frame: end,
            features: SceneFeatures::default(),
            narrative: None,
        }
    }

    #[test]
    fn valid_bundle_passes() {
        let vab = bundle(
            vec![shot("sh_000", 0, 100), shot("sh_001", 100, 300)],
            vec![scene("sc_000", &["sh_000", "sh_001"], 0, 300)],
            300,
        );
        assert!(vab.validate().is_empty());
    }

    #[test]
    fn gap_between_shots_is_flagged() {
        let vab = bundle(
            vec![shot("sh_000", 0, 100), shot("sh_001", 120, 300)],
            vec![scene("sc_000", &["sh_000", "sh_001"], 0, 300)],
            300,
        );
        assert!(!vab.validate().is_empty());
    }

    #[test]
    fn shot_in_two_scenes_is_flagged() {
        let vab = bundle(
            vec![shot("sh_000", 0, 100)],
            vec![
                scene("sc_000", &["sh_000"], 0, 100),
                scene("sc_001", &["sh_000"], 0, 100),
            ],
            100,
        );
        assert!(vab
            .validate()
            .iter()
            .any(|v| v.contains("more than one scene")));
    }

    #[test]
    fn orphan_shot_is_flagged() {
        let vab = bundle(vec![shot("sh_000", 0, 100)], Vec::new(), 100);
        assert!(vab
            .validate()
            .iter()
            .any(|v| v.contains("no scene")));
    }

    #[test]
    fn duplicate_provenance_is_flagged() {
        let mut vab = bundle(
            vec![shot("sh_000", 0, 100)],
            vec![scene("sc_000", &["sh_000"], 0, 100)],
            100,
        );
        let p = Provenance::new("yolo", "8.3.2", None, &serde_json::json!({"conf": 0.18}));
        vab.provenance.push(p.clone());
        vab.provenance.push(p);
        assert!(vab
            .validate()
            .iter()
            .any(|v| v.contains("duplicate provenance")));
    }

    #[test]
    fn bundle_state_worst() {
        assert_eq!(
            BundleState::Ok.worst(BundleState::Degraded),
            BundleState::Degraded
        );
        assert_eq!(
            BundleState::Degraded.worst(BundleState::Failed),
            BundleState::Failed
        );
        assert_eq!(BundleState::Ok.worst(BundleState::Ok), BundleState::Ok);
    }
}
