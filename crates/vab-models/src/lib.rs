//! Shared data models for the VAB video analysis backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video jobs and their lifecycle states
//! - Shots, scenes and the final Video Analysis Bundle (VAB)
//! - Detector kinds, resource classes and per-detector payloads
//! - Provenance entries and stable params fingerprints
//! - Coverage accounting and quality-gate thresholds
//! - The analysis configuration surface

pub mod bundle;
pub mod config;
pub mod coverage;
pub mod detector;
pub mod ids;
pub mod job;
pub mod provenance;
pub mod shot;

// Re-export common types
pub use bundle::{
    BundleState, Calibration, DetectionTotals, GlobalStats, Narrative, Resolution, Risk, RiskKind,
    RunMetrics, SceneAudioFeatures, SceneEntry, SceneFeatures, Severity, ShotAnalysis, Status, Vab,
    VideoMeta, SCHEMA_VERSION,
};
pub use config::{
    AblationFlags, AnalysisConfig, AudioConfig, CoverageThresholds, DetectConfig, MergeConfig,
    RuntimeConfig, SuperResConfig, TileConfig,
};
pub use coverage::{AudioCoverage, CoverageReport, SpatialCoverage, TemporalCoverage};
pub use detector::{
    iou, AudioStats, ColorStats, Composition, DetectionPass, DetectorKind, DetectorPayload,
    DetectorRecord, DialogueStats, FaceBox, FontInfo, MotionStats, MusicStats, ObjectBox,
    Reasoning, ResourceClass, SaliencyStats, ShotDetectors, SkipReason, SkippedDetector,
    SpeechStats, StereoStats, TextRegion, TransitionInfo, TransitionKind,
};
pub use ids::{JobId, VideoId};
pub use job::{JobState, VideoJob};
pub use provenance::{params_fingerprint, sha256_hex, Provenance};
pub use shot::{AudioWindow, Shot};
