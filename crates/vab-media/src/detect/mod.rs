//! The uniform detector interface and its adapters.
//!
//! Every capability in the pipeline (the GPU object chain, the CPU fan-out
//! detectors, super-resolution) implements [`Detector`]: a pure function
//! from a shot descriptor plus configuration to a payload with provenance.
//! Detectors never touch the pool or the fallback ladder themselves; the
//! scheduler owns admission and retries and only looks at the error kind.

pub mod audio;
pub mod color;
pub mod faces;
pub mod masks;
pub mod motion;
pub mod nms;
pub mod objects;
pub mod providers;
pub mod registry;
pub mod superres;
pub mod text;
pub mod tiling;
pub mod transition;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use vab_models::{
    AnalysisConfig, DetectorKind, DetectorPayload, ObjectBox, Provenance, ResourceClass, Shot,
};

pub use registry::DetectorRegistry;

/// Result type for detector invocations.
pub type DetectResult<T> = Result<T, DetectError>;

/// The three reportable detector error kinds, plus external-service failure.
/// Only `TransientResource` is eligible for the fallback ladder.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Out-of-memory, device busy, or a first deadline violation
    #[error("transient resource error: {0}")]
    TransientResource(String),

    /// Bad frame, missing audio, or similar defect in the shot's inputs
    #[error("input defect: {0}")]
    InputDefect(String),

    /// Unexpected failure inside the detector
    #[error("internal detector error: {0}")]
    Internal(String),

    /// An external collaborator (the VL endpoint) failed
    #[error("external service error: {0}")]
    External(String),
}

impl DetectError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientResource(msg.into())
    }

    pub fn input_defect(msg: impl Into<String>) -> Self {
        Self::InputDefect(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DetectError::TransientResource(_))
    }
}

/// Output of one detector invocation.
#[derive(Debug, Clone)]
pub struct Detection {
    pub payload: DetectorPayload,
    pub provenance: Provenance,
}

impl Detection {
    pub fn new(payload: DetectorPayload, provenance: Provenance) -> Self {
        Self { payload, provenance }
    }
}

/// Accumulated state of the sequential GPU chain within one shot. Later chain
/// stages consume the previous stage's output through this.
#[derive(Debug, Clone, Default)]
pub struct ChainState {
    /// Surviving object detections after the latest pass
    pub objects: Vec<ObjectBox>,
    /// Whether super-resolution ran for this shot
    pub sr_used: bool,
    /// Path of the upscaled middle frame, when SR ran
    pub sr_frame: Option<PathBuf>,
}

/// Everything a detector may look at for one invocation.
pub struct ShotContext<'a> {
    pub shot: &'a Shot,
    /// The preceding shot, for transition classification
    pub prev_shot: Option<&'a Shot>,
    pub cfg: &'a AnalysisConfig,
    /// Path of the extracted audio track for the whole video
    pub audio_path: &'a Path,
    /// Source frame rate
    pub fps: f64,
    /// GPU-chain state accumulated so far (empty outside the chain)
    pub chain: &'a ChainState,
}

impl<'a> ShotContext<'a> {
    /// The shot's middle keyframe, erroring as an input defect when absent.
    pub fn mid_frame(&self) -> DetectResult<&'a Path> {
        self.shot
            .mid_frame()
            .map(|p| p.as_path())
            .ok_or_else(|| DetectError::input_defect("shot has no decoded frames"))
    }
}

/// A pure detection capability with a uniform contract: fixed payload schema
/// per kind, provenance always populated, no side effects beyond reads from
/// the model cache (and SR's upscaled-frame write).
#[async_trait]
pub trait Detector: Send + Sync {
    /// The kind this adapter implements.
    fn kind(&self) -> DetectorKind;

    /// Admission class; defaults to the kind's declared class.
    fn resource_class(&self) -> ResourceClass {
        self.kind().resource_class()
    }

    /// Run the detector for one shot.
    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_ladder_eligible() {
        assert!(DetectError::transient("oom").is_transient());
        assert!(!DetectError::input_defect("bad frame").is_transient());
        assert!(!DetectError::internal("boom").is_transient());
        assert!(!DetectError::External("503".to_string()).is_transient());
    }
}
