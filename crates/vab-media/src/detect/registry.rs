//! Static detector registry.
//!
//! All detectors are registered at startup; adding one means declaring a new
//! kind and wiring it here. No runtime reflection, no ambient globals: the
//! registry is built once and handed to the scheduler at construction time.

use std::collections::BTreeMap;
use std::sync::Arc;

use vab_models::{AnalysisConfig, DetectorKind};

use crate::detect::audio::AudioEngDetector;
use crate::detect::color::ColorDetector;
use crate::detect::faces::FacesDetector;
use crate::detect::masks::MaskRefineDetector;
use crate::detect::motion::MotionSaliencyDetector;
use crate::detect::objects::{CoarseObjectsDetector, FineObjectsDetector, TiledObjectsDetector};
use crate::detect::providers::{
    BlockSaliencyProvider, ChromaFaceProvider, FaceProvider, GradientTextProvider, TextProvider,
    VisionProvider,
};
use crate::detect::superres::SuperResDetector;
use crate::detect::text::TextDetector;
use crate::detect::transition::TransitionDetector;
use crate::detect::Detector;

/// The closed set of detector adapters, keyed by kind.
pub struct DetectorRegistry {
    detectors: BTreeMap<DetectorKind, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    /// Build the standard registry with the default providers.
    pub fn standard() -> Self {
        let vision: Arc<dyn VisionProvider> = Arc::new(BlockSaliencyProvider);
        let faces: Arc<dyn FaceProvider> = Arc::new(ChromaFaceProvider);
        let text: Arc<dyn TextProvider> = Arc::new(GradientTextProvider);
        Self::with_providers(vision, faces, text)
    }

    /// Build a registry around explicit providers (e.g. model-backed ones).
    pub fn with_providers(
        vision: Arc<dyn VisionProvider>,
        faces: Arc<dyn FaceProvider>,
        text: Arc<dyn TextProvider>,
    ) -> Self {
        let mut detectors: BTreeMap<DetectorKind, Arc<dyn Detector>> = BTreeMap::new();
        detectors.insert(
            DetectorKind::ObjectsCoarse,
            Arc::new(CoarseObjectsDetector::new(Arc::clone(&vision))),
        );
        detectors.insert(
            DetectorKind::ObjectsTiled,
            Arc::new(TiledObjectsDetector::new(Arc::clone(&vision))),
        );
        detectors.insert(DetectorKind::SuperRes, Arc::new(SuperResDetector));
        detectors.insert(
            DetectorKind::ObjectsFine,
            Arc::new(FineObjectsDetector::new(vision)),
        );
        detectors.insert(DetectorKind::MaskRefine, Arc::new(MaskRefineDetector));
        detectors.insert(DetectorKind::Faces, Arc::new(FacesDetector::new(faces)));
        detectors.insert(DetectorKind::Text, Arc::new(TextDetector::new(text)));
        detectors.insert(DetectorKind::Color, Arc::new(ColorDetector));
        detectors.insert(DetectorKind::Motion, Arc::new(MotionSaliencyDetector));
        detectors.insert(DetectorKind::Audio, Arc::new(AudioEngDetector));
        detectors.insert(DetectorKind::Transition, Arc::new(TransitionDetector));
        // Reasoning is driven by the scheduler's VL client, not a registry entry.
        Self { detectors }
    }

    /// Insert or replace an adapter. Used by tests to inject faulting
    /// detectors.
    pub fn insert(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.kind(), detector);
    }

    /// Look up an adapter by kind.
    pub fn get(&self, kind: DetectorKind) -> Option<&Arc<dyn Detector>> {
        self.detectors.get(&kind)
    }

    /// The kinds enabled for a run, honoring ablations. Reasoning is always
    /// listed; the scheduler owns its execution.
    pub fn enabled_kinds(cfg: &AnalysisConfig) -> Vec<DetectorKind> {
        DetectorKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                DetectorKind::ObjectsTiled => cfg.detect.two_pass,
                DetectorKind::SuperRes | DetectorKind::ObjectsFine => cfg.detect.superres.enabled,
                _ => true,
            })
            .collect()
    }
}
