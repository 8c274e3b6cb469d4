//! Face detection adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use vab_models::{DetectorKind, DetectorPayload, FaceBox, Provenance};

use crate::detect::providers::FaceProvider;
use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};
use crate::frames;

pub struct FacesDetector {
    provider: Arc<dyn FaceProvider>,
}

impl FacesDetector {
    pub fn new(provider: Arc<dyn FaceProvider>) -> Self {
        Self { provider }
    }
}

#[derive(Serialize)]
struct FaceParams<'a> {
    det_model: &'a str,
}

#[async_trait]
impl Detector for FacesDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Faces
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let path = ctx.mid_frame()?;
        let image = frames::load_rgb(path).map_err(|e| DetectError::input_defect(e.to_string()))?;

        let faces: Vec<FaceBox> = self
            .provider
            .propose_faces(&image)?
            .into_iter()
            .enumerate()
            .map(|(idx, p)| FaceBox {
                face_id: format!("face_{}", idx),
                conf: p.conf,
                bbox: p.bbox,
            })
            .collect();

        debug!(shot = %ctx.shot.shot_id, count = faces.len(), "face detection");

        let provenance = Provenance::new(
            self.provider.name(),
            self.provider.version(),
            Some(self.provider.checkpoint().to_string()),
            &FaceParams {
                det_model: self.provider.name(),
            },
        );
        Ok(Detection::new(DetectorPayload::Faces(faces), provenance))
    }
}
