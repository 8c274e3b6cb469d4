//! Per-video directory layout and atomic bundle writes.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use vab_models::{Vab, VideoId};

use crate::error::{StoreError, StoreResult};

/// Handle to the on-disk store. Cheap to clone; all paths derive from the
/// root, so a `VideoStore` never touches another job's directory.
#[derive(Debug, Clone)]
pub struct VideoStore {
    root: PathBuf,
}

impl VideoStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create from the `STORE_PATH` environment variable (default `store`).
    pub fn from_env() -> Self {
        let root = std::env::var("STORE_PATH").unwrap_or_else(|_| "store".to_string());
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by one video.
    pub fn video_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join(video_id.as_str())
    }

    /// Decoded keyframes directory.
    pub fn frames_dir(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("frames")
    }

    /// Path of the normalized video file.
    pub fn video_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("video.mp4")
    }

    /// Path of the extracted audio track.
    pub fn audio_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("audio.wav")
    }

    /// Path of one decoded keyframe.
    pub fn frame_path(&self, video_id: &VideoId, frame_num: u64) -> PathBuf {
        self.frames_dir(video_id)
            .join(format!("frame_{:08}.jpg", frame_num))
    }

    /// Path of the persisted bundle.
    pub fn vab_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("vab.json")
    }

    /// Create the video directory tree.
    pub async fn ensure_dirs(&self, video_id: &VideoId) -> StoreResult<()> {
        tokio::fs::create_dir_all(self.frames_dir(video_id)).await?;
        Ok(())
    }

    /// Whether the source video is present.
    pub async fn has_video(&self, video_id: &VideoId) -> bool {
        tokio::fs::try_exists(self.video_path(video_id))
            .await
            .unwrap_or(false)
    }

    /// Whether a bundle has been written.
    pub async fn has_bundle(&self, video_id: &VideoId) -> bool {
        tokio::fs::try_exists(self.vab_path(video_id))
            .await
            .unwrap_or(false)
    }

    /// Store an uploaded video body as `video.mp4`.
    pub async fn write_video(&self, video_id: &VideoId, bytes: &[u8]) -> StoreResult<PathBuf> {
        self.ensure_dirs(video_id).await?;
        let path = self.video_path(video_id);
        tokio::fs::write(&path, bytes).await?;
        info!(video_id = %video_id, bytes = bytes.len(), "Stored uploaded video");
        Ok(path)
    }

    /// Persist the bundle atomically: write to a temp file in the same
    /// directory, then rename over `vab.json`. No concurrent writers exist
    /// for a given video id, so the rename is the only visible step.
    pub async fn write_bundle(&self, video_id: &VideoId, vab: &Vab) -> StoreResult<PathBuf> {
        self.ensure_dirs(video_id).await?;
        let path = self.vab_path(video_id);
        let tmp = self.video_dir(video_id).join("vab.json.tmp");

        let payload = serde_json::to_vec_pretty(vab)?;
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(video_id = %video_id, path = %path.display(), "Bundle persisted");
        Ok(path)
    }

    /// Load a persisted bundle.
    pub async fn load_bundle(&self, video_id: &VideoId) -> StoreResult<Vab> {
        let path = self.vab_path(video_id);
        let payload = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::BundleNotFound(video_id.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Load the raw bundle JSON without deserializing the full schema.
    pub async fn load_bundle_raw(&self, video_id: &VideoId) -> StoreResult<serde_json::Value> {
        let path = self.vab_path(video_id);
        let payload = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::BundleNotFound(video_id.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Remove decoded frames, keeping video and bundle. Used after completion
    /// to reclaim space.
    pub async fn cleanup_frames(&self, video_id: &VideoId) -> StoreResult<()> {
        let frames = self.frames_dir(video_id);
        if tokio::fs::try_exists(&frames).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&frames).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vab_models::{
        AudioCoverage, BundleState, Calibration, CoverageReport, DetectionTotals, GlobalStats,
        Resolution, RunMetrics, SpatialCoverage, Status, TemporalCoverage, VideoMeta,
    };

    fn minimal_bundle(video_id: &VideoId) -> Vab {
        Vab {
            schema_version: vab_models::SCHEMA_VERSION.to_string(),
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
                video_id: video_id.clone(),
                path: "video.mp4".to_string(),
                sha256: String::new(),
                metrics: RunMetrics::default(),
            },
            global: GlobalStats {
                total_frames: 0,
                duration_s: 0.0,
                fps: 30.0,
                resolution: Resolution { w: 0, h: 0 },
                detections: DetectionTotals::default(),
            },
            scenes: Vec::new(),
            shots: Vec::new(),
            tracks: Vec::new(),
            risks: Vec::new(),
            provenance: Vec::new(),
            calibration: Calibration::defaults(),
        }
    }

    #[test]
    fn path_layout() {
        let store = VideoStore::new("store");
        let id = VideoId::new("t1");
        assert_eq!(store.video_path(&id), PathBuf::from("store/t1/video.mp4"));
        assert_eq!(store.audio_path(&id), PathBuf::from("store/t1/audio.wav"));
        assert_eq!(
            store.frame_path(&id, 42),
            PathBuf::from("store/t1/frames/frame_00000042.jpg")
        );
        assert_eq!(store.vab_path(&id), PathBuf::from("store/t1/vab.json"));
    }

    #[tokio::test]
    async fn bundle_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VideoStore::new(dir.path());
        let id = VideoId::new("t1");

        let vab = minimal_bundle(&id);
        store.write_bundle(&id, &vab).await.unwrap();
        assert!(store.has_bundle(&id).await);

        let loaded = store.load_bundle(&id).await.unwrap();
        assert_eq!(loaded.schema_version, vab.schema_version);
        assert_eq!(loaded.video.video_id, id);

        // No temp file is left behind.
        assert!(!dir.path().join("t1/vab.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_bundle_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = VideoStore::new(dir.path());
        let err = store.load_bundle(&VideoId::new("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::BundleNotFound(_)));
    }

    #[tokio::test]
    async fn overwrite_is_atomic_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let store = VideoStore::new(dir.path());
        let id = VideoId::new("t1");

        let mut vab = minimal_bundle(&id);
        store.write_bundle(&id, &vab).await.unwrap();

        vab.status.state = BundleState::Degraded;
        store.write_bundle(&id, &vab).await.unwrap();

        let loaded = store.load_bundle(&id).await.unwrap();
        assert_eq!(loaded.status.state, BundleState::Degraded);
    }
}
