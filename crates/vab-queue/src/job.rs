//! Queue job payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vab_models::{AblationFlags, JobId, VideoId};

/// Job to run the full analysis pipeline for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Video ID (store directory and job-table key)
    pub video_id: VideoId,
    /// Source URL; `None` when the video was ingested via upload
    pub media_url: Option<String>,
    /// Ablation flags for this run
    #[serde(default)]
    pub ablations: AblationFlags,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl AnalyzeJob {
    /// Create a new analyze job.
    pub fn new(video_id: VideoId, media_url: Option<String>, ablations: AblationFlags) -> Self {
        Self {
            job_id: JobId::for_video(&video_id),
            video_id,
            media_url,
            ablations,
            created_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("analyze:{}", self.video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_job_serde_roundtrip() {
        let job = AnalyzeJob::new(
            VideoId::new("t1"),
            Some("https://example.com/v.mp4".to_string()),
            AblationFlags {
                no_sr: true,
                ..Default::default()
            },
        );

        let json = serde_json::to_string(&job).expect("serialize AnalyzeJob");
        let decoded: AnalyzeJob = serde_json::from_str(&json).expect("deserialize AnalyzeJob");

        assert_eq!(decoded.job_id, job.job_id);
        assert_eq!(decoded.video_id, job.video_id);
        assert_eq!(decoded.media_url, job.media_url);
        assert!(decoded.ablations.no_sr);
        assert_eq!(decoded.created_at, job.created_at);
    }

    #[test]
    fn idempotency_key_is_per_video() {
        let a = AnalyzeJob::new(VideoId::new("t1"), None, AblationFlags::default());
        let b = AnalyzeJob::new(VideoId::new("t1"), None, AblationFlags::default());
        let c = AnalyzeJob::new(VideoId::new("t2"), None, AblationFlags::default());
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_ne!(a.idempotency_key(), c.idempotency_key());
    }
}
