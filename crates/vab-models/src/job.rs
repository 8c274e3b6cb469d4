//! Video job lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::AblationFlags;
use crate::ids::{JobId, VideoId};

/// Job state in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue
    #[default]
    Queued,
    /// Analysis is running
    Running,
    /// Bundle written, job finished
    Completed,
    /// Prep or a mandatory stage failed
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Parse from the string stored in the job table.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A video analysis job. Uniquely keyed by `video_id`; created by `analyze`,
/// mutated only by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoJob {
    /// Unique job ID
    pub job_id: JobId,

    /// Video ID (also the store directory name)
    pub video_id: VideoId,

    /// Source URL; `None` means the video was ingested directly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    /// Ablation flags requested for this run
    #[serde(default)]
    pub ablations: AblationFlags,

    /// Job state
    #[serde(default)]
    pub state: JobState,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Human-readable status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Completion or failure timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl VideoJob {
    /// Create a new queued job.
    pub fn new(video_id: VideoId, media_url: Option<String>, ablations: AblationFlags) -> Self {
        Self {
            job_id: JobId::for_video(&video_id),
            video_id,
            media_url,
            ablations,
            state: JobState::Queued,
            progress: 0,
            message: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Transition to running.
    pub fn start(mut self) -> Self {
        self.state = JobState::Running;
        self.message = Some("analysis running".to_string());
        self
    }

    /// Mark job as completed.
    pub fn complete(mut self) -> Self {
        self.state = JobState::Completed;
        self.progress = 100;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Mark job as failed.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.state = JobState::Failed;
        self.message = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }

    /// Update progress, clamped to 100.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }

    /// Idempotency key for queue-level dedup.
    pub fn idempotency_key(&self) -> String {
        format!("analyze:{}", self.video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_transitions() {
        let job = VideoJob::new(VideoId::new("t1"), None, AblationFlags::default());
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.job_id.as_str(), "job_t1");

        let running = job.start();
        assert_eq!(running.state, JobState::Running);
        assert!(!running.state.is_terminal());

        let done = running.complete();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.state.is_terminal());
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn job_failure_is_terminal() {
        let job = VideoJob::new(VideoId::new("t2"), None, AblationFlags::default());
        let failed = job.fail("no shots detected");
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.state.is_terminal());
        assert_eq!(failed.message.as_deref(), Some("no shots detected"));
    }

    #[test]
    fn state_string_roundtrip() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("bogus"), None);
    }
}
