//! Durable job table keyed by `video_id`.
//!
//! One Redis key per job holding the serialized [`VideoJob`]. The scheduler
//! is the only writer after creation; the API reads it for `status`.

use redis::AsyncCommands;
use tracing::debug;

use vab_models::{JobState, VideoId, VideoJob};

use crate::error::{QueueError, QueueResult};

/// Job table client.
pub struct JobTable {
    client: redis::Client,
}

impl JobTable {
    /// Create a new job table client.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from the same environment variables as the queue.
    pub fn from_env() -> QueueResult<Self> {
        let config = crate::queue::QueueConfig::from_env();
        Self::new(&config.redis_url)
    }

    fn key(video_id: &VideoId) -> String {
        format!("vab:job:{}", video_id)
    }

    /// Persist a job record (create or overwrite).
    pub async fn put(&self, job: &VideoJob) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(Self::key(&job.video_id), payload).await?;
        debug!(video_id = %job.video_id, state = job.state.as_str(), "Job table updated");
        Ok(())
    }

    /// Fetch a job record.
    pub async fn get(&self, video_id: &VideoId) -> QueueResult<Option<VideoJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::key(video_id)).await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Fetch a job record, erroring when absent.
    pub async fn get_required(&self, video_id: &VideoId) -> QueueResult<VideoJob> {
        self.get(video_id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(video_id.as_str()))
    }

    /// Update state, progress and message in one write.
    pub async fn update_progress(
        &self,
        video_id: &VideoId,
        state: JobState,
        progress: u8,
        message: impl Into<String>,
    ) -> QueueResult<()> {
        let mut job = self.get_required(video_id).await?;
        job.state = state;
        job.progress = progress.min(100);
        job.message = Some(message.into());
        if state.is_terminal() && job.finished_at.is_none() {
            job.finished_at = Some(chrono::Utc::now());
        }
        self.put(&job).await
    }

    /// Delete a job record.
    pub async fn remove(&self, video_id: &VideoId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::key(video_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(JobTable::key(&VideoId::new("t1")), "vab:job:t1");
    }
}
