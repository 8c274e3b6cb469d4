//! `POST /analyze`: create or reuse an analysis job.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vab_models::{AblationFlags, JobState, VideoId, VideoJob};
use vab_queue::{AnalyzeJob, QueueError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub video_id: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub ablations: Option<AblationFlags>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub job_id: String,
    pub video_id: String,
    pub status: String,
    pub message: String,
}

/// Create a job, or return the existing one when the call is an idempotent
/// repeat. A running job with a different source is a conflict; a failed job
/// restarts.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let video_id = VideoId::new(request.video_id.clone());
    if !video_id.is_valid() {
        return Err(ApiError::bad_request("invalid video_id"));
    }
    let ablations = request.ablations.unwrap_or_default();

    if let Some(existing) = state.table.get(&video_id).await? {
        match existing.state {
            JobState::Queued | JobState::Running => {
                if request.media_url.is_some() && request.media_url != existing.media_url {
                    return Err(ApiError::conflict(
                        "video_id is being analyzed from a different source",
                    ));
                }
                return Ok(Json(AnalyzeResponse {
                    job_id: existing.job_id.to_string(),
                    video_id: video_id.to_string(),
                    status: existing.state.as_str().to_string(),
                    message: "analysis already in progress".to_string(),
                }));
            }
            JobState::Completed => {
                return Ok(Json(AnalyzeResponse {
                    job_id: existing.job_id.to_string(),
                    video_id: video_id.to_string(),
                    status: existing.state.as_str().to_string(),
                    message: "analysis already complete, result available".to_string(),
                }));
            }
            // A failed job may restart below.
            JobState::Failed => {}
        }
    }

    // Without a URL the video must already be ingested.
    if request.media_url.is_none() && !state.store.has_video(&video_id).await {
        return Err(ApiError::bad_request(
            "no media_url given and no ingested video found",
        ));
    }

    let job = VideoJob::new(video_id.clone(), request.media_url.clone(), ablations);
    state.table.put(&job).await?;

    let queue_job = AnalyzeJob::new(video_id.clone(), request.media_url, ablations);
    match state.queue.enqueue(&queue_job).await {
        Ok(_) => {}
        // Already enqueued (e.g. a failed job whose message is still pending).
        Err(QueueError::EnqueueFailed(_)) => {
            info!(video_id = %video_id, "job already enqueued");
        }
        Err(e) => return Err(e.into()),
    }

    info!(video_id = %video_id, job_id = %job.job_id, "analysis job queued");

    Ok(Json(AnalyzeResponse {
        job_id: job.job_id.to_string(),
        video_id: video_id.to_string(),
        status: "queued".to_string(),
        message: "Analysis job queued".to_string(),
    }))
}
