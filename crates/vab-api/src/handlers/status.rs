//! `GET /status/{video_id}`: job state and progress.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use vab_models::VideoId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub video_id: String,
    pub state: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub vab_available: bool,
}

pub async fn status(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let video_id = VideoId::new(video_id);
    let job = state
        .table
        .get(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))?;

    let vab_available = state.store.has_bundle(&video_id).await;

    Ok(Json(StatusResponse {
        job_id: job.job_id.to_string(),
        video_id: video_id.to_string(),
        state: job.state.as_str().to_string(),
        progress: job.progress,
        message: job.message,
        vab_available,
    }))
}
