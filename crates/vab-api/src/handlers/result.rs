//! `GET /result/{video_id}`: the persisted bundle.

use axum::extract::{Path, State};
use axum::Json;

use vab_models::{JobState, VideoId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Return the full bundle JSON. 404 until a completed bundle exists, 409
/// while the job is still running.
pub async fn result(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let video_id = VideoId::new(video_id);
    let job = state
        .table
        .get(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))?;

    match job.state {
        JobState::Completed => {
            let bundle = state.store.load_bundle_raw(&video_id).await.map_err(|e| {
                match e {
                    vab_store::StoreError::BundleNotFound(_) => {
                        ApiError::not_found("bundle not found")
                    }
                    other => other.into(),
                }
            })?;
            Ok(Json(bundle))
        }
        JobState::Queued | JobState::Running => {
            Err(ApiError::conflict("analysis still running"))
        }
        JobState::Failed => Err(ApiError::not_found(format!(
            "analysis failed: {}",
            job.message.unwrap_or_default()
        ))),
    }
}
