//! `GET /health`: collaborator probes, never dependent on a specific job.

use std::process::Stdio;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub gpu_available: bool,
    pub queue_connected: bool,
    pub vl_available: bool,
}

async fn gpu_available() -> bool {
    Command::new("nvidia-smi")
        .arg("-L")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn vl_available(state: &AppState) -> bool {
    let url = format!("{}/models", state.config.vl_api_base.trim_end_matches('/'));
    match state.http.get(&url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_connected = state.queue.ping().await;
    Json(HealthResponse {
        status: if queue_connected { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        gpu_available: gpu_available().await,
        queue_connected,
        vl_available: vl_available(&state).await,
    })
}
