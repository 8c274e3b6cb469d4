//! Prometheus metrics for the API.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the render handle.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Per-request counter and latency histogram.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let path = normalize_path(&path);
    metrics::counter!(
        "vab_http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.clone(),
    )
    .increment(1);
    metrics::histogram!(
        "vab_http_request_duration_seconds",
        "method" => method,
        "path" => path,
        "status" => status,
    )
    .record(started.elapsed().as_secs_f64());

    response
}

/// Collapse per-video paths so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = path.split('/').collect();
    if parts.len() >= 3 && matches!(parts[1], "status" | "result") {
        parts[2] = ":video_id";
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_video_paths_collapse() {
        assert_eq!(normalize_path("/status/t1"), "/status/:video_id");
        assert_eq!(normalize_path("/result/abc-123"), "/result/:video_id");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/analyze"), "/analyze");
    }
}
