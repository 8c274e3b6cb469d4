//! `POST /ingest`: store an uploaded video under `store/<video_id>/`.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use vab_models::VideoId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub video_id: String,
    pub path: String,
}

/// Sniff the container MIME type from the file's magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        // ISO BMFF: mp4 unless the major brand says QuickTime.
        if &bytes[8..10] == b"qt" {
            return Some("video/quicktime");
        }
        return Some("video/mp4");
    }
    if bytes.len() >= 4 && bytes[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return Some("video/x-matroska");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"AVI " {
        return Some("video/x-msvideo");
    }
    None
}

/// Accept a multipart upload with `video_id` and `file` fields. Rejects
/// oversize files (413) before writing anything, and MIME types outside the
/// whitelist (415). Nothing lands in the store on rejection.
pub async fn ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let max_bytes = state.config.max_video_bytes();

    let mut video_id: Option<VideoId> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("video_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("bad video_id field: {}", e)))?;
                video_id = Some(VideoId::new(value));
            }
            Some("file") => {
                let mut buf: Vec<u8> = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("upload read failed: {}", e)))?
                {
                    if (buf.len() + chunk.len()) as u64 > max_bytes {
                        return Err(ApiError::PayloadTooLarge(format!(
                            "upload exceeds {} MB",
                            state.config.max_video_mb
                        )));
                    }
                    buf.extend_from_slice(&chunk);
                }
                file_bytes = Some(buf);
            }
            _ => {}
        }
    }

    let video_id = video_id.ok_or_else(|| ApiError::bad_request("missing video_id field"))?;
    if !video_id.is_valid() {
        return Err(ApiError::bad_request("invalid video_id"));
    }
    let file_bytes = file_bytes.ok_or_else(|| ApiError::bad_request("missing file field"))?;
    if file_bytes.is_empty() {
        return Err(ApiError::bad_request("empty upload"));
    }

    let mime = sniff_mime(&file_bytes)
        .ok_or_else(|| ApiError::UnsupportedMediaType("unrecognized container".to_string()))?;
    if !state.config.mime_whitelist.iter().any(|m| m == mime) {
        return Err(ApiError::UnsupportedMediaType(mime.to_string()));
    }

    let path = state.store.write_video(&video_id, &file_bytes).await?;
    info!(video_id = %video_id, bytes = file_bytes.len(), mime, "video ingested");

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            status: "success".to_string(),
            video_id: video_id.to_string(),
            path: path.to_string_lossy().to_string(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_mp4_ftyp() {
        let mut bytes = vec![0, 0, 0, 24];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0; 16]);
        assert_eq!(sniff_mime(&bytes), Some("video/mp4"));
    }

    #[test]
    fn sniffs_quicktime_brand() {
        let mut bytes = vec![0, 0, 0, 20];
        bytes.extend_from_slice(b"ftypqt  ");
        bytes.extend_from_slice(&[0; 16]);
        assert_eq!(sniff_mime(&bytes), Some("video/quicktime"));
    }

    #[test]
    fn sniffs_matroska_ebml() {
        let mut bytes = vec![0x1A, 0x45, 0xDF, 0xA3];
        bytes.extend_from_slice(&[0; 16]);
        assert_eq!(sniff_mime(&bytes), Some("video/x-matroska"));
    }

    #[test]
    fn rejects_unknown_container() {
        assert_eq!(sniff_mime(b"GIF89a trailing data here"), None);
        assert_eq!(sniff_mime(&[]), None);
    }
}
