//! API configuration.

/// API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Allowed CORS origins (empty = allow any)
    pub cors_origins: Vec<String>,
    /// Upload size limit in megabytes
    pub max_video_mb: u64,
    /// Accepted upload MIME types
    pub mime_whitelist: Vec<String>,
    /// VL endpoint base, probed by `/health`
    pub vl_api_base: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            max_video_mb: 1000,
            mime_whitelist: vec![
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
                "video/x-matroska".to_string(),
            ],
            vl_api_base: "http://localhost:8000/v1".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            max_video_mb: std::env::var("MAX_VIDEO_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_video_mb),
            mime_whitelist: std::env::var("MIME_WHITELIST")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.mime_whitelist),
            vl_api_base: std::env::var("VL_API_BASE").unwrap_or(defaults.vl_api_base),
        }
    }

    /// Upload size limit in bytes.
    pub fn max_video_bytes(&self) -> u64 {
        self.max_video_mb * 1024 * 1024
    }
}
