//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Prep failed: {0}")]
    PrepFailed(String),

    #[error("Job aborted")]
    Aborted,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("VL endpoint error: {0}")]
    Vl(String),

    #[error("VL parse failed: {0}")]
    VlParse(String),

    #[error("Media error: {0}")]
    Media(#[from] vab_media::MediaError),

    #[error("Store error: {0}")]
    Store(#[from] vab_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vab_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn prep_failed(msg: impl Into<String>) -> Self {
        Self::PrepFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn vl(msg: impl Into<String>) -> Self {
        Self::Vl(msg.into())
    }
}
