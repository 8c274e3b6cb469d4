//! Application state.

use std::sync::Arc;

use vab_queue::{JobQueue, JobTable};
use vab_store::VideoStore;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: VideoStore,
    pub queue: Arc<JobQueue>,
    pub table: Arc<JobTable>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Create new application state from the environment.
    pub fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = VideoStore::from_env();
        let queue = JobQueue::from_env()?;
        let table = JobTable::from_env()?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self {
            config,
            store,
            queue: Arc::new(queue),
            table: Arc::new(table),
            http,
        })
    }
}
