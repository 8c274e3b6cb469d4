//! Axum HTTP boundary.
//!
//! A thin adapter over the job manager: `analyze` enqueues, `ingest` stores
//! an upload, `status`/`result` read the job table and the persisted bundle,
//! `health` probes the collaborators. All analysis work happens in the
//! worker.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
