//! Redis-backed job queue and job table.
//!
//! The queue is a Redis Stream with a consumer group: jobs survive restarts,
//! crashed workers' jobs are reclaimed after an idle timeout, and repeatedly
//! failing jobs land in a dead-letter stream. The job table is a plain
//! key-value record per `video_id` holding the serialized [`VideoJob`].

pub mod error;
pub mod job;
pub mod queue;
pub mod table;

pub use error::{QueueError, QueueResult};
pub use job::AnalyzeJob;
pub use queue::{JobQueue, QueueConfig};
pub use table::JobTable;
