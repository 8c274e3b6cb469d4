//! Identifier newtypes.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derive the job ID for a video, matching the `job_<video_id>` form
    /// surfaced by the HTTP API.
    pub fn for_video(video_id: &VideoId) -> Self {
        Self(format!("job_{}", video_id))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied video identifier. Keys the job table and the on-disk store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject ids that could escape the store directory or collide with the
    /// on-disk layout.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Format a shot identifier (`sh_000`, `sh_001`, ...).
pub fn shot_id(index: usize) -> String {
    format!("sh_{:03}", index)
}

/// Format a scene identifier (`sc_000`, `sc_001`, ...).
pub fn scene_id(index: usize) -> String {
    format!("sc_{:03}", index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_id_validation() {
        assert!(VideoId::new("t1").is_valid());
        assert!(VideoId::new("abc-DEF_123").is_valid());
        assert!(!VideoId::new("").is_valid());
        assert!(!VideoId::new("../etc/passwd").is_valid());
        assert!(!VideoId::new("a/b").is_valid());
    }

    #[test]
    fn job_id_for_video() {
        let id = JobId::for_video(&VideoId::new("t1"));
        assert_eq!(id.as_str(), "job_t1");
    }

    #[test]
    fn id_formatting() {
        assert_eq!(shot_id(7), "sh_007");
        assert_eq!(scene_id(12), "sc_012");
    }
}
