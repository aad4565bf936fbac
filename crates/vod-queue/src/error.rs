//! Queue error types.

use thiserror::Error;
use vod_models::{JobId, MediaId};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// An active (non-terminal) job already exists for the media item.
    /// Not retried by the gateway; the caller already got what it wanted.
    #[error("Duplicate job for media {0}")]
    DuplicateJob(MediaId),

    /// The job store write could not be durably committed. Transient;
    /// callers retry with backoff.
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller tried to ack/nack/extend a job it no longer holds.
    /// Treated as a no-op by workers: reclamation already reassigned
    /// the job.
    #[error("Lease lost on job {0}")]
    LeaseLost(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// True for errors a caller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::StoreUnavailable(_) | QueueError::Redis(_))
    }
}
