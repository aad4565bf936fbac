//! Catalog error types.

use thiserror::Error;
use vod_models::{MediaId, MediaState, StateVersion};

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Media not found: {0}")]
    NotFound(MediaId),

    #[error("Media already exists: {0}")]
    AlreadyExists(MediaId),

    /// The write carried a version at or below the stored one. Usually
    /// a report from a dead lease arriving after a newer attempt.
    #[error("Stale write for {media_id}: version {attempted} <= stored {stored}")]
    StaleWrite {
        media_id: MediaId,
        attempted: StateVersion,
        stored: StateVersion,
    },

    /// The write asked for a transition the state machine forbids,
    /// including any write against a terminal record.
    #[error("Illegal transition for {media_id}: {from} -> {to}")]
    IllegalTransition {
        media_id: MediaId,
        from: MediaState,
        to: MediaState,
    },

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// True for errors a caller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_) | CatalogError::Redis(_))
    }

    /// True when the write lost an ordering race and should simply be
    /// dropped by the caller.
    pub fn is_rejected_write(&self) -> bool {
        matches!(
            self,
            CatalogError::StaleWrite { .. } | CatalogError::IllegalTransition { .. }
        )
    }
}
