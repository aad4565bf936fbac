//! Status events pushed to subscribed clients.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::media::{MediaId, MediaState};

/// Event emitted on every media state transition (and on progress
/// updates in between). Delivery is best-effort: a missed event is
/// acceptable because the next event, or a status poll, carries the
/// latest state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatusEvent {
    /// Media item the event refers to
    #[serde(rename = "mediaId")]
    pub media_id: MediaId,

    /// State at the time of emission
    pub state: MediaState,

    /// Progress percentage (0-100), when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    /// Error text; transient for retried failures, final for `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempt the emitting worker was on
    #[serde(default)]
    pub attempt: u32,

    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    fn base(media_id: MediaId, state: MediaState, attempt: u32) -> Self {
        Self {
            media_id,
            state,
            progress: None,
            error: None,
            attempt,
            timestamp: Utc::now(),
        }
    }

    /// Job was picked up by a worker.
    pub fn processing(media_id: MediaId, attempt: u32) -> Self {
        Self::base(media_id, MediaState::Processing, attempt).with_progress(0)
    }

    /// Mid-task progress update.
    pub fn progress(media_id: MediaId, attempt: u32, progress: u8) -> Self {
        Self::base(media_id, MediaState::Processing, attempt).with_progress(progress)
    }

    /// Attempt failed but will be retried.
    pub fn transient_error(media_id: MediaId, attempt: u32, error: impl Into<String>) -> Self {
        let mut event = Self::base(media_id, MediaState::Processing, attempt);
        event.error = Some(error.into());
        event
    }

    /// Processing completed successfully.
    pub fn ready(media_id: MediaId, attempt: u32) -> Self {
        Self::base(media_id, MediaState::Ready, attempt).with_progress(100)
    }

    /// Processing exhausted its attempts.
    pub fn failed(media_id: MediaId, attempt: u32, error: impl Into<String>) -> Self {
        let mut event = Self::base(media_id, MediaState::Failed, attempt);
        event.error = Some(error.into());
        event
    }

    fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    /// True for `Ready`/`Failed` events; subscribers may close after one.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
