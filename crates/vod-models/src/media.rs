//! Media state as recorded by the metadata authority.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a media item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl MediaId {
    /// Generate a new random media ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
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

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MediaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MediaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media processing status. Exactly one authoritative value exists per
/// media item; the only legal edges are
/// `Uploading -> Processing -> {Ready | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    /// Raw upload is in flight
    #[default]
    Uploading,
    /// A worker is producing renditions
    Processing,
    /// Renditions are available (terminal)
    Ready,
    /// Processing exhausted its attempts (terminal)
    Failed,
}

impl MediaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaState::Uploading => "uploading",
            MediaState::Processing => "processing",
            MediaState::Ready => "ready",
            MediaState::Failed => "failed",
        }
    }

    /// Terminal states accept no further writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaState::Ready | MediaState::Failed)
    }

    /// Whether `next` is reachable from this state. Self-edges are
    /// allowed for `Processing` (a retried attempt re-asserts it).
    pub fn can_transition_to(&self, next: MediaState) -> bool {
        match (self, next) {
            (MediaState::Uploading, MediaState::Processing) => true,
            (MediaState::Processing, MediaState::Processing) => true,
            (MediaState::Processing, MediaState::Ready) => true,
            (MediaState::Processing, MediaState::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Monotonic version carried with every state write.
///
/// Versions are banded by attempt so a write from a dead lease can
/// never supersede a later attempt: `(attempt + 1) * STRIDE + seq`,
/// with terminal writes pinned to the top of their band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct StateVersion(pub u64);

impl StateVersion {
    const STRIDE: u64 = 1000;
    const TERMINAL_SEQ: u64 = Self::STRIDE - 1;

    /// Initial version written when the catalog record is created.
    pub const INITIAL: StateVersion = StateVersion(0);

    /// Version for the `seq`-th write of attempt `attempt`.
    ///
    /// `seq` must stay below the terminal slot; callers emitting more
    /// than ~1000 writes per attempt are misusing the catalog.
    pub fn for_attempt(attempt: u32, seq: u64) -> Self {
        let seq = seq.min(Self::TERMINAL_SEQ - 1);
        Self((attempt as u64 + 1) * Self::STRIDE + seq)
    }

    /// Version for the terminal write of attempt `attempt`. Outranks
    /// every non-terminal write of the same and all earlier attempts.
    pub fn terminal(attempt: u32) -> Self {
        Self((attempt as u64 + 1) * Self::STRIDE + Self::TERMINAL_SEQ)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authoritative media record held by the metadata authority.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MediaRecord {
    /// Media item ID
    pub media_id: MediaId,

    /// Current processing state
    pub state: MediaState,

    /// Version of the last accepted write (strictly increasing)
    pub version: StateVersion,

    /// Object-storage key of the raw upload
    pub source_key: String,

    /// Last reported progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Error message, set on terminal failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp (staleness probe for reconciliation)
    pub updated_at: DateTime<Utc>,
}

impl MediaRecord {
    /// Create a fresh record in `Uploading` state.
    pub fn new(media_id: MediaId, source_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            media_id,
            state: MediaState::Uploading,
            version: StateVersion::INITIAL,
            source_key: source_key.into(),
            progress: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True if the record has sat in `Processing` longer than
    /// `threshold_secs` without an update.
    pub fn is_stuck(&self, threshold_secs: i64, now: DateTime<Utc>) -> bool {
        self.state == MediaState::Processing
            && (now - self.updated_at).num_seconds() > threshold_secs
    }
}

/// A single versioned state write submitted to the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateWrite {
    pub media_id: MediaId,
    pub state: MediaState,
    pub version: StateVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateWrite {
    pub fn new(media_id: MediaId, state: MediaState, version: StateVersion) -> Self {
        Self {
            media_id,
            state,
            version,
            progress: None,
            error: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
