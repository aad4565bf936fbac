//! Processing job definitions for queue scheduling.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::media::MediaId;

/// Default priority for submitted jobs. Lower values are more urgent.
pub const DEFAULT_PRIORITY: i32 = 5;

/// How many times a job may fail before it becomes terminally failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
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

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is eligible (or scheduled) for leasing
    #[default]
    Waiting,
    /// Job is held by a worker under an unexpired lease
    Leased,
    /// Job completed successfully (terminal)
    Done,
    /// Job exhausted its attempts (terminal)
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Leased => "leased",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A media processing job as stored by the queue broker.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingJob {
    /// Unique job ID
    pub job_id: JobId,

    /// Media item this job processes. At most one non-terminal job
    /// may exist per media ID at any time.
    pub media_id: MediaId,

    /// Object-storage key of the raw upload
    pub source_key: String,

    /// Priority; lower values are leased first
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Number of failed attempts so far. Incremented on nack.
    #[serde(default)]
    pub attempt: u32,

    /// Maximum failed attempts before the job is terminally failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Job is invisible to lease until this instant (retry backoff)
    pub next_eligible_at: DateTime<Utc>,

    /// Last error reported by a worker, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Worker currently holding the lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,

    /// When the current lease auto-expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Queue state
    #[serde(default)]
    pub state: JobState,

    /// Creation timestamp (FIFO tie-break within a priority band)
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl ProcessingJob {
    /// Create a new job in `Waiting` state, eligible immediately.
    pub fn new(media_id: MediaId, source_key: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            media_id,
            source_key: source_key.into(),
            priority,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_eligible_at: now,
            last_error: None,
            lease_owner: None,
            lease_expires_at: None,
            state: JobState::Waiting,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the max-attempts policy value.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// True once the job has reached `Done` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True if the job may be handed to a worker right now.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && now >= self.next_eligible_at
    }

    /// True if the job is leased but its lease has lapsed.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Leased
            && self.lease_expires_at.map(|at| at < now).unwrap_or(true)
    }

    /// True if `worker_id` holds a live lease on this job.
    pub fn holds_lease(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.state == JobState::Leased
            && self.lease_owner.as_deref() == Some(worker_id)
            && self.lease_expires_at.map(|at| at >= now).unwrap_or(false)
    }

    /// Mark the job leased by `worker_id` for `lease_duration`.
    pub fn begin_lease(&mut self, worker_id: &str, lease_duration: Duration, now: DateTime<Utc>) {
        self.state = JobState::Leased;
        self.lease_owner = Some(worker_id.to_string());
        self.lease_expires_at = Some(now + lease_duration);
        self.updated_at = now;
    }

    /// Clear the lease and return the job to `Waiting`, scheduling the
    /// next attempt at `next_eligible_at`.
    pub fn requeue(&mut self, next_eligible_at: DateTime<Utc>, error: impl Into<String>) {
        self.state = JobState::Waiting;
        self.attempt += 1;
        self.next_eligible_at = next_eligible_at;
        self.last_error = Some(error.into());
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = Utc::now();
    }

    /// Clear the lease and return the job to `Waiting` without
    /// charging an attempt. Used when the worker never started
    /// processing (for example, the catalog was unreachable).
    pub fn release(&mut self, next_eligible_at: DateTime<Utc>) {
        self.state = JobState::Waiting;
        self.next_eligible_at = next_eligible_at;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = Utc::now();
    }

    /// Mark the job terminally failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.attempt += 1;
        self.last_error = Some(error.into());
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = Utc::now();
    }

    /// Mark the job successfully completed.
    pub fn complete(&mut self) {
        self.state = JobState::Done;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = Utc::now();
    }
}

/// Handle returned to callers on successful submission.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobHandle {
    /// Queue-assigned job ID
    pub job_id: JobId,
    /// Media item the job belongs to
    pub media_id: MediaId,
}
