//! Job store seam.
//!
//! The store owns every atomic transition of a `ProcessingJob`. The
//! broker layers policy and tracing on top; workers never touch the
//! store directly. `MemoryJobStore` keeps the whole table behind a
//! single async mutex, which makes each operation trivially atomic and
//! is sufficient for tests and single-node deployments. The durable
//! multi-process variant lives in [`crate::redis_store`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use vod_models::{JobId, JobState, MediaId, ProcessingJob};

use crate::error::{QueueError, QueueResult};
use crate::policy::RetryPolicy;

/// Snapshot of per-state job counts, used for metrics and health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: u64,
    pub leased: u64,
    pub done: u64,
    pub failed: u64,
}

/// Storage primitive behind the queue broker.
///
/// Implementations must make each method atomic with respect to
/// concurrent callers: in particular `lease_next` may never hand the
/// same job to two workers, and `insert` may never admit a second
/// active job for one media item.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job, rejecting it with `DuplicateJob` if an active
    /// (non-terminal) job already exists for the same media item.
    async fn insert(&self, job: ProcessingJob) -> QueueResult<()>;

    /// Fetch a job by ID.
    async fn get(&self, job_id: &JobId) -> QueueResult<Option<ProcessingJob>>;

    /// Fetch the active (non-terminal) job for a media item, if any.
    async fn find_active_by_media(&self, media_id: &MediaId)
        -> QueueResult<Option<ProcessingJob>>;

    /// Atomically select and lease the eligible job with the lowest
    /// priority value (FIFO within a priority band). Returns `None`
    /// when nothing is eligible.
    async fn lease_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> QueueResult<Option<ProcessingJob>>;

    /// Mark a job done. Fails with `LeaseLost` unless `worker_id`
    /// holds a live lease on it.
    async fn ack(&self, job_id: &JobId, worker_id: &str) -> QueueResult<ProcessingJob>;

    /// Report a failed attempt. Increments `attempt` and either
    /// requeues the job with backoff or terminally fails it. Fails
    /// with `LeaseLost` unless `worker_id` holds a live lease.
    async fn nack(
        &self,
        job_id: &JobId,
        worker_id: &str,
        error: &str,
    ) -> QueueResult<ProcessingJob>;

    /// Return a leased job to `Waiting` without incrementing
    /// `attempt`; used when the worker could not start processing, so
    /// the failure is not the job's. The job becomes eligible again
    /// after the policy's base delay. Fails with `LeaseLost` unless
    /// `worker_id` holds a live lease.
    async fn release(&self, job_id: &JobId, worker_id: &str) -> QueueResult<ProcessingJob>;

    /// Push the lease expiry out by `lease_duration` from now
    /// (worker heartbeat).
    async fn extend_lease(
        &self,
        job_id: &JobId,
        worker_id: &str,
        lease_duration: Duration,
    ) -> QueueResult<()>;

    /// Find jobs whose lease has lapsed while still `Leased` and apply
    /// an implicit nack with a synthetic "lease expired" error.
    /// Returns the jobs as they stand after reclamation.
    async fn reclaim_expired(&self, limit: usize) -> QueueResult<Vec<ProcessingJob>>;

    /// Remove terminal jobs older than `older_than`. Returns how many
    /// were removed.
    async fn purge_terminal(&self, older_than: Duration) -> QueueResult<u64>;

    /// Per-state job counts.
    async fn counts(&self) -> QueueResult<QueueCounts>;
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, ProcessingJob>,
    // media_id -> job_id for non-terminal jobs; maintained on every
    // terminal transition
    active: HashMap<MediaId, JobId>,
}

/// In-memory job store.
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    policy: RetryPolicy,
}

impl MemoryJobStore {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            policy,
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
impl MemoryJobStore {
    /// Collapse a job's backoff window so tests can re-lease it
    /// without sleeping.
    pub(crate) async fn make_eligible(&self, job_id: &JobId) {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(job_id) {
            job.next_eligible_at = Utc::now();
        }
    }
}

/// Apply a failed attempt to `job`: requeue with backoff, or
/// terminally fail once attempts are exhausted.
fn apply_nack(job: &mut ProcessingJob, policy: &RetryPolicy, error: &str) {
    if job.attempt + 1 >= job.max_attempts {
        job.fail(error);
    } else {
        let delay = to_chrono(policy.delay_for_attempt(job.attempt + 1));
        job.requeue(Utc::now() + delay, error);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: ProcessingJob) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(existing_id) = inner.active.get(&job.media_id) {
            // Stale index entries can only point at terminal jobs if a
            // crash interrupted the update; treat those as inactive.
            let active = inner
                .jobs
                .get(existing_id)
                .map(|j| !j.is_terminal())
                .unwrap_or(false);
            if active {
                return Err(QueueError::DuplicateJob(job.media_id.clone()));
            }
        }

        inner.active.insert(job.media_id.clone(), job.job_id.clone());
        inner.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<ProcessingJob>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(job_id).cloned())
    }

    async fn find_active_by_media(
        &self,
        media_id: &MediaId,
    ) -> QueueResult<Option<ProcessingJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .active
            .get(media_id)
            .and_then(|id| inner.jobs.get(id))
            .filter(|j| !j.is_terminal())
            .cloned())
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> QueueResult<Option<ProcessingJob>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let picked = inner
            .jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.job_id.cmp(&b.job_id))
            })
            .map(|j| j.job_id.clone());

        let Some(job_id) = picked else {
            return Ok(None);
        };

        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;
        job.begin_lease(worker_id, to_chrono(lease_duration), now);
        Ok(Some(job.clone()))
    }

    async fn ack(&self, job_id: &JobId, worker_id: &str) -> QueueResult<ProcessingJob> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;

        if !job.holds_lease(worker_id, now) {
            return Err(QueueError::LeaseLost(job_id.clone()));
        }

        job.complete();
        let done = job.clone();
        inner.active.remove(&done.media_id);
        Ok(done)
    }

    async fn nack(
        &self,
        job_id: &JobId,
        worker_id: &str,
        error: &str,
    ) -> QueueResult<ProcessingJob> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;

        if !job.holds_lease(worker_id, now) {
            return Err(QueueError::LeaseLost(job_id.clone()));
        }

        apply_nack(job, &self.policy, error);
        let updated = job.clone();
        if updated.is_terminal() {
            inner.active.remove(&updated.media_id);
        }
        Ok(updated)
    }

    async fn release(&self, job_id: &JobId, worker_id: &str) -> QueueResult<ProcessingJob> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;

        if !job.holds_lease(worker_id, now) {
            return Err(QueueError::LeaseLost(job_id.clone()));
        }

        job.release(now + to_chrono(self.policy.base_delay));
        Ok(job.clone())
    }

    async fn extend_lease(
        &self,
        job_id: &JobId,
        worker_id: &str,
        lease_duration: Duration,
    ) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;

        if !job.holds_lease(worker_id, now) {
            return Err(QueueError::LeaseLost(job_id.clone()));
        }

        job.lease_expires_at = Some(now + to_chrono(lease_duration));
        job.updated_at = now;
        Ok(())
    }

    async fn reclaim_expired(&self, limit: usize) -> QueueResult<Vec<ProcessingJob>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let expired: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.lease_expired(now))
            .take(limit)
            .map(|j| j.job_id.clone())
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for job_id in expired {
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                apply_nack(job, &self.policy, "lease expired");
                let updated = job.clone();
                if updated.is_terminal() {
                    inner.active.remove(&updated.media_id);
                }
                reclaimed.push(updated);
            }
        }
        Ok(reclaimed)
    }

    async fn purge_terminal(&self, older_than: Duration) -> QueueResult<u64> {
        let mut inner = self.inner.lock().await;
        let cutoff = Utc::now() - to_chrono(older_than);

        let stale: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.job_id.clone())
            .collect();

        let count = stale.len() as u64;
        for job_id in stale {
            inner.jobs.remove(&job_id);
        }
        Ok(count)
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let inner = self.inner.lock().await;
        let mut counts = QueueCounts::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Leased => counts.leased += 1,
                JobState::Done => counts.done += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
