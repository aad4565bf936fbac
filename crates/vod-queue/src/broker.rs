//! Queue broker: the lease/ack/nack surface workers talk to.
//!
//! Wraps a [`JobStore`] and adds lazy reclamation: every lease attempt
//! first sweeps a bounded batch of expired leases back to `Waiting`,
//! so stuck leases recover even without a dedicated sweeper running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use vod_models::{JobId, MediaId, ProcessingJob};

use crate::error::QueueResult;
use crate::store::{JobStore, QueueCounts};

/// Expired leases swept per lease call.
const RECLAIM_BATCH: usize = 32;

/// Outcome of a negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// The job was requeued for another attempt.
    Retry {
        attempt: u32,
        next_eligible_at: DateTime<Utc>,
    },
    /// The job exhausted its attempts and is terminally failed.
    Failed { attempt: u32 },
}

/// Broker over a durable job store.
#[derive(Clone)]
pub struct QueueBroker {
    store: Arc<dyn JobStore>,
}

impl QueueBroker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Lease the next eligible job for `worker_id`, or `None` if the
    /// queue is empty. Expired leases are reclaimed first.
    pub async fn lease(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> QueueResult<Option<ProcessingJob>> {
        let reclaimed = self.store.reclaim_expired(RECLAIM_BATCH).await?;
        for job in &reclaimed {
            warn!(
                job_id = %job.job_id,
                media_id = %job.media_id,
                attempt = job.attempt,
                "reclaimed expired lease"
            );
        }

        let leased = self.store.lease_next(worker_id, lease_duration).await?;
        if let Some(job) = &leased {
            info!(
                job_id = %job.job_id,
                media_id = %job.media_id,
                worker_id,
                attempt = job.attempt,
                "leased job"
            );
        }
        Ok(leased)
    }

    /// Acknowledge successful completion. Fails with `LeaseLost` if the
    /// worker no longer holds a live lease.
    pub async fn ack(&self, job_id: &JobId, worker_id: &str) -> QueueResult<()> {
        let job = self.store.ack(job_id, worker_id).await?;
        info!(job_id = %job.job_id, media_id = %job.media_id, "job completed");
        Ok(())
    }

    /// Report a failed attempt. The store either schedules a retry with
    /// backoff or terminally fails the job once attempts are exhausted.
    pub async fn nack(
        &self,
        job_id: &JobId,
        worker_id: &str,
        error: &str,
    ) -> QueueResult<NackOutcome> {
        let job = self.store.nack(job_id, worker_id, error).await?;
        if job.is_terminal() {
            warn!(
                job_id = %job.job_id,
                media_id = %job.media_id,
                attempt = job.attempt,
                error,
                "job failed terminally"
            );
            Ok(NackOutcome::Failed {
                attempt: job.attempt,
            })
        } else {
            info!(
                job_id = %job.job_id,
                media_id = %job.media_id,
                attempt = job.attempt,
                next_eligible_at = %job.next_eligible_at,
                error,
                "job requeued for retry"
            );
            Ok(NackOutcome::Retry {
                attempt: job.attempt,
                next_eligible_at: job.next_eligible_at,
            })
        }
    }

    /// Return a leased job to the queue without charging an attempt;
    /// used when the worker could not start processing at all.
    pub async fn release(&self, job_id: &JobId, worker_id: &str) -> QueueResult<()> {
        let job = self.store.release(job_id, worker_id).await?;
        info!(
            job_id = %job.job_id,
            media_id = %job.media_id,
            attempt = job.attempt,
            next_eligible_at = %job.next_eligible_at,
            "lease returned"
        );
        Ok(())
    }

    /// Extend the caller's lease by `lease_duration` from now.
    pub async fn extend_lease(
        &self,
        job_id: &JobId,
        worker_id: &str,
        lease_duration: Duration,
    ) -> QueueResult<()> {
        self.store
            .extend_lease(job_id, worker_id, lease_duration)
            .await
    }

    /// Sweep up to `limit` expired leases back to the waiting set.
    pub async fn reclaim_expired(&self, limit: usize) -> QueueResult<Vec<ProcessingJob>> {
        self.store.reclaim_expired(limit).await
    }

    /// Drop terminal jobs older than `older_than`.
    pub async fn purge_terminal(&self, older_than: Duration) -> QueueResult<u64> {
        self.store.purge_terminal(older_than).await
    }

    /// Fetch a job by ID.
    pub async fn get(&self, job_id: &JobId) -> QueueResult<Option<ProcessingJob>> {
        self.store.get(job_id).await
    }

    /// Find the active (non-terminal) job for a media item, if any.
    pub async fn find_active_by_media(
        &self,
        media_id: &MediaId,
    ) -> QueueResult<Option<ProcessingJob>> {
        self.store.find_active_by_media(media_id).await
    }

    /// Per-state queue depths.
    pub async fn counts(&self) -> QueueResult<QueueCounts> {
        self.store.counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RetryPolicy;
    use crate::store::MemoryJobStore;

    fn broker() -> (QueueBroker, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new(RetryPolicy::default()));
        (QueueBroker::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_lease_empty_queue() {
        let (broker, _) = broker();
        let leased = broker
            .lease("worker-1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(leased.is_none());
    }

    #[tokio::test]
    async fn test_nack_reports_retry_then_failed() {
        let (broker, store) = broker();
        let job = ProcessingJob::new(MediaId::new(), "uploads/raw.mp4", 5).with_max_attempts(2);
        let job_id = job.job_id.clone();
        store.insert(job).await.unwrap();

        broker
            .lease("worker-1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let outcome = broker.nack(&job_id, "worker-1", "boom").await.unwrap();
        assert!(matches!(outcome, NackOutcome::Retry { attempt: 1, .. }));

        // Collapse the backoff window so the retry leases immediately.
        store.make_eligible(&job_id).await;

        broker
            .lease("worker-1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let outcome = broker.nack(&job_id, "worker-1", "boom again").await.unwrap();
        assert_eq!(outcome, NackOutcome::Failed { attempt: 2 });
    }

    #[tokio::test]
    async fn test_lease_reclaims_expired_first() {
        let (broker, store) = broker();
        let job = ProcessingJob::new(MediaId::new(), "uploads/raw.mp4", 5);
        let job_id = job.job_id.clone();
        store.insert(job).await.unwrap();

        // Zero-length lease expires immediately.
        broker
            .lease("worker-1", Duration::from_secs(0))
            .await
            .unwrap()
            .unwrap();

        // Sweep the expired lease, then collapse the retry backoff so
        // the job can be leased again right away.
        let reclaimed = broker.reclaim_expired(10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        store.make_eligible(&job_id).await;

        let leased = broker
            .lease("worker-2", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.job_id, job_id);
        assert_eq!(leased.attempt, 1);
        assert_eq!(leased.lease_owner.as_deref(), Some("worker-2"));
    }
}
