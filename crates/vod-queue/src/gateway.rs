//! Enqueue gateway: the single entry point for submitting work.
//!
//! Submission is idempotent per media item: a second submit while a
//! non-terminal job exists yields `DuplicateJob`, and a submit after
//! the previous job finished starts a fresh attempt chain.

use std::sync::Arc;

use tracing::info;

use vod_models::{JobHandle, MediaId, ProcessingJob};

use crate::error::{QueueError, QueueResult};
use crate::store::JobStore;

/// Gateway over the job store insert path.
#[derive(Clone)]
pub struct EnqueueGateway {
    store: Arc<dyn JobStore>,
    max_attempts: u32,
}

impl EnqueueGateway {
    pub fn new(store: Arc<dyn JobStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// Submit a processing job for `media_id`.
    ///
    /// Returns the handle of the admitted job, `DuplicateJob` if an
    /// active job already covers the media item, or `StoreUnavailable`
    /// if the write could not be durably committed.
    pub async fn submit(
        &self,
        media_id: MediaId,
        source_key: impl Into<String>,
        priority: i32,
    ) -> QueueResult<JobHandle> {
        let job = ProcessingJob::new(media_id, source_key, priority)
            .with_max_attempts(self.max_attempts);
        let handle = JobHandle {
            job_id: job.job_id.clone(),
            media_id: job.media_id.clone(),
        };

        match self.store.insert(job).await {
            Ok(()) => {
                info!(
                    job_id = %handle.job_id,
                    media_id = %handle.media_id,
                    priority,
                    "job submitted"
                );
                Ok(handle)
            }
            Err(QueueError::DuplicateJob(media_id)) => Err(QueueError::DuplicateJob(media_id)),
            // Infrastructure failures surface as StoreUnavailable so
            // callers know the submit may be retried verbatim.
            Err(e) if e.is_transient() => Err(QueueError::store_unavailable(e.to_string())),
            Err(e) => Err(e),
        }
    }
}
