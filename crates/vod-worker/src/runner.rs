//! Lease-driven worker loop.
//!
//! Each worker repeatedly leases a job, reports `Processing` to the
//! catalog before touching the queue again, runs the task under a
//! heartbeat that keeps the lease alive, and finishes with ack or
//! nack. A lost lease is never an error: reclamation already handed
//! the job to someone else, so the worker drops its result and moves
//! on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vod_catalog::MetadataAuthority;
use vod_hub::StatusHub;
use vod_models::{MediaState, ProcessingJob, StateVersion, StateWrite, StatusEvent};
use vod_queue::{NackOutcome, QueueBroker, QueueError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::task::{ProcessTask, ProgressReporter};

/// Expired leases swept per reclaim tick.
const RECLAIM_SWEEP: usize = 100;

/// A single lease-processing loop.
#[derive(Clone)]
pub struct Worker {
    id: String,
    broker: QueueBroker,
    catalog: Arc<dyn MetadataAuthority>,
    hub: StatusHub,
    task: Arc<dyn ProcessTask>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        broker: QueueBroker,
        catalog: Arc<dyn MetadataAuthority>,
        hub: StatusHub,
        task: Arc<dyn ProcessTask>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            broker,
            catalog,
            hub,
            task,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lease and fully process one job. Returns `false` when the queue
    /// had nothing eligible.
    pub async fn poll_once(&self) -> WorkerResult<bool> {
        let Some(job) = self
            .broker
            .lease(&self.id, self.config.lease_duration)
            .await?
        else {
            return Ok(false);
        };

        // The catalog must reflect Processing before any queue report
        // for this attempt. An unreachable catalog is not the job's
        // failure: return the lease uncharged and let the next poll
        // retry the same attempt.
        if let Err(e) = self.mark_processing(&job).await {
            warn!(job_id = %job.job_id, error = %e, "catalog unavailable, returning lease");
            self.release_quiet(&job).await;
            return Ok(true);
        }
        self.hub
            .publish_best_effort(StatusEvent::processing(job.media_id.clone(), job.attempt))
            .await;

        let heartbeat = self.spawn_heartbeat(&job);
        let reporter = ProgressReporter::new(self.hub.clone(), job.clone());
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.job_timeout, self.task.run(&job, &reporter))
            .await
            .unwrap_or(Err(WorkerError::Timeout(self.config.job_timeout.as_secs())));
        heartbeat.abort();
        histogram!("vod_worker_task_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => self.finish_success(&job).await,
            Err(e) => self.finish_failure(&job, &e.to_string()).await,
        }
        Ok(true)
    }

    async fn mark_processing(&self, job: &ProcessingJob) -> WorkerResult<()> {
        let write = StateWrite::new(
            job.media_id.clone(),
            MediaState::Processing,
            StateVersion::for_attempt(job.attempt, 0),
        )
        .with_progress(0);

        match self.catalog.write_state(write).await {
            Ok(_) => Ok(()),
            // A rejected write means a newer attempt or a terminal
            // outcome already owns the record; keep going, versioning
            // will equally reject our final report if it is stale.
            Err(e) if e.is_rejected_write() => {
                warn!(job_id = %job.job_id, error = %e, "processing write rejected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_success(&self, job: &ProcessingJob) {
        let write = StateWrite::new(
            job.media_id.clone(),
            MediaState::Ready,
            StateVersion::terminal(job.attempt),
        )
        .with_progress(100);
        if let Err(e) = self.catalog.write_state(write).await {
            if e.is_rejected_write() {
                warn!(job_id = %job.job_id, error = %e, "ready write rejected");
            } else {
                error!(job_id = %job.job_id, error = %e, "failed to record ready state");
            }
        }

        self.hub
            .publish_best_effort(StatusEvent::ready(job.media_id.clone(), job.attempt))
            .await;

        match self.broker.ack(&job.job_id, &self.id).await {
            Ok(()) => {
                counter!("vod_worker_jobs_completed_total").increment(1);
                info!(job_id = %job.job_id, media_id = %job.media_id, "job done");
            }
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %job.job_id, "lease lost before ack, result dropped")
            }
            Err(e) => error!(job_id = %job.job_id, error = %e, "ack failed"),
        }
    }

    async fn finish_failure(&self, job: &ProcessingJob, error: &str) {
        match self.broker.nack(&job.job_id, &self.id, error).await {
            Ok(NackOutcome::Retry { attempt, .. }) => {
                counter!("vod_worker_jobs_retried_total").increment(1);
                self.hub
                    .publish_best_effort(StatusEvent::transient_error(
                        job.media_id.clone(),
                        attempt,
                        error,
                    ))
                    .await;
            }
            Ok(NackOutcome::Failed { attempt }) => {
                counter!("vod_worker_jobs_failed_total").increment(1);
                record_terminal_failure(&self.catalog, &self.hub, job, attempt, error).await;
            }
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %job.job_id, "lease lost before nack, report dropped")
            }
            Err(e) => error!(job_id = %job.job_id, error = %e, "nack failed"),
        }
    }

    /// Return the lease without charging an attempt; used when
    /// processing never started.
    async fn release_quiet(&self, job: &ProcessingJob) {
        if let Err(e) = self.broker.release(&job.job_id, &self.id).await {
            if !matches!(e, QueueError::LeaseLost(_)) {
                error!(job_id = %job.job_id, error = %e, "release failed");
            }
        }
    }

    fn spawn_heartbeat(&self, job: &ProcessingJob) -> tokio::task::JoinHandle<()> {
        let broker = self.broker.clone();
        let worker_id = self.id.clone();
        let job_id = job.job_id.clone();
        let lease_duration = self.config.lease_duration;
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match broker.extend_lease(&job_id, &worker_id, lease_duration).await {
                    Ok(()) => debug!(job_id = %job_id, "lease extended"),
                    Err(QueueError::LeaseLost(_)) => {
                        warn!(job_id = %job_id, "lease lost during heartbeat");
                        break;
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                }
            }
        })
    }
}

/// Record a terminal failure in the catalog and fan it out.
async fn record_terminal_failure(
    catalog: &Arc<dyn MetadataAuthority>,
    hub: &StatusHub,
    job: &ProcessingJob,
    attempt: u32,
    error: &str,
) {
    let write = StateWrite::new(
        job.media_id.clone(),
        MediaState::Failed,
        StateVersion::terminal(attempt.saturating_sub(1)),
    )
    .with_error(error);
    if let Err(e) = catalog.write_state(write).await {
        if e.is_rejected_write() {
            warn!(job_id = %job.job_id, error = %e, "failed write rejected");
        } else {
            error!(job_id = %job.job_id, error = %e, "failed to record failed state");
        }
    }

    hub.publish_best_effort(StatusEvent::failed(job.media_id.clone(), attempt, error))
        .await;
}

/// A fixed-size pool of workers plus the background reclaim sweep.
pub struct WorkerPool {
    workers: Vec<Worker>,
    broker: QueueBroker,
    catalog: Arc<dyn MetadataAuthority>,
    hub: StatusHub,
    config: WorkerConfig,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(
        broker: QueueBroker,
        catalog: Arc<dyn MetadataAuthority>,
        hub: StatusHub,
        task: Arc<dyn ProcessTask>,
        config: WorkerConfig,
    ) -> Self {
        let base = format!("worker-{}", Uuid::new_v4());
        let workers = (0..config.concurrency)
            .map(|i| {
                Worker::new(
                    format!("{base}-{i}"),
                    broker.clone(),
                    Arc::clone(&catalog),
                    hub.clone(),
                    Arc::clone(&task),
                    config.clone(),
                )
            })
            .collect();
        let (shutdown, _) = watch::channel(false);

        Self {
            workers,
            broker,
            catalog,
            hub,
            config,
            shutdown,
        }
    }

    /// Signal handle for a graceful stop.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Run until shutdown is signaled, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            concurrency = self.config.concurrency,
            "starting worker pool"
        );

        let mut handles = Vec::with_capacity(self.workers.len() + 1);
        for worker in &self.workers {
            let worker = worker.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            let poll_interval = self.config.poll_interval;

            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                info!(worker_id = worker.id(), "worker stopping");
                                break;
                            }
                        }
                        result = worker.poll_once() => {
                            match result {
                                Ok(true) => {}
                                Ok(false) => tokio::time::sleep(poll_interval).await,
                                Err(e) => {
                                    error!(worker_id = worker.id(), error = %e, "poll failed");
                                    tokio::time::sleep(Duration::from_secs(5)).await;
                                }
                            }
                        }
                    }
                }
            }));
        }
        handles.push(self.spawn_reclaim_sweep());

        for handle in handles {
            let _ = tokio::time::timeout(self.config.shutdown_timeout, handle).await;
        }
        info!("worker pool stopped");
        Ok(())
    }

    /// Periodically sweep expired leases. A sweep that exhausts a
    /// job's attempts is the only failure path with no live worker,
    /// so the terminal state is recorded here.
    fn spawn_reclaim_sweep(&self) -> tokio::task::JoinHandle<()> {
        let broker = self.broker.clone();
        let catalog = Arc::clone(&self.catalog);
        let hub = self.hub.clone();
        let interval = self.config.reclaim_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match broker.reclaim_expired(RECLAIM_SWEEP).await {
                            Ok(reclaimed) => {
                                if !reclaimed.is_empty() {
                                    counter!("vod_worker_leases_reclaimed_total")
                                        .increment(reclaimed.len() as u64);
                                }
                                for job in reclaimed {
                                    if job.is_terminal() {
                                        record_terminal_failure(
                                            &catalog,
                                            &hub,
                                            &job,
                                            job.attempt,
                                            job.last_error.as_deref().unwrap_or("lease expired"),
                                        )
                                        .await;
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "reclaim sweep failed"),
                        }
                    }
                }
            }
        })
    }
}
