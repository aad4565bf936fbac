//! End-to-end pipeline tests over the in-memory store and catalog.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vod_catalog::{CatalogError, CatalogResult, MemoryCatalog, MetadataAuthority};
use vod_hub::StatusHub;
use vod_models::{MediaId, MediaRecord, MediaState, ProcessingJob, StateWrite, StatusEvent};
use vod_queue::{
    EnqueueGateway, JobStore, MemoryJobStore, QueueBroker, QueueError, RetryPolicy,
};
use vod_worker::{ProcessTask, ProgressReporter, Worker, WorkerConfig, WorkerResult};

/// Task that replays a scripted sequence of outcomes, then succeeds.
struct ScriptedTask {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    runs: AtomicU32,
}

impl ScriptedTask {
    fn new(outcomes: Vec<Result<(), String>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            runs: AtomicU32::new(0),
        })
    }

    fn always_ok() -> Arc<Self> {
        Self::new(vec![])
    }

    fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessTask for ScriptedTask {
    async fn run(&self, _job: &ProcessingJob, progress: &ProgressReporter) -> WorkerResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        progress.report(50).await;
        match self.outcomes.lock().await.pop_front() {
            Some(Ok(())) | None => Ok(()),
            Some(Err(msg)) => Err(vod_worker::WorkerError::TranscodeFailed(msg)),
        }
    }
}

/// Catalog whose writes fail as unavailable a scripted number of
/// times before recovering.
struct FlakyCatalog {
    inner: MemoryCatalog,
    write_failures_left: Mutex<u32>,
}

impl FlakyCatalog {
    fn failing_writes(count: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCatalog::new(),
            write_failures_left: Mutex::new(count),
        })
    }
}

#[async_trait]
impl MetadataAuthority for FlakyCatalog {
    async fn create(&self, record: MediaRecord) -> CatalogResult<()> {
        self.inner.create(record).await
    }

    async fn read(&self, media_id: &MediaId) -> CatalogResult<MediaRecord> {
        self.inner.read(media_id).await
    }

    async fn write_state(&self, write: StateWrite) -> CatalogResult<MediaRecord> {
        {
            let mut left = self.write_failures_left.lock().await;
            if *left > 0 {
                *left -= 1;
                return Err(CatalogError::unavailable("connection refused"));
            }
        }
        self.inner.write_state(write).await
    }

    async fn list_stuck(&self, threshold_secs: i64) -> CatalogResult<Vec<MediaRecord>> {
        self.inner.list_stuck(threshold_secs).await
    }
}

struct Pipeline {
    store: Arc<MemoryJobStore>,
    catalog: Arc<MemoryCatalog>,
    hub: StatusHub,
    gateway: EnqueueGateway,
    broker: QueueBroker,
}

/// Zero backoff so retries are immediately leasable.
fn pipeline(max_attempts: u32) -> Pipeline {
    let store = Arc::new(MemoryJobStore::new(RetryPolicy::new(
        Duration::ZERO,
        Duration::ZERO,
    )));
    Pipeline {
        store: store.clone(),
        catalog: Arc::new(MemoryCatalog::new()),
        hub: StatusHub::in_process(),
        gateway: EnqueueGateway::new(store.clone(), max_attempts),
        broker: QueueBroker::new(store),
    }
}

fn worker(p: &Pipeline, id: &str, task: Arc<dyn ProcessTask>) -> Worker {
    let config = WorkerConfig {
        concurrency: 1,
        lease_duration: Duration::from_secs(60),
        heartbeat_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(10),
        reclaim_interval: Duration::from_millis(50),
        job_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(1),
        work_dir: "/tmp/vodforge-test".to_string(),
    };
    Worker::new(
        id,
        p.broker.clone(),
        p.catalog.clone(),
        p.hub.clone(),
        task,
        config,
    )
}

async fn submit(p: &Pipeline, media_id: &MediaId) -> vod_models::JobHandle {
    p.catalog
        .create(MediaRecord::new(media_id.clone(), "uploads/raw.mp4"))
        .await
        .unwrap();
    p.gateway
        .submit(media_id.clone(), "uploads/raw.mp4", 5)
        .await
        .unwrap()
}

fn drain(receiver: &mut tokio::sync::broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_successful_processing() {
    let p = pipeline(3);
    let media_id = MediaId::new();
    let mut receiver = p.hub.subscribe(&media_id).await.unwrap();

    let handle = submit(&p, &media_id).await;
    let worker = worker(&p, "w1", ScriptedTask::always_ok());

    assert!(worker.poll_once().await.unwrap());

    let record = p.catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Ready);
    assert_eq!(record.progress, 100);

    let job = p.store.get(&handle.job_id).await.unwrap().unwrap();
    assert!(job.is_terminal());
    assert_eq!(job.attempt, 0);

    let events = drain(&mut receiver);
    let states: Vec<MediaState> = events.iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            MediaState::Processing,
            MediaState::Processing,
            MediaState::Ready
        ]
    );
    assert_eq!(events[1].progress, Some(50));
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let p = pipeline(3);
    let media_id = MediaId::new();
    let mut receiver = p.hub.subscribe(&media_id).await.unwrap();

    let handle = submit(&p, &media_id).await;
    let task = ScriptedTask::new(vec![Err("ffmpeg exited 1".to_string()), Ok(())]);
    let worker = worker(&p, "w1", task);

    // First attempt fails and is requeued.
    assert!(worker.poll_once().await.unwrap());
    let record = p.catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Processing);
    let job = p.store.get(&handle.job_id).await.unwrap().unwrap();
    assert_eq!(job.attempt, 1);
    assert!(!job.is_terminal());

    // Second attempt succeeds.
    assert!(worker.poll_once().await.unwrap());
    let record = p.catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Ready);

    let events = drain(&mut receiver);
    assert!(events
        .iter()
        .any(|e| e.error.as_deref() == Some("Transcode failed: ffmpeg exited 1")
            && !e.is_terminal()));
    assert!(events.last().unwrap().is_terminal());
    assert_eq!(events.last().unwrap().state, MediaState::Ready);
}

#[tokio::test]
async fn test_two_failures_then_success_on_final_attempt() {
    let p = pipeline(3);
    let media_id = MediaId::new();
    let mut receiver = p.hub.subscribe(&media_id).await.unwrap();

    let handle = submit(&p, &media_id).await;
    let task = ScriptedTask::new(vec![
        Err("ffmpeg exited 1".to_string()),
        Err("ffmpeg exited 1".to_string()),
        Ok(()),
    ]);
    let worker = worker(&p, "w1", task);

    assert!(worker.poll_once().await.unwrap());
    assert!(worker.poll_once().await.unwrap());
    assert!(worker.poll_once().await.unwrap());

    // Succeeded on the last allowed attempt.
    let job = p.store.get(&handle.job_id).await.unwrap().unwrap();
    assert!(job.is_terminal());
    assert_eq!(job.attempt, 2);

    let record = p.catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Ready);

    let events = drain(&mut receiver);
    let transient: Vec<_> = events
        .iter()
        .filter(|e| e.error.is_some() && !e.is_terminal())
        .collect();
    assert_eq!(transient.len(), 2);
    assert!(events.iter().all(|e| e.state != MediaState::Failed));
    assert_eq!(events.last().unwrap().state, MediaState::Ready);
    assert_eq!(events.last().unwrap().attempt, 2);
}

#[tokio::test]
async fn test_catalog_outage_releases_lease_without_charging_attempt() {
    let store = Arc::new(MemoryJobStore::new(RetryPolicy::new(
        Duration::ZERO,
        Duration::ZERO,
    )));
    let catalog = FlakyCatalog::failing_writes(2);
    let hub = StatusHub::in_process();
    let gateway = EnqueueGateway::new(store.clone(), 3);
    let broker = QueueBroker::new(store.clone());

    let media_id = MediaId::new();
    let mut receiver = hub.subscribe(&media_id).await.unwrap();
    catalog
        .create(MediaRecord::new(media_id.clone(), "uploads/raw.mp4"))
        .await
        .unwrap();
    let handle = gateway
        .submit(media_id.clone(), "uploads/raw.mp4", 5)
        .await
        .unwrap();

    let task = ScriptedTask::always_ok();
    let worker = Worker::new(
        "w1",
        broker,
        catalog.clone(),
        hub.clone(),
        task.clone(),
        WorkerConfig {
            concurrency: 1,
            lease_duration: Duration::from_secs(60),
            heartbeat_interval: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            reclaim_interval: Duration::from_millis(50),
            job_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(1),
            work_dir: "/tmp/vodforge-test".to_string(),
        },
    );

    // Two polls hit the outage: the lease comes back each time with no
    // attempt charged and the task never runs.
    for _ in 0..2 {
        assert!(worker.poll_once().await.unwrap());
        let job = store.get(&handle.job_id).await.unwrap().unwrap();
        assert_eq!(job.attempt, 0);
        assert!(!job.is_terminal());
        assert_eq!(task.runs(), 0);
    }

    // Catalog back up: the same attempt chain runs to completion.
    assert!(worker.poll_once().await.unwrap());
    let job = store.get(&handle.job_id).await.unwrap().unwrap();
    assert!(job.is_terminal());
    assert_eq!(job.attempt, 0);
    assert_eq!(task.runs(), 1);

    let record = catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Ready);

    let events = drain(&mut receiver);
    assert!(events.iter().all(|e| e.state != MediaState::Failed));
    assert_eq!(events.last().unwrap().state, MediaState::Ready);
}

#[tokio::test]
async fn test_crashed_worker_lease_reclaimed() {
    let p = pipeline(3);
    let media_id = MediaId::new();
    let handle = submit(&p, &media_id).await;

    // A worker leases the job and dies without reporting.
    p.store
        .lease_next("crashed", Duration::from_secs(0))
        .await
        .unwrap()
        .unwrap();

    // A healthy worker's next poll reclaims and reprocesses it.
    let worker = worker(&p, "healthy", ScriptedTask::always_ok());
    assert!(worker.poll_once().await.unwrap());

    let job = p.store.get(&handle.job_id).await.unwrap().unwrap();
    assert!(job.is_terminal());
    assert_eq!(job.attempt, 1);

    let record = p.catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Ready);

    // The dead worker's late report is a lost lease.
    assert!(matches!(
        p.store.ack(&handle.job_id, "crashed").await,
        Err(QueueError::LeaseLost(_))
    ));
}

#[tokio::test]
async fn test_exhausted_attempts_fail_terminally() {
    let p = pipeline(2);
    let media_id = MediaId::new();
    let mut receiver = p.hub.subscribe(&media_id).await.unwrap();

    let handle = submit(&p, &media_id).await;
    let task = ScriptedTask::new(vec![
        Err("disk full".to_string()),
        Err("disk full".to_string()),
    ]);
    let worker = worker(&p, "w1", task);

    assert!(worker.poll_once().await.unwrap());
    assert!(worker.poll_once().await.unwrap());

    let job = p.store.get(&handle.job_id).await.unwrap().unwrap();
    assert!(job.is_terminal());
    assert_eq!(job.attempt, 2);

    let record = p.catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Failed);
    assert!(record
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("disk full"));

    let last = drain(&mut receiver).pop().unwrap();
    assert_eq!(last.state, MediaState::Failed);

    // Nothing left to lease, and the media slot is free for a manual
    // resubmit.
    assert!(!worker.poll_once().await.unwrap());
    assert!(p
        .gateway
        .submit(media_id.clone(), "uploads/raw.mp4", 5)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_heartbeat_outlives_short_lease() {
    let p = pipeline(3);
    let media_id = MediaId::new();
    submit(&p, &media_id).await;

    // Lease far shorter than the task; only heartbeats keep it alive.
    let config = WorkerConfig {
        concurrency: 1,
        lease_duration: Duration::from_millis(150),
        heartbeat_interval: Duration::from_millis(40),
        poll_interval: Duration::from_millis(10),
        reclaim_interval: Duration::from_secs(60),
        job_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(1),
        work_dir: "/tmp/vodforge-test".to_string(),
    };

    struct SlowTask;
    #[async_trait]
    impl ProcessTask for SlowTask {
        async fn run(
            &self,
            _job: &ProcessingJob,
            _progress: &ProgressReporter,
        ) -> WorkerResult<()> {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok(())
        }
    }

    let worker = Worker::new(
        "w1",
        p.broker.clone(),
        p.catalog.clone(),
        p.hub.clone(),
        Arc::new(SlowTask),
        config,
    );
    assert!(worker.poll_once().await.unwrap());

    let record = p.catalog.read(&media_id).await.unwrap();
    assert_eq!(record.state, MediaState::Ready);
}
