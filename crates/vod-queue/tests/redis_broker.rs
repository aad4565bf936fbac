//! Redis queue integration tests.
//!
//! Run against a live Redis with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use vod_models::MediaId;
use vod_queue::{
    EnqueueGateway, JobStore, QueueBroker, QueueError, RedisJobStore, RedisStoreConfig,
    RetryPolicy,
};

fn store(prefix: &str) -> Arc<RedisJobStore> {
    dotenvy::dotenv().ok();
    let config = RedisStoreConfig {
        redis_url: std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        // Unique prefix per test run so leftovers never collide.
        key_prefix: format!("vodtest:{}:{}", prefix, uuid::Uuid::new_v4()),
    };
    Arc::new(RedisJobStore::new(config, RetryPolicy::default()).expect("Failed to create store"))
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_submit_lease_ack_cycle() {
    let store = store("cycle");
    let gateway = EnqueueGateway::new(store.clone(), 3);
    let broker = QueueBroker::new(store.clone());

    let media_id = MediaId::new();
    let handle = gateway
        .submit(media_id.clone(), "uploads/raw.mp4", 5)
        .await
        .expect("Failed to submit");

    let leased = broker
        .lease("it-worker", Duration::from_secs(60))
        .await
        .expect("Failed to lease")
        .expect("Job available");
    assert_eq!(leased.job_id, handle.job_id);
    assert_eq!(leased.media_id, media_id);

    broker
        .ack(&handle.job_id, "it-worker")
        .await
        .expect("Failed to ack");

    let done = store
        .get(&handle.job_id)
        .await
        .expect("Failed to get")
        .expect("Job exists");
    assert!(done.is_terminal());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_submit_rejected() {
    let store = store("dup");
    let gateway = EnqueueGateway::new(store.clone(), 3);

    let media_id = MediaId::new();
    gateway
        .submit(media_id.clone(), "uploads/raw.mp4", 5)
        .await
        .expect("Failed to submit");

    match gateway.submit(media_id.clone(), "uploads/raw.mp4", 5).await {
        Err(QueueError::DuplicateJob(m)) => assert_eq!(m, media_id),
        other => panic!("expected DuplicateJob, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_nack_schedules_backoff() {
    let store = store("nack");
    let gateway = EnqueueGateway::new(store.clone(), 3);
    let broker = QueueBroker::new(store.clone());

    let handle = gateway
        .submit(MediaId::new(), "uploads/raw.mp4", 5)
        .await
        .expect("Failed to submit");

    broker
        .lease("it-worker", Duration::from_secs(60))
        .await
        .expect("Failed to lease")
        .expect("Job available");
    broker
        .nack(&handle.job_id, "it-worker", "transcode crashed")
        .await
        .expect("Failed to nack");

    // Backing off: nothing eligible yet.
    let empty = broker
        .lease("it-worker", Duration::from_secs(60))
        .await
        .expect("Failed to lease");
    assert!(empty.is_none());

    let job = store
        .get(&handle.job_id)
        .await
        .expect("Failed to get")
        .expect("Job exists");
    assert_eq!(job.attempt, 1);
    assert_eq!(job.last_error.as_deref(), Some("transcode crashed"));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_expired_lease_is_reclaimed() {
    let store = store("reclaim");
    let gateway = EnqueueGateway::new(store.clone(), 3);
    let broker = QueueBroker::new(store.clone());

    let handle = gateway
        .submit(MediaId::new(), "uploads/raw.mp4", 5)
        .await
        .expect("Failed to submit");

    broker
        .lease("crashed-worker", Duration::from_millis(50))
        .await
        .expect("Failed to lease")
        .expect("Job available");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reclaimed = broker.reclaim_expired(10).await.expect("Failed to reclaim");
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].job_id, handle.job_id);
    assert_eq!(reclaimed[0].attempt, 1);

    // A late ack from the crashed worker is a lost lease.
    match broker.ack(&handle.job_id, "crashed-worker").await {
        Err(QueueError::LeaseLost(_)) => {}
        other => panic!("expected LeaseLost, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_release_returns_lease_uncharged() {
    let store = store("release");
    let gateway = EnqueueGateway::new(store.clone(), 3);
    let broker = QueueBroker::new(store.clone());

    let handle = gateway
        .submit(MediaId::new(), "uploads/raw.mp4", 5)
        .await
        .expect("Failed to submit");

    broker
        .lease("it-worker", Duration::from_secs(60))
        .await
        .expect("Failed to lease")
        .expect("Job available");
    broker
        .release(&handle.job_id, "it-worker")
        .await
        .expect("Failed to release");

    let job = store
        .get(&handle.job_id)
        .await
        .expect("Failed to get")
        .expect("Job exists");
    assert_eq!(job.attempt, 0);
    assert!(!job.is_terminal());
    assert!(job.lease_owner.is_none());

    // Invisible for the policy's base delay.
    let empty = broker
        .lease("it-worker", Duration::from_secs(60))
        .await
        .expect("Failed to lease");
    assert!(empty.is_none());

    // The old lease is gone.
    match broker.ack(&handle.job_id, "it-worker").await {
        Err(QueueError::LeaseLost(_)) => {}
        other => panic!("expected LeaseLost, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_fifo_within_priority_band() {
    let store = store("fifo");
    let gateway = EnqueueGateway::new(store.clone(), 3);
    let broker = QueueBroker::new(store.clone());

    // Same priority, submitted milliseconds apart within one second.
    let first = gateway
        .submit(MediaId::new(), "uploads/a.mp4", 5)
        .await
        .expect("Failed to submit");
    tokio::time::sleep(Duration::from_millis(5)).await;
    gateway
        .submit(MediaId::new(), "uploads/b.mp4", 5)
        .await
        .expect("Failed to submit");

    let leased = broker
        .lease("it-worker", Duration::from_secs(60))
        .await
        .expect("Failed to lease")
        .expect("Job available");
    assert_eq!(leased.job_id, first.job_id);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_priority_ordering() {
    let store = store("prio");
    let gateway = EnqueueGateway::new(store.clone(), 3);
    let broker = QueueBroker::new(store.clone());

    gateway
        .submit(MediaId::new(), "uploads/low.mp4", 9)
        .await
        .expect("Failed to submit");
    let urgent = gateway
        .submit(MediaId::new(), "uploads/urgent.mp4", 1)
        .await
        .expect("Failed to submit");

    let leased = broker
        .lease("it-worker", Duration::from_secs(60))
        .await
        .expect("Failed to lease")
        .expect("Job available");
    assert_eq!(leased.job_id, urgent.job_id);
}
