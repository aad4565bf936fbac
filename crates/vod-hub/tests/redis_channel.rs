//! Redis status channel integration tests.
//!
//! Run against a live Redis with `cargo test -- --ignored`.

use std::time::Duration;

use futures_util::StreamExt;
use vod_hub::{StatusChannel, StatusHub};
use vod_models::{MediaId, MediaState, StatusEvent};

fn channel() -> StatusChannel {
    dotenvy::dotenv().ok();
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    StatusChannel::new(&redis_url).expect("Failed to create status channel")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_subscribe_roundtrip() {
    let channel = channel();
    let media_id = MediaId::new();

    let subscriber_channel = channel.clone();
    let subscriber_media = media_id.clone();
    let subscriber = tokio::spawn(async move {
        let mut stream = subscriber_channel
            .subscribe(&subscriber_media)
            .await
            .expect("Failed to subscribe");
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .ok()
            .flatten()
    });

    // Give the subscriber time to connect.
    tokio::time::sleep(Duration::from_millis(100)).await;
    channel
        .publish(&StatusEvent::progress(media_id.clone(), 0, 40))
        .await
        .expect("Failed to publish");

    let event = subscriber
        .await
        .expect("Subscriber task failed")
        .expect("Event received");
    assert_eq!(event.media_id, media_id);
    assert_eq!(event.progress, Some(40));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_hub_relays_upstream_events() {
    let channel = channel();
    let hub = StatusHub::with_upstream(channel.clone());
    let media_id = MediaId::new();

    let mut receiver = hub.subscribe(&media_id).await.expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Published through Redis, received through the local fan-out.
    hub.publish(StatusEvent::ready(media_id.clone(), 1))
        .await
        .expect("Failed to publish");

    let event = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("Timed out")
        .expect("Event received");
    assert_eq!(event.state, MediaState::Ready);
    assert_eq!(event.attempt, 1);
}
