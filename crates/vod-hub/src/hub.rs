//! Per-media status fan-out.
//!
//! The hub keeps one broadcast channel per media item with at least
//! one live subscriber. Delivery is best-effort: slow subscribers drop
//! the oldest events, and a subscriber that misses everything still
//! recovers the current state from the catalog.
//!
//! Two wirings exist. `in_process` delivers directly, for single
//! process deployments and tests. `with_upstream` routes every publish
//! through Redis Pub/Sub and lazily relays each media channel back
//! into the local fan-out, so events reach subscribers on every API
//! node regardless of which worker published them.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use vod_models::{MediaId, StatusEvent};

use crate::channel::StatusChannel;
use crate::error::HubResult;

/// Buffered events per subscriber before the oldest are dropped.
const FANOUT_CAPACITY: usize = 64;

/// Status propagation hub.
#[derive(Clone)]
pub struct StatusHub {
    senders: Arc<RwLock<HashMap<MediaId, broadcast::Sender<StatusEvent>>>>,
    upstream: Option<StatusChannel>,
}

impl StatusHub {
    /// Hub that delivers events within this process only.
    pub fn in_process() -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
            upstream: None,
        }
    }

    /// Hub that routes events through Redis Pub/Sub.
    pub fn with_upstream(channel: StatusChannel) -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
            upstream: Some(channel),
        }
    }

    /// Publish an event to everyone subscribed to its media item.
    /// Never fails the caller's pipeline for lack of listeners.
    pub async fn publish(&self, event: StatusEvent) -> HubResult<()> {
        if let Some(upstream) = &self.upstream {
            // Local subscribers receive it back through the relay.
            upstream.publish(&event).await?;
            return Ok(());
        }

        let mut senders = self.senders.write().await;
        if let Some(sender) = senders.get(&event.media_id) {
            if sender.send(event.clone()).is_err() {
                // Last subscriber left; drop the channel.
                senders.remove(&event.media_id);
            }
        }
        Ok(())
    }

    /// Subscribe to status events for a media item.
    pub async fn subscribe(&self, media_id: &MediaId) -> HubResult<broadcast::Receiver<StatusEvent>> {
        let mut senders = self.senders.write().await;
        if let Some(sender) = senders.get(media_id) {
            return Ok(sender.subscribe());
        }

        let (sender, receiver) = broadcast::channel(FANOUT_CAPACITY);
        senders.insert(media_id.clone(), sender.clone());

        if let Some(upstream) = &self.upstream {
            self.spawn_relay(media_id.clone(), sender, upstream.clone())
                .await?;
        }
        Ok(receiver)
    }

    /// Number of media items with an open fan-out channel.
    pub async fn active_channels(&self) -> usize {
        let mut senders = self.senders.write().await;
        senders.retain(|_, sender| sender.receiver_count() > 0);
        senders.len()
    }

    /// Forward the media item's Redis channel into the local fan-out
    /// until the last local subscriber is gone.
    async fn spawn_relay(
        &self,
        media_id: MediaId,
        sender: broadcast::Sender<StatusEvent>,
        upstream: StatusChannel,
    ) -> HubResult<()> {
        let mut stream = upstream.subscribe(&media_id).await?;
        let senders = Arc::clone(&self.senders);

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if sender.send(event).is_err() {
                    break;
                }
            }
            debug!(media_id = %media_id, "status relay stopped");
            let mut senders = senders.write().await;
            senders.remove(&media_id);
        });
        Ok(())
    }

    /// Publish without propagating transport errors; the processing
    /// pipeline never stalls on a status delivery failure.
    pub async fn publish_best_effort(&self, event: StatusEvent) {
        let media_id = event.media_id.clone();
        if let Err(e) = self.publish(event).await {
            warn!(media_id = %media_id, error = %e, "failed to publish status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vod_models::MediaState;

    #[tokio::test]
    async fn test_fanout_to_multiple_subscribers() {
        let hub = StatusHub::in_process();
        let media_id = MediaId::new();

        let mut first = hub.subscribe(&media_id).await.unwrap();
        let mut second = hub.subscribe(&media_id).await.unwrap();

        hub.publish(StatusEvent::processing(media_id.clone(), 0))
            .await
            .unwrap();

        let event = first.recv().await.unwrap();
        assert_eq!(event.state, MediaState::Processing);
        let event = second.recv().await.unwrap();
        assert_eq!(event.media_id, media_id);
    }

    #[tokio::test]
    async fn test_events_are_scoped_per_media() {
        let hub = StatusHub::in_process();
        let watched = MediaId::new();
        let other = MediaId::new();

        let mut receiver = hub.subscribe(&watched).await.unwrap();

        hub.publish(StatusEvent::ready(other, 0)).await.unwrap();
        hub.publish(StatusEvent::ready(watched.clone(), 0))
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.media_id, watched);
        assert!(event.is_terminal());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let hub = StatusHub::in_process();
        hub.publish(StatusEvent::processing(MediaId::new(), 0))
            .await
            .unwrap();
        assert_eq!(hub.active_channels().await, 0);
    }

    #[tokio::test]
    async fn test_channels_pruned_after_subscribers_leave() {
        let hub = StatusHub::in_process();
        let media_id = MediaId::new();

        let receiver = hub.subscribe(&media_id).await.unwrap();
        assert_eq!(hub.active_channels().await, 1);

        drop(receiver);
        assert_eq!(hub.active_channels().await, 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let hub = StatusHub::in_process();
        let media_id = MediaId::new();

        let mut receiver = hub.subscribe(&media_id).await.unwrap();
        for i in 0..(FANOUT_CAPACITY + 8) {
            hub.publish(StatusEvent::progress(
                media_id.clone(),
                0,
                (i % 100) as u8,
            ))
            .await
            .unwrap();
        }

        // The receiver lagged; it reports the gap and then resumes.
        match receiver.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(receiver.recv().await.is_ok());
    }
}
