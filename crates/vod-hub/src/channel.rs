//! Status events via Redis Pub/Sub.
//!
//! Transports events between processes (workers publish, the API's
//! hub relays to its local subscribers). Delivery is fire-and-forget;
//! the catalog remains the source of truth for current state.

use redis::AsyncCommands;
use tracing::debug;

use vod_models::{MediaId, StatusEvent};

use crate::error::HubResult;

/// Channel for publishing/subscribing to status events.
#[derive(Clone)]
pub struct StatusChannel {
    client: redis::Client,
}

impl StatusChannel {
    /// Create a new status channel.
    pub fn new(redis_url: &str) -> HubResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a media item.
    pub fn channel_name(media_id: &MediaId) -> String {
        format!("vod:status:{}", media_id)
    }

    /// Publish a status event.
    pub async fn publish(&self, event: &StatusEvent) -> HubResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.media_id);
        let payload = serde_json::to_string(event)?;

        debug!(media_id = %event.media_id, state = %event.state, "publishing status event");
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to status events for a media item.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        media_id: &MediaId,
    ) -> HubResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = StatusEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(media_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
