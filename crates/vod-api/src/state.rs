//! Application state.

use std::sync::Arc;

use vod_catalog::{MetadataAuthority, RedisCatalog};
use vod_hub::{StatusChannel, StatusHub};
use vod_queue::{EnqueueGateway, JobStore, QueueBroker, QueueConfig, RedisJobStore};
use vod_storage::ObjectStore;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub gateway: EnqueueGateway,
    pub broker: QueueBroker,
    pub catalog: Arc<dyn MetadataAuthority>,
    pub hub: StatusHub,
    pub storage: Arc<ObjectStore>,
}

impl AppState {
    /// Create application state from environment configuration.
    pub fn from_env(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let queue_config = QueueConfig::from_env();
        let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::new(
            queue_config.redis.clone(),
            queue_config.retry.clone(),
        )?);
        let catalog: Arc<dyn MetadataAuthority> = Arc::new(RedisCatalog::from_env()?);

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let hub = StatusHub::with_upstream(StatusChannel::new(&redis_url)?);

        let storage = Arc::new(ObjectStore::from_env()?);

        Ok(Self::assemble(
            config,
            store,
            queue_config.max_attempts,
            catalog,
            hub,
            storage,
        ))
    }

    /// Wire the state from already-built components.
    pub fn assemble(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        max_attempts: u32,
        catalog: Arc<dyn MetadataAuthority>,
        hub: StatusHub,
        storage: Arc<ObjectStore>,
    ) -> Self {
        Self {
            config,
            gateway: EnqueueGateway::new(store.clone(), max_attempts),
            broker: QueueBroker::new(store),
            catalog,
            hub,
            storage,
        }
    }
}
