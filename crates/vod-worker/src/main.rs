//! Media processing worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vod_catalog::RedisCatalog;
use vod_hub::{StatusChannel, StatusHub};
use vod_queue::{QueueBroker, QueueConfig, RedisJobStore};
use vod_storage::ObjectStore;
use vod_worker::{TranscodeTask, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vod=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vod-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue_config = QueueConfig::from_env();
    let store = match RedisJobStore::new(queue_config.redis.clone(), queue_config.retry.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create job store: {}", e);
            std::process::exit(1);
        }
    };
    let broker = QueueBroker::new(store);

    let catalog = match RedisCatalog::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to create catalog: {}", e);
            std::process::exit(1);
        }
    };

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let hub = match StatusChannel::new(&redis_url) {
        Ok(channel) => StatusHub::with_upstream(channel),
        Err(e) => {
            error!("Failed to create status channel: {}", e);
            std::process::exit(1);
        }
    };

    let storage = match ObjectStore::from_env() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create object store: {}", e);
            std::process::exit(1);
        }
    };
    let task = Arc::new(TranscodeTask::new(storage, config.work_dir.clone()));

    let pool = WorkerPool::new(broker, catalog, hub, task, config);
    let shutdown = pool.shutdown_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown.send(true).ok();
    });

    if let Err(e) = pool.run().await {
        error!("Worker pool error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
