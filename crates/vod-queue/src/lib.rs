//! Durable job queue with per-job visibility leasing.
//!
//! Jobs are admitted through the [`EnqueueGateway`] (idempotent per
//! media item), scheduled by priority with FIFO tie-break, and handed
//! to workers by the [`QueueBroker`] under time-bounded leases. Failed
//! or abandoned attempts retry with exponential backoff until the
//! configured attempt limit is exhausted.

pub mod broker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod redis_store;
pub mod store;

pub use broker::{NackOutcome, QueueBroker};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use gateway::EnqueueGateway;
pub use policy::RetryPolicy;
pub use redis_store::{RedisJobStore, RedisStoreConfig};
pub use store::{JobStore, MemoryJobStore, QueueCounts};
