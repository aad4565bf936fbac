//! Queue configuration from environment variables.

use std::time::Duration;

use vod_models::DEFAULT_MAX_ATTEMPTS;

use crate::policy::RetryPolicy;
use crate::redis_store::RedisStoreConfig;

/// Queue-wide tunables shared by the gateway, broker and workers.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis connection settings
    pub redis: RedisStoreConfig,
    /// Failed attempts allowed before a job is terminally failed
    pub max_attempts: u32,
    /// Retry backoff curve
    pub retry: RetryPolicy,
    /// Default lease length handed to workers
    pub lease_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis: RedisStoreConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry: RetryPolicy::default(),
            lease_duration: Duration::from_secs(120),
        }
    }
}

impl QueueConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis: RedisStoreConfig::from_env(),
            max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", defaults.max_attempts),
            retry: RetryPolicy::new(
                Duration::from_secs(env_parse(
                    "QUEUE_RETRY_BASE_SECS",
                    defaults.retry.base_delay.as_secs(),
                )),
                Duration::from_secs(env_parse(
                    "QUEUE_RETRY_MAX_SECS",
                    defaults.retry.max_delay.as_secs(),
                )),
            ),
            lease_duration: Duration::from_secs(env_parse(
                "QUEUE_LEASE_SECS",
                defaults.lease_duration.as_secs(),
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.lease_duration, Duration::from_secs(120));
        assert_eq!(config.retry.base_delay, Duration::from_secs(5));
    }
}
