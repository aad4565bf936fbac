//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent jobs this process holds leases on
    pub concurrency: usize,
    /// Lease length requested on every lease and heartbeat
    pub lease_duration: Duration,
    /// How often a held lease is extended while processing
    pub heartbeat_interval: Duration,
    /// Idle sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// How often the background sweep reclaims expired leases
    pub reclaim_interval: Duration,
    /// Hard cap on a single processing attempt
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            lease_duration: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            reclaim_interval: Duration::from_secs(30),
            job_timeout: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: "/tmp/vodforge".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse("WORKER_CONCURRENCY", defaults.concurrency),
            lease_duration: env_secs("WORKER_LEASE_SECS", defaults.lease_duration),
            heartbeat_interval: env_secs("WORKER_HEARTBEAT_SECS", defaults.heartbeat_interval),
            poll_interval: env_secs("WORKER_POLL_SECS", defaults.poll_interval),
            reclaim_interval: env_secs("WORKER_RECLAIM_SECS", defaults.reclaim_interval),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT_SECS", defaults.job_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_SECS", defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_shorter_than_lease() {
        let config = WorkerConfig::default();
        assert!(config.heartbeat_interval < config.lease_duration);
    }
}
