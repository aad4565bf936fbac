//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Presigned upload URL lifetime
    pub upload_url_ttl: Duration,
    /// Presigned download URL lifetime
    pub download_url_ttl: Duration,
    /// Media in `Processing` without an update for this long is
    /// considered stuck
    pub stuck_threshold: Duration,
    /// Interval between reconciliation scans
    pub reconcile_interval: Duration,
    /// How long terminal jobs are retained before being purged
    pub terminal_retention: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 1024 * 1024, // 1MB, media bytes go straight to storage
            environment: "development".to_string(),
            upload_url_ttl: Duration::from_secs(3600),
            download_url_ttl: Duration::from_secs(900),
            stuck_threshold: Duration::from_secs(1800),
            reconcile_interval: Duration::from_secs(60),
            terminal_retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: env_parse("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            upload_url_ttl: env_secs("UPLOAD_URL_TTL_SECS", defaults.upload_url_ttl),
            download_url_ttl: env_secs("DOWNLOAD_URL_TTL_SECS", defaults.download_url_ttl),
            stuck_threshold: env_secs("STUCK_THRESHOLD_SECS", defaults.stuck_threshold),
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval),
            terminal_retention: env_secs("TERMINAL_RETENTION_SECS", defaults.terminal_retention),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
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
