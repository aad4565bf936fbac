//! Redis-backed metadata authority.
//!
//! Each record lives in a hash `{p}:media:{id}` holding the serialized
//! record plus a bare `version` field for compare-and-set. Records in
//! `Processing` are additionally indexed in the `{p}:processing` zset,
//! scored by last-update time, which is what the reconciliation scan
//! reads.
//!
//! Writes are optimistic: read, validate, then commit with a script
//! that re-checks the stored version. A concurrent writer bumps the
//! version and the commit retries against the fresh record.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tracing::debug;

use vod_models::{MediaId, MediaRecord, MediaState, StateWrite};

use crate::authority::{apply_write, check_write, MetadataAuthority};
use crate::error::{CatalogError, CatalogResult};

/// Bounded CAS retries before giving up on a contended record.
const CAS_ATTEMPTS: usize = 4;

const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'record', ARGV[1], 'version', ARGV[2])
return 1
"#;

const COMMIT_SCRIPT: &str = r#"
local stored = redis.call('HGET', KEYS[1], 'version')
if stored ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'record', ARGV[2], 'version', ARGV[3])
if ARGV[4] == 'processing' then
  redis.call('ZADD', KEYS[2], tonumber(ARGV[5]), ARGV[6])
else
  redis.call('ZREM', KEYS[2], ARGV[6])
end
return 1
"#;

/// Redis catalog configuration.
#[derive(Debug, Clone)]
pub struct RedisCatalogConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for RedisCatalogConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vodcat".to_string(),
        }
    }
}

impl RedisCatalogConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("CATALOG_KEY_PREFIX")
                .unwrap_or_else(|_| "vodcat".to_string()),
        }
    }
}

/// Durable metadata authority backed by Redis.
pub struct RedisCatalog {
    client: redis::Client,
    prefix: String,
}

impl RedisCatalog {
    pub fn new(config: RedisCatalogConfig) -> CatalogResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            prefix: config.key_prefix,
        })
    }

    pub fn from_env() -> CatalogResult<Self> {
        Self::new(RedisCatalogConfig::from_env())
    }

    async fn conn(&self) -> CatalogResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn media_key(&self, media_id: &MediaId) -> String {
        format!("{}:media:{}", self.prefix, media_id)
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.prefix)
    }

    async fn load(&self, media_id: &MediaId) -> CatalogResult<Option<MediaRecord>> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.hget(self.media_key(media_id), "record").await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MetadataAuthority for RedisCatalog {
    async fn create(&self, record: MediaRecord) -> CatalogResult<()> {
        let mut conn = self.conn().await?;
        let created: i32 = redis::Script::new(CREATE_SCRIPT)
            .key(self.media_key(&record.media_id))
            .arg(serde_json::to_string(&record)?)
            .arg(record.version.as_u64())
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(CatalogError::AlreadyExists(record.media_id));
        }
        debug!(media_id = %record.media_id, "cataloged media");
        Ok(())
    }

    async fn read(&self, media_id: &MediaId) -> CatalogResult<MediaRecord> {
        self.load(media_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(media_id.clone()))
    }

    async fn write_state(&self, write: StateWrite) -> CatalogResult<MediaRecord> {
        for _ in 0..CAS_ATTEMPTS {
            let mut record = self
                .load(&write.media_id)
                .await?
                .ok_or_else(|| CatalogError::NotFound(write.media_id.clone()))?;

            check_write(&record, &write)?;
            let read_version = record.version.as_u64();
            apply_write(&mut record, write.clone(), Utc::now());

            let mut conn = self.conn().await?;
            let committed: i32 = redis::Script::new(COMMIT_SCRIPT)
                .key(self.media_key(&record.media_id))
                .key(self.processing_key())
                .arg(read_version)
                .arg(serde_json::to_string(&record)?)
                .arg(record.version.as_u64())
                .arg(record.state.as_str())
                .arg(record.updated_at.timestamp_millis())
                .arg(record.media_id.as_str())
                .invoke_async(&mut conn)
                .await?;

            if committed == 1 {
                return Ok(record);
            }
            // Lost the race; re-validate against the fresh record.
        }
        Err(CatalogError::unavailable(format!(
            "write contention on media {}",
            write.media_id
        )))
    }

    async fn list_stuck(&self, threshold_secs: i64) -> CatalogResult<Vec<MediaRecord>> {
        let mut conn = self.conn().await?;
        let cutoff = Utc::now().timestamp_millis() - threshold_secs * 1000;
        let ids: Vec<String> = conn
            .zrangebyscore(self.processing_key(), "-inf", cutoff)
            .await?;

        let mut stuck = Vec::with_capacity(ids.len());
        for id in ids {
            let media_id = MediaId::from_string(id);
            if let Some(record) = self.load(&media_id).await? {
                if record.state == MediaState::Processing {
                    stuck.push(record);
                }
            }
        }
        Ok(stuck)
    }
}
