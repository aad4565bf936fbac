//! Metadata authority seam.
//!
//! The authority owns the single source of truth for each media item's
//! processing state. Writes carry a monotonic version; the authority
//! rejects anything stale or illegal under the
//! `Uploading -> Processing -> {Ready | Failed}` machine, so reports
//! from dead leases can never clobber the outcome of a newer attempt.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use vod_models::{MediaId, MediaRecord, MediaState, StateWrite};

use crate::error::{CatalogError, CatalogResult};

/// Authoritative store of media processing state.
#[async_trait]
pub trait MetadataAuthority: Send + Sync {
    /// Create a fresh record in `Uploading` state. Fails with
    /// `AlreadyExists` if the media item is already cataloged.
    async fn create(&self, record: MediaRecord) -> CatalogResult<()>;

    /// Read the current record.
    async fn read(&self, media_id: &MediaId) -> CatalogResult<MediaRecord>;

    /// Apply a versioned state write. The write is rejected with
    /// `StaleWrite` unless its version strictly exceeds the stored
    /// one, and with `IllegalTransition` if the state machine forbids
    /// the edge (terminal records refuse every write).
    async fn write_state(&self, write: StateWrite) -> CatalogResult<MediaRecord>;

    /// List records sitting in `Processing` whose last update is older
    /// than `threshold_secs`.
    async fn list_stuck(&self, threshold_secs: i64) -> CatalogResult<Vec<MediaRecord>>;
}

/// Validate `write` against the stored record. Shared by every
/// authority implementation so the rules cannot drift.
pub(crate) fn check_write(record: &MediaRecord, write: &StateWrite) -> CatalogResult<()> {
    if write.version <= record.version {
        return Err(CatalogError::StaleWrite {
            media_id: write.media_id.clone(),
            attempted: write.version,
            stored: record.version,
        });
    }
    if !record.state.can_transition_to(write.state) {
        return Err(CatalogError::IllegalTransition {
            media_id: write.media_id.clone(),
            from: record.state,
            to: write.state,
        });
    }
    Ok(())
}

/// Apply an already-validated write to `record`.
pub(crate) fn apply_write(record: &mut MediaRecord, write: StateWrite, now: DateTime<Utc>) {
    record.state = write.state;
    record.version = write.version;
    if let Some(progress) = write.progress {
        record.progress = progress;
    }
    if write.state == MediaState::Ready {
        record.progress = 100;
    }
    record.error_message = write.error;
    record.updated_at = now;
}

/// In-memory metadata authority for tests and single-node runs.
#[derive(Default)]
pub struct MemoryCatalog {
    records: Mutex<HashMap<MediaId, MediaRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a record's `updated_at`, for staleness tests.
    #[cfg(test)]
    pub(crate) async fn backdate(&self, media_id: &MediaId, secs: i64) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(media_id) {
            record.updated_at = Utc::now() - chrono::Duration::seconds(secs);
        }
    }
}

#[async_trait]
impl MetadataAuthority for MemoryCatalog {
    async fn create(&self, record: MediaRecord) -> CatalogResult<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.media_id) {
            return Err(CatalogError::AlreadyExists(record.media_id.clone()));
        }
        debug!(media_id = %record.media_id, "cataloged media");
        records.insert(record.media_id.clone(), record);
        Ok(())
    }

    async fn read(&self, media_id: &MediaId) -> CatalogResult<MediaRecord> {
        let records = self.records.lock().await;
        records
            .get(media_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(media_id.clone()))
    }

    async fn write_state(&self, write: StateWrite) -> CatalogResult<MediaRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&write.media_id)
            .ok_or_else(|| CatalogError::NotFound(write.media_id.clone()))?;

        check_write(record, &write)?;
        apply_write(record, write, Utc::now());
        Ok(record.clone())
    }

    async fn list_stuck(&self, threshold_secs: i64) -> CatalogResult<Vec<MediaRecord>> {
        let records = self.records.lock().await;
        let now = Utc::now();
        Ok(records
            .values()
            .filter(|r| r.is_stuck(threshold_secs, now))
            .cloned()
            .collect())
    }
}
