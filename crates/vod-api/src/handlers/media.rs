//! Media status and delivery handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vod_models::{MediaId, MediaState};
use vod_storage::rendition_key;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatusResponse {
    pub media_id: MediaId,
    pub state: MediaState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: String,
}

/// GET /api/media/:media_id/status
///
/// Polling fallback for clients without a live status subscription.
pub async fn get_media_status(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
) -> ApiResult<Json<MediaStatusResponse>> {
    let record = state.catalog.read(&MediaId::from_string(media_id)).await?;

    Ok(Json(MediaStatusResponse {
        media_id: record.media_id,
        state: record.state,
        progress: record.progress,
        error_message: record.error_message,
        updated_at: record.updated_at.to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadUrlQuery {
    /// Rendition to fetch
    #[serde(default = "default_rendition")]
    pub rendition: String,
}

fn default_rendition() -> String {
    "720p.mp4".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlResponse {
    pub media_id: MediaId,
    pub rendition: String,
    pub download_url: String,
}

/// GET /api/media/:media_id/download-url
///
/// Presigned GET URL for a rendition. Only available once the media
/// item is `Ready`.
pub async fn get_download_url(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
    Query(query): Query<DownloadUrlQuery>,
) -> ApiResult<Json<DownloadUrlResponse>> {
    let record = state.catalog.read(&MediaId::from_string(media_id)).await?;
    if record.state != MediaState::Ready {
        return Err(ApiError::Conflict(format!(
            "media {} is {}, not ready",
            record.media_id, record.state
        )));
    }

    let key = rendition_key(&record.media_id, &query.rendition);
    let download_url = state
        .storage
        .issue_download_url(&key, state.config.download_url_ttl)
        .await?;

    Ok(Json(DownloadUrlResponse {
        media_id: record.media_id,
        rendition: query.rendition,
        download_url,
    }))
}
