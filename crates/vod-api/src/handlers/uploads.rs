//! Upload registration handlers.
//!
//! Registering an upload catalogs the media item in `Uploading` state
//! and hands back a presigned PUT URL. Media bytes go straight to
//! object storage; the API never proxies them.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vod_models::{MediaId, MediaRecord};
use vod_storage::source_key;

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterUploadRequest {
    /// Original file name, recorded for display only
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUploadResponse {
    pub media_id: MediaId,
    pub source_key: String,
    pub upload_url: String,
}

/// POST /api/uploads
///
/// Register a new upload and issue a presigned PUT URL for it.
pub async fn register_upload(
    State(state): State<AppState>,
    Json(request): Json<RegisterUploadRequest>,
) -> ApiResult<(StatusCode, Json<RegisterUploadResponse>)> {
    let media_id = MediaId::new();
    let key = source_key(&media_id);

    state
        .catalog
        .create(MediaRecord::new(media_id.clone(), key.clone()))
        .await?;

    let upload_url = state
        .storage
        .issue_upload_url(&key, state.config.upload_url_ttl)
        .await?;

    info!(media_id = %media_id, file_name = ?request.file_name, "upload registered");
    metrics::record_upload_registered();

    Ok((
        StatusCode::CREATED,
        Json(RegisterUploadResponse {
            media_id,
            source_key: key,
            upload_url,
        }),
    ))
}
