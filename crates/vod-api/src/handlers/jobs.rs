//! Job submission handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vod_models::{JobId, MediaId, DEFAULT_PRIORITY};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub media_id: MediaId,
    /// Storage key of the raw object to process. Defaults to the key
    /// the upload was registered with.
    #[serde(default)]
    pub source_key: Option<String>,
    /// Lower values are leased first
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub media_id: MediaId,
}

/// POST /api/jobs
///
/// Submit a processing job for an uploaded media item. Idempotent per
/// media item: a second submit while a job is active returns 409.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    // The media item must be cataloged; its record carries the source
    // key the worker will read.
    let record = state.catalog.read(&request.media_id).await?;
    if record.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "media {} already finished as {}",
            record.media_id, record.state
        )));
    }

    let source_key = request.source_key.unwrap_or(record.source_key);
    let handle = state
        .gateway
        .submit(request.media_id, source_key, request.priority)
        .await?;

    info!(job_id = %handle.job_id, media_id = %handle.media_id, "job accepted");
    metrics::record_job_submitted();

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: handle.job_id,
            media_id: handle.media_id,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: JobId,
    pub media_id: MediaId,
    pub source_key: String,
    pub state: String,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /api/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = state
        .broker
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {job_id}")))?;

    Ok(Json(JobResponse {
        job_id: job.job_id,
        media_id: job.media_id,
        source_key: job.source_key,
        state: job.state.to_string(),
        attempt: job.attempt,
        last_error: job.last_error,
    }))
}
