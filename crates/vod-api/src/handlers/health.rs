//! Health and readiness handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    queue_waiting: u64,
    queue_leased: u64,
}

/// GET /ready
///
/// Ready only when the job store answers.
pub async fn ready(State(state): State<AppState>) -> ApiResult<Json<ReadyResponse>> {
    let counts = state.broker.counts().await?;
    Ok(Json(ReadyResponse {
        status: "ready",
        queue_waiting: counts.waiting,
        queue_leased: counts.leased,
    }))
}
