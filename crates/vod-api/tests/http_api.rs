//! API integration tests over in-memory components.
//!
//! Presigned URLs are computed locally by the AWS SDK, so a dummy
//! storage config works without any network access.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use vod_api::services::reconciler::ReconcileReport;
use vod_api::{create_router, ApiConfig, AppState, ReconciliationScanner};
use vod_catalog::{MemoryCatalog, MetadataAuthority};
use vod_hub::StatusHub;
use vod_models::{MediaState, StateVersion, StateWrite};
use vod_queue::{MemoryJobStore, RetryPolicy};
use vod_storage::{ObjectStore, ObjectStoreConfig};

fn dummy_storage() -> Arc<ObjectStore> {
    Arc::new(ObjectStore::new(ObjectStoreConfig {
        endpoint_url: "http://localhost:9000".to_string(),
        access_key_id: "test-access-key".to_string(),
        secret_access_key: "test-secret".to_string(),
        bucket_name: "vod-test".to_string(),
        region: "auto".to_string(),
    }))
}

fn test_state(config: ApiConfig) -> AppState {
    AppState::assemble(
        config,
        Arc::new(MemoryJobStore::new(RetryPolicy::default())),
        3,
        Arc::new(MemoryCatalog::new()),
        StatusHub::in_process(),
        dummy_storage(),
    )
}

fn app() -> axum::Router {
    create_router(test_state(ApiConfig::default()), None)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = app();

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["queue_waiting"], 0);
}

#[tokio::test]
async fn test_upload_submit_status_flow() {
    let app = app();

    // Register an upload.
    let response = app
        .clone()
        .oneshot(post_json("/api/uploads", json!({"fileName": "talk.mp4"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let media_id = body["mediaId"].as_str().unwrap().to_string();
    assert_eq!(
        body["sourceKey"],
        format!("sources/{media_id}/original").as_str()
    );
    assert!(body["uploadUrl"].as_str().unwrap().contains(&media_id));

    // Submit a job for it.
    let response = app
        .clone()
        .oneshot(post_json("/api/jobs", json!({"mediaId": media_id})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    assert_eq!(body["mediaId"], media_id.as_str());

    // The job is queued.
    let response = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["state"], "waiting");
    assert_eq!(body["attempt"], 0);
    assert_eq!(
        body["sourceKey"],
        format!("sources/{media_id}/original").as_str()
    );

    // The media item is still uploading; no worker has touched it.
    let response = app
        .oneshot(get(&format!("/api/media/{media_id}/status")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["state"], "uploading");
    assert_eq!(body["progress"], 0);
}

#[tokio::test]
async fn test_submit_with_explicit_source_key() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/uploads", json!({})))
        .await
        .unwrap();
    let media_id = json_body(response).await["mediaId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/jobs",
            json!({"mediaId": media_id, "sourceKey": "sources/custom/take-2.mp4"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = json_body(response).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    // The override, not the registered key, reaches the queue.
    let response = app
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["sourceKey"], "sources/custom/take-2.mp4");
}

#[tokio::test]
async fn test_duplicate_submit_returns_conflict() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/uploads", json!({})))
        .await
        .unwrap();
    let media_id = json_body(response).await["mediaId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(post_json("/api/jobs", json!({"mediaId": media_id})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .oneshot(post_json("/api/jobs", json!({"mediaId": media_id})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_submit_for_unknown_media_is_not_found() {
    let app = app();

    let response = app
        .oneshot(post_json("/api/jobs", json!({"mediaId": "no-such-media"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_for_unknown_media_is_not_found() {
    let app = app();

    let response = app
        .oneshot(get("/api/media/no-such-media/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_url_requires_ready_media() {
    let state = test_state(ApiConfig::default());
    let app = create_router(state.clone(), None);

    let response = app
        .clone()
        .oneshot(post_json("/api/uploads", json!({})))
        .await
        .unwrap();
    let media_id = json_body(response).await["mediaId"]
        .as_str()
        .unwrap()
        .to_string();

    // Not ready yet.
    let response = app
        .clone()
        .oneshot(get(&format!("/api/media/{media_id}/download-url")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Walk the record to ready and try again.
    let media_id = vod_models::MediaId::from(media_id.as_str());
    state
        .catalog
        .write_state(StateWrite::new(
            media_id.clone(),
            MediaState::Processing,
            StateVersion::for_attempt(0, 0),
        ))
        .await
        .unwrap();
    state
        .catalog
        .write_state(StateWrite::new(
            media_id.clone(),
            MediaState::Ready,
            StateVersion::terminal(0),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(get(&format!(
            "/api/media/{media_id}/download-url?rendition=480p.mp4"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["rendition"], "480p.mp4");
    assert!(body["downloadUrl"]
        .as_str()
        .unwrap()
        .contains(&format!("renditions/{media_id}/480p.mp4")));
}

#[tokio::test]
async fn test_reconciler_requeues_stuck_media() {
    let config = ApiConfig {
        stuck_threshold: Duration::from_secs(0),
        ..ApiConfig::default()
    };
    let state = test_state(config);
    let app = create_router(state.clone(), None);

    let response = app
        .clone()
        .oneshot(post_json("/api/uploads", json!({})))
        .await
        .unwrap();
    let media_id = json_body(response).await["mediaId"]
        .as_str()
        .unwrap()
        .to_string();
    let media_id = vod_models::MediaId::from(media_id.as_str());

    // A worker marked it processing and then vanished; no job exists.
    state
        .catalog
        .write_state(StateWrite::new(
            media_id.clone(),
            MediaState::Processing,
            StateVersion::for_attempt(0, 0),
        ))
        .await
        .unwrap();

    // Let the record age past the zero-second threshold.
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let scanner = ReconciliationScanner::new(state.clone());
    let report = scanner.check_once().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            stuck: 1,
            requeued: 1,
            purged: 0,
        }
    );

    // The second pass sees the re-enqueued job and leaves it alone.
    let report = scanner.check_once().await.unwrap();
    assert_eq!(report.stuck, 1);
    assert_eq!(report.requeued, 0);

    let job = state
        .broker
        .find_active_by_media(&media_id)
        .await
        .unwrap()
        .expect("re-enqueued job");
    assert_eq!(job.media_id, media_id);
}
