//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vod_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vod_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vod_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "vod_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "vod_ws_connections_active";
    pub const WS_EVENTS_SENT: &str = "vod_ws_events_sent_total";

    // Queue metrics
    pub const QUEUE_WAITING: &str = "vod_queue_waiting";
    pub const QUEUE_LEASED: &str = "vod_queue_leased";
    pub const UPLOADS_REGISTERED_TOTAL: &str = "vod_uploads_registered_total";
    pub const JOBS_SUBMITTED_TOTAL: &str = "vod_jobs_submitted_total";

    // Reconciliation metrics
    pub const RECONCILE_REQUEUED_TOTAL: &str = "vod_reconcile_requeued_total";
    pub const RECONCILE_PURGED_TOTAL: &str = "vod_reconcile_purged_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a new WebSocket status subscription.
pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record a status event delivered over WebSocket.
pub fn record_ws_event_sent(event_type: &str) {
    let labels = [("type", event_type.to_string())];
    counter!(names::WS_EVENTS_SENT, &labels).increment(1);
}

/// Update queue depth gauges.
pub fn set_queue_depth(waiting: u64, leased: u64) {
    gauge!(names::QUEUE_WAITING).set(waiting as f64);
    gauge!(names::QUEUE_LEASED).set(leased as f64);
}

/// Record upload registered.
pub fn record_upload_registered() {
    counter!(names::UPLOADS_REGISTERED_TOTAL).increment(1);
}

/// Record job submitted.
pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Record a stuck media item re-enqueued by the reconciler.
pub fn record_reconcile_requeued() {
    counter!(names::RECONCILE_REQUEUED_TOTAL).increment(1);
}

/// Record terminal jobs purged by the reconciler.
pub fn record_reconcile_purged(count: u64) {
    counter!(names::RECONCILE_PURGED_TOTAL).increment(count);
}

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    let path = regex_lite::Regex::new(
        r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    )
    .unwrap()
    .replace_all(path, ":id");
    let path = regex_lite::Regex::new(r"/media/[a-zA-Z0-9_-]+")
        .unwrap()
        .replace_all(&path, "/media/:media_id");
    let path = regex_lite::Regex::new(r"/jobs/[a-zA-Z0-9_-]+")
        .unwrap()
        .replace_all(&path, "/jobs/:job_id");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
