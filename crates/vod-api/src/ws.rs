//! WebSocket status subscriptions.
//!
//! One connection watches one media item. The server pushes a snapshot
//! of the current catalog state first, then forwards live status
//! events until a terminal event arrives or the client disconnects.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use vod_models::{MediaId, StatusEvent};

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// GET /ws/status/:media_id
pub async fn ws_status(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(media_id): Path<String>,
) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection();

    ws.on_upgrade(|socket| async move {
        handle_status_socket(socket, state, MediaId::from_string(media_id)).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

fn event_type(event: &StatusEvent) -> &'static str {
    if event.error.is_some() && !event.is_terminal() {
        return "transient_error";
    }
    match event.state {
        vod_models::MediaState::Uploading => "uploading",
        vod_models::MediaState::Processing => "processing",
        vod_models::MediaState::Ready => "ready",
        vod_models::MediaState::Failed => "failed",
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &StatusEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(_) => return false,
    };
    metrics::record_ws_event_sent(event_type(event));
    sender.send(Message::Text(json)).await.is_ok()
}

async fn handle_status_socket(socket: WebSocket, state: AppState, media_id: MediaId) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so no transition between
    // the two is lost.
    let mut events = match state.hub.subscribe(&media_id).await {
        Ok(events) => events,
        Err(e) => {
            warn!(media_id = %media_id, error = %e, "status subscription failed");
            let _ = sender
                .send(Message::Text(
                    serde_json::json!({"error": "subscription unavailable"}).to_string(),
                ))
                .await;
            return;
        }
    };

    info!(media_id = %media_id, "status subscription opened");

    // Snapshot of the current state, so a late subscriber is never
    // stuck waiting for an event that already happened.
    match state.catalog.read(&media_id).await {
        Ok(record) => {
            let mut snapshot = StatusEvent::processing(record.media_id.clone(), 0);
            snapshot.state = record.state;
            snapshot.progress = Some(record.progress);
            snapshot.error = record.error_message;
            let terminal = snapshot.is_terminal();
            if !send_event(&mut sender, &snapshot).await || terminal {
                return;
            }
        }
        Err(e) => {
            let _ = sender
                .send(Message::Text(
                    serde_json::json!({"error": e.to_string()}).to_string(),
                ))
                .await;
            return;
        }
    }

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        if !send_event(&mut sender, &event).await {
                            warn!(media_id = %media_id, "WebSocket send failed, client disconnected");
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed events; the next one carries the
                        // latest state, so just keep reading.
                        debug!(media_id = %media_id, missed = n, "status subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!(media_id = %media_id, "heartbeat failed, client disconnected");
                    break;
                }
            }
            client_msg = receiver.next() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!(media_id = %media_id, "client closed status subscription");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    info!(media_id = %media_id, "status subscription ended");
}
