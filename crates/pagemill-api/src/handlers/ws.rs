//! WebSocket telemetry endpoints, each streaming JSON frames at 1 Hz.
//!
//! A subscriber that misses the write deadline is dropped rather than
//! allowed to backpressure the ticker.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deadline for one frame write before the subscriber is dropped.
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

pub async fn pool_status(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| stream_telemetry(socket, state, TelemetryView::Pools))
}

pub async fn system_stats(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| stream_telemetry(socket, state, TelemetryView::System))
}

pub async fn spider_stats(
    ws: WebSocketUpgrade,
    Path(spider_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_spider_stats(socket, state, spider_id))
}

#[derive(Clone, Copy)]
enum TelemetryView {
    Pools,
    System,
}

async fn stream_telemetry(mut socket: WebSocket, state: AppState, view: TelemetryView) {
    let mut frames = state.telemetry.subscribe();
    info!("Telemetry WebSocket subscriber connected");

    loop {
        let frame = match frames.recv().await {
            Ok(frame) => frame,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                debug!(missed, "Telemetry subscriber lagged");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        let payload = match view {
            TelemetryView::Pools => json!({
                "timestamp": frame.timestamp,
                "pools": frame.pools,
            }),
            TelemetryView::System => json!({
                "timestamp": frame.timestamp,
                "system": frame.system,
            }),
        };

        if !send_with_deadline(&mut socket, payload.to_string()).await {
            break;
        }
    }

    info!("Telemetry WebSocket subscriber disconnected");
}

async fn stream_spider_stats(mut socket: WebSocket, state: AppState, spider_id: String) {
    info!(spider = %spider_id, "Spider stats subscriber connected");
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let snapshot = state.tally.snapshot(&spider_id);
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Spider stats frame encode failed");
                break;
            }
        };
        if !send_with_deadline(&mut socket, payload).await {
            break;
        }
    }

    info!(spider = %spider_id, "Spider stats subscriber disconnected");
}

/// Returns false when the subscriber should be dropped.
async fn send_with_deadline(socket: &mut WebSocket, payload: String) -> bool {
    match tokio::time::timeout(WRITE_DEADLINE, socket.send(Message::Text(payload))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "WebSocket send failed, dropping subscriber");
            false
        }
        Err(_) => {
            warn!("WebSocket write deadline missed, dropping slow subscriber");
            false
        }
    }
}
