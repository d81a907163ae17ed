// =============================================================================
// WebSocket Handler — Realtime alert feed
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. A `connected` hello carrying the server clock.
//   2. Every alert envelope produced by the broadcast sink, as it is
//      dispatched.
//
// The handler answers Ping with Pong and ends on Close or a send error. A
// client too slow to keep up skips the frames it missed and is told how many.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::app_state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before the hello so no alert falls between the two.
    let mut feed = state.alert_feed.subscribe();
    let (mut sender, mut receiver) = socket.split();
    info!(subscribers = state.alert_feed.receiver_count(), "WebSocket client connected");

    let hello = serde_json::json!({
        "type": "connected",
        "server_timestamp": state.now_ms(),
        "utc_synced": state.clock.is_synced(),
    });
    if sender.send(Message::Text(hello.to_string())).await.is_err() {
        debug!("WebSocket closed before hello");
        return;
    }

    loop {
        tokio::select! {
            // ── Push: forward dispatched alerts ─────────────────────────
            frame = feed.recv() => {
                match frame {
                    Ok(text) => {
                        if let Err(e) = sender.send(Message::Text(text)).await {
                            debug!(error = %e, "WebSocket send failed, disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagging, frames dropped");
                        let notice = serde_json::json!({ "type": "lagged", "skipped": skipped });
                        if sender.send(Message::Text(notice.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("alert feed closed, disconnecting client");
                        break;
                    }
                }
            }

            // ── Recv: control frames from the client ────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error, disconnecting");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
