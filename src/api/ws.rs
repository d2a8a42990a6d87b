//! Dashboard WebSocket: live stream of pipeline events.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{AppState, DEFAULT_ESCALATION_LIMIT, Escalation, escalation_queue};

/// Frames the dashboard gets besides plain `PipelineEvent`s.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DashboardFrame {
    /// Current escalation queue. Sent on connect and after falling behind.
    Resync {
        missed: u64,
        escalations: Vec<Escalation>,
    },
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Dashboard client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // Subscribe before the snapshot so nothing falls between the two.
    let mut rx = state.processor.events().subscribe();

    if !send_resync(&mut socket, &state, 0).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event)
                            && socket.send(Message::Text(json.into())).await.is_err()
                        {
                            debug!("Dashboard client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "Dashboard client lagged behind broadcast");
                        if !send_resync(&mut socket, &state, n).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event broadcast closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Dashboard client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Dashboard WebSocket error");
                        break;
                    }
                    // The stream is read-only.
                    _ => {}
                }
            }
        }
    }
}

/// Send the escalation queue snapshot. Returns false once the client is gone.
async fn send_resync(socket: &mut WebSocket, state: &AppState, missed: u64) -> bool {
    let escalations = match escalation_queue(state.db.as_ref(), DEFAULT_ESCALATION_LIMIT).await {
        Ok(queue) => queue,
        Err(e) => {
            warn!(error = %e, "Failed to load escalation queue for resync");
            Vec::new()
        }
    };
    let frame = DashboardFrame::Resync {
        missed,
        escalations,
    };
    match serde_json::to_string(&frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}
