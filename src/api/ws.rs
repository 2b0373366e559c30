//! WebSocket stream of notification events.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::events::NotificationEvent;
use crate::pipeline::types::{WorkloadId, WorkloadState};

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutbound {
    /// Current state of every workload. Sent on connect and after lag.
    Sync { workloads: Vec<WorkloadState> },
    Event { event: NotificationEvent },
}

/// Client → server frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WsCommand {
    Signal { workload: String },
    Cancel { workload: String },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_frame(socket: &mut WebSocket, frame: &WsOutbound) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WS frame");
            true
        }
    }
}

async fn sync_frame(state: &AppState) -> WsOutbound {
    let workloads = match state.store.list_workloads().await {
        Ok(workloads) => workloads,
        Err(e) => {
            warn!(error = %e, "Failed to load workloads for WS sync");
            Vec::new()
        }
    };
    WsOutbound::Sync { workloads }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");

    // Subscribe before the sync so nothing falls between the two.
    let mut rx = state.events.subscribe();

    if !send_frame(&mut socket, &sync_frame(&state).await).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_frame(&mut socket, &WsOutbound::Event { event }).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        if !send_frame(&mut socket, &sync_frame(&state).await).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &state).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn handle_client_message(text: &str, state: &AppState) {
    let command = match serde_json::from_str::<WsCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return;
        }
    };
    match command {
        WsCommand::Signal { workload } => {
            let id = WorkloadId::new(workload);
            match state.scheduler.signal_input(&id).await {
                Ok(()) => info!(workload = %id, "Input signalled via WS"),
                Err(e) => warn!(workload = %id, error = %e, "Signal failed via WS"),
            }
        }
        WsCommand::Cancel { workload } => {
            let id = WorkloadId::new(workload);
            match state.scheduler.cancel(&id).await {
                Ok(()) => info!(workload = %id, "Workload cancelled via WS"),
                Err(e) => warn!(workload = %id, error = %e, "Cancel failed via WS"),
            }
        }
    }
}
