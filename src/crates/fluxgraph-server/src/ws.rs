//! WebSocket transport shell.
//!
//! Routes:
//!
//! - `GET /nodes` — catalog metadata for the editor palette
//! - `GET /execute` — WebSocket; the first graph frame is inferred as a
//!   submission, queue frames are pumped back, and a client disconnect at
//!   any stage cancels the job
//!
//! The shell owns no execution logic: it translates between socket frames
//! and the queue's [`ClientHandle`] channel.

use crate::protocol::{extract_submission, ServerMessage, STATUS_WAITING};
use crate::queue::{ClientHandle, ExecutionQueue};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fluxgraph_core::{GraphSpec, NodeCatalog};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state for the transport routes.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<ExecutionQueue>,
    pub catalog: Arc<NodeCatalog>,
}

/// Build the transport router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/nodes", get(list_nodes))
        .route("/execute", get(execute_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Editor palette metadata: inputs, outputs, and params per node type.
async fn list_nodes(State(state): State<AppState>) -> Json<Value> {
    let nodes = serde_json::to_value(state.catalog.describe()).unwrap_or_default();
    Json(serde_json::json!({ "nodes": nodes }))
}

async fn execute_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // First meaningful frame is the submission.
    let graph = match await_submission(&mut socket).await {
        Some(Ok(graph)) => graph,
        Some(Err(reason)) => {
            let frame = ServerMessage::error(reason);
            let _ = send_frame(&mut socket, &frame).await;
            return;
        }
        None => return,
    };

    let (client, mut rx) = ClientHandle::channel(64);
    let connection_id = client.connection_id();
    client.send(ServerMessage::status(STATUS_WAITING)).await;
    let job = state.queue.enqueue(client, graph).await;
    info!(%connection_id, job = job.id, "graph submitted");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(frame) = outbound else { break };
                let terminal = frame.is_terminal();
                if send_frame(&mut socket, &frame).await.is_err() {
                    state.queue.cancel_job(&job).await;
                    break;
                }
                if terminal {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        debug!(job = job.id, "client left; cancelling job");
                        state.queue.cancel_job(&job).await;
                        break;
                    }
                    // Frames after submission are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Read frames until a graph submission (or the client leaves).
async fn await_submission(socket: &mut WebSocket) -> Option<Result<GraphSpec, String>> {
    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => return Some(Err(format!("invalid JSON submission: {e}"))),
        };
        let Some(payload) = extract_submission(&value) else {
            continue;
        };
        return Some(match GraphSpec::from_value(payload) {
            Ok(graph) => Ok(graph),
            Err(e) => {
                warn!("rejecting malformed graph: {e}");
                Err(format!("invalid graph description: {e}"))
            }
        });
    }
    None
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(text)).await
}
