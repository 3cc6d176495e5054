//! WebSocket wire protocol.
//!
//! Engine → client frames are JSON objects with a `type` discriminator.
//! For one job the engine emits, in order: a waiting status, a starting
//! status, a mode status, zero or more data frames, and exactly one
//! terminal frame (a finished/stopped status or an error).
//!
//! Client → engine: the first meaningful frame is the graph submission,
//! either the bare editor export or wrapped as
//! `{"type": "graph", "graph_data": {...}}`. A leading
//! `{"type": "connect"}` frame is tolerated and ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_WAITING: &str = "Waiting for available slot";
pub const STATUS_STARTING: &str = "Starting execution";
pub const STATUS_EXECUTING_BATCH: &str = "Executing batch";
pub const STATUS_STREAM_STARTING: &str = "Stream starting";
pub const STATUS_BATCH_FINISHED: &str = "Batch finished";
pub const STATUS_STREAM_FINISHED: &str = "Stream finished";
pub const STATUS_STOPPED: &str = "Stopped";

/// Engine → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        message: String,
    },
    Data {
        stream: bool,
        results: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn status(message: impl Into<String>) -> Self {
        ServerMessage::Status {
            message: message.into(),
        }
    }

    pub fn data(stream: bool, results: Map<String, Value>) -> Self {
        ServerMessage::Data { stream, results }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// True for the last frame of a job: a finished/stopped status or an
    /// error.
    pub fn is_terminal(&self) -> bool {
        match self {
            ServerMessage::Error { .. } => true,
            ServerMessage::Status { message } => matches!(
                message.as_str(),
                STATUS_BATCH_FINISHED | STATUS_STREAM_FINISHED | STATUS_STOPPED
            ),
            ServerMessage::Data { .. } => false,
        }
    }
}

/// Extract the graph payload from the first client frame, if it is one.
///
/// Accepts the bare editor export (an object with `nodes`/`links`) or the
/// wrapped `{"type": "graph", "graph_data": {...}}` form. Returns `None`
/// for non-submission frames such as `{"type": "connect"}`.
pub fn extract_submission(frame: &Value) -> Option<Value> {
    match frame.get("type").and_then(Value::as_str) {
        Some("graph") => frame.get("graph_data").cloned(),
        Some(_) => None,
        None => frame.is_object().then(|| frame.clone()),
    }
}
