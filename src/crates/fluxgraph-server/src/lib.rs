//! # fluxgraph-server
//!
//! Server side of the fluxgraph workbench: FIFO execution queue, the
//! single worker loop driving the graph executor, and the WebSocket
//! transport shell that relays status, data, and error frames to the
//! browser editor.
//!
//! ```text
//! browser ──ws──▶ ws::handle_socket ──▶ ExecutionQueue ──▶ worker
//!    ▲                                                      │
//!    └──────── status / data / error frames ◀───────────────┘
//! ```

pub mod protocol;
pub mod queue;
pub mod worker;
pub mod ws;

pub use protocol::ServerMessage;
pub use queue::{ClientHandle, DoneFlag, ExecutionJob, ExecutionQueue};
pub use worker::{spawn_worker, Engine};
pub use ws::{router, AppState};
