//! # fluxgraph-core
//!
//! Core graph execution engine for the fluxgraph workbench: a browser
//! editor composes a DAG of typed computation nodes (data inputs,
//! indicators, LLM chat, tools) and submits it for server-side execution;
//! this crate validates, orders, and evaluates that graph.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     fluxgraph-core                       │
//! │                                                          │
//! │   GraphSpec ──────┐                                      │
//! │   (editor JSON)   │                                      │
//! │                   ▼                                      │
//! │   NodeCatalog ─▶ GraphExecutor ─▶ ExecutionResults       │
//! │   (type ids →     │   batch: execute()                   │
//! │    builders)      │   streaming: stream() ticks          │
//! │                   │                                      │
//! │                   └─▶ NodeInstance (Batch | Streaming)   │
//! │                        typed slots, params, stop()       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Key types:
//!
//! - [`GraphSpec`] / [`Link`] — the LiteGraph-shaped graph description.
//! - [`NodeCatalog`] — explicit registration of node types.
//! - [`NodeInstance`] — a constructed node, tagged [`BatchNode`] or
//!   [`StreamingNode`].
//! - [`GraphExecutor`] — topological validation and evaluation, with
//!   progress reporting and cooperative cancellation via [`CancelFlag`].
//! - [`GraphError`] — the construction/execution error taxonomy.
//!
//! Values flow through slots as `serde_json::Value`s typed by [`PortType`];
//! the engine forwards opaque payloads (frames, indicator outputs) without
//! interpreting them.

pub mod catalog;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub mod stream;
pub mod types;

pub use catalog::{params_from, NodeBuilder, NodeCatalog, NodeTemplate};
pub use error::{GraphError, GraphResult};
pub use executor::{ExecutionResults, GraphExecutor};
pub use graph::{GraphSpec, Link, NodeDesc};
pub use node::{
    validate_inputs, BatchNode, CancelFlag, InputMap, InputSpec, NodeCore, NodeId, NodeInstance,
    NodeStream, OutputMap, OutputSpec, ParamMeta, Params, ProgressFn, StreamPart, StreamingNode,
};
pub use stream::SnapshotTick;
pub use types::{AssetClass, AssetSymbol, PortType};
