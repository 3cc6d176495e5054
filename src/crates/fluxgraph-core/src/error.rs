//! Error types for graph construction and execution
//!
//! All failures surface as [`GraphError`]. Construction-time problems
//! (unknown node types, cycles, bad links) are distinct from run-time
//! problems (input validation, node execution) so the transport shell can
//! report them precisely. Cancellation is modelled as its own variant and is
//! never reported to clients as an error.

use crate::node::NodeId;
use thiserror::Error;

/// Errors produced while building or executing a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node descriptor referenced a type id that is not in the catalog.
    #[error("unknown node type: {type_name}")]
    UnknownNodeType { type_name: String },

    /// The link structure contains at least one cycle.
    #[error("graph contains cycles")]
    CycleDetected,

    /// A link references a missing node, an out-of-range slot, or
    /// incompatible slot types.
    #[error("invalid link {link_id}: {reason}")]
    LinkInvalid { link_id: u64, reason: String },

    /// A node's assembled inputs failed schema validation.
    #[error("invalid inputs for node {node_id}: {details}")]
    InputValidation { node_id: NodeId, details: String },

    /// A node returned an error during execution. The graph is aborted.
    #[error("node {node_id} failed: {source}")]
    NodeExecution {
        node_id: NodeId,
        #[source]
        source: Box<GraphError>,
    },

    /// Execution was cancelled cooperatively.
    #[error("execution cancelled")]
    Cancelled,

    /// A node-level failure that is not itself another graph error.
    #[error("{0}")]
    Node(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Wrap a node-produced error with the failing node's id.
    pub fn in_node(node_id: NodeId, err: GraphError) -> Self {
        match err {
            GraphError::Cancelled => GraphError::Cancelled,
            other => GraphError::NodeExecution {
                node_id,
                source: Box::new(other),
            },
        }
    }

    /// True when this error (or its node wrapper) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GraphError::Cancelled)
    }
}

/// Result alias used across the graph engine.
pub type GraphResult<T> = std::result::Result<T, GraphError>;
