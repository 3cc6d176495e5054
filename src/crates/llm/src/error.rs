//! Error types for the Ollama integration.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when talking to the chat backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Model discovery returned no installed models.
    #[error("No local Ollama models found. Pull one via 'ollama pull <model>'")]
    NoLocalModels,

    /// Invalid response from the backend.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// General provider error.
    #[error("Provider error: {0}")]
    Provider(String),
}

impl From<LlmError> for fluxgraph_core::GraphError {
    fn from(err: LlmError) -> Self {
        fluxgraph_core::GraphError::Node(err.to_string())
    }
}
