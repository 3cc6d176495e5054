//! # llm
//!
//! Ollama integration for fluxgraph: a typed HTTP client over the backend
//! API (`/api/chat`, `/api/show`, `/api/tags`) and the streaming chat node
//! that drives it, including bounded tool orchestration against the
//! process-wide tool registry, seed policies, context-window clamping, and
//! cooperative cancellation with best-effort backend cleanup.

pub mod chat_node;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod ollama;

pub use chat_node::{OllamaChatNode, NODE_TYPE as CHAT_NODE_TYPE};
pub use config::{env_host, OllamaConfig, DEFAULT_HOST};
pub use error::{LlmError, Result};
pub use ollama::{
    apply_context_window, resolve_max_context, ChatPayload, ChatResponse, ModelShow, OllamaClient,
};
