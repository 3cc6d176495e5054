//! # fluxgraph-nodes
//!
//! Built-in node implementations and their catalog registration. The
//! server calls [`register_builtins`] once at startup; plugins and tests
//! can register additional types on the same catalog afterwards.
//!
//! | Type id | Kind | Behaviour |
//! |---|---|---|
//! | `Text` | Batch | Emits its `text` param |
//! | `AssetSymbol` | Batch | Emits a typed asset symbol |
//! | `ApiKey` | Batch | Emits a secret from param or environment |
//! | `ToolsSelector` | Batch | Emits selected registry tool schemas |
//! | `WebSearchTool` | Batch | Emits the configured `web_search` schema |
//! | `IntervalFeed` | Streaming | Emits periodic ticks |
//! | `OllamaChat` | Streaming | LLM chat with tool orchestration |

pub mod feed;
pub mod inputs;
pub mod tools;

pub use feed::IntervalFeedNode;
pub use inputs::{ApiKeyNode, AssetSymbolNode, TextNode};
pub use tools::{ToolsSelectorNode, WebSearchToolNode};

use fluxgraph_core::NodeCatalog;
use llm::OllamaChatNode;

/// Register every built-in node type on `catalog`.
pub fn register_builtins(catalog: &mut NodeCatalog) {
    catalog.register("Text", TextNode::template());
    catalog.register("AssetSymbol", AssetSymbolNode::template());
    catalog.register("ApiKey", ApiKeyNode::template());
    catalog.register("ToolsSelector", ToolsSelectorNode::template());
    catalog.register("WebSearchTool", WebSearchToolNode::template());
    catalog.register("IntervalFeed", IntervalFeedNode::template());
    catalog.register(llm::CHAT_NODE_TYPE, OllamaChatNode::template());
}

/// A catalog preloaded with the built-ins.
pub fn builtin_catalog() -> NodeCatalog {
    let mut catalog = NodeCatalog::new();
    register_builtins(&mut catalog);
    catalog
}
