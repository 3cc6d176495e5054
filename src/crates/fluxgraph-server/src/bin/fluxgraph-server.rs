//! fluxgraph server binary.
//!
//! Boots the tool registry, the built-in node catalog, the execution
//! queue with its single worker, and the WebSocket transport.

use anyhow::Context;
use clap::Parser;
use fluxgraph_server::ws::{router, AppState};
use fluxgraph_server::Engine;
use std::sync::Arc;
use tooling::tools::{register_tool_object, WebSearchTool};

#[derive(Parser)]
#[command(name = "fluxgraph-server")]
#[command(about = "Graph execution server for the fluxgraph workbench", long_about = None)]
#[command(version)]
struct Args {
    /// Bind address
    #[arg(long, env = "FLUXGRAPH_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, env = "FLUXGRAPH_PORT", default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let args = Args::parse();

    // Provider-backed tools override the registry defaults.
    register_tool_object(Arc::new(WebSearchTool::new()))
        .context("registering web_search tool")?;

    let engine = Engine::start(fluxgraph_nodes::builtin_catalog());
    let state = AppState {
        queue: engine.queue.clone(),
        catalog: engine.catalog.clone(),
    };

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("fluxgraph server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, router(state))
        .await
        .context("serving")?;

    Ok(())
}
