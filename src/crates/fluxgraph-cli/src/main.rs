//! # fluxgraph
//!
//! Recurring graph runner: submits a saved graph to a fluxgraph server on
//! a fixed cadence and prints the status stream. Useful for scheduled
//! analytics graphs (market scans, periodic LLM summaries) without keeping
//! a browser session open.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// How long a run may stay silent before it is considered finished.
const QUIET_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "fluxgraph")]
#[command(about = "Recurring fluxgraph runner", long_about = None)]
#[command(version)]
struct Args {
    /// Path to a saved graph JSON export
    #[arg(long)]
    graph: PathBuf,

    /// Run cadence
    #[arg(long, value_enum)]
    interval: Interval,

    /// Backend host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Backend port
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Number of runs (0 = run forever)
    #[arg(long, default_value_t = 0)]
    runs: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Interval {
    #[value(name = "5m")]
    M5,
    #[value(name = "15m")]
    M15,
    #[value(name = "30m")]
    M30,
    #[value(name = "1h")]
    H1,
    #[value(name = "1d")]
    D1,
}

impl Interval {
    fn duration(self) -> Duration {
        let secs = match self {
            Interval::M5 => 5 * 60,
            Interval::M15 => 15 * 60,
            Interval::M30 => 30 * 60,
            Interval::H1 => 60 * 60,
            Interval::D1 => 24 * 60 * 60,
        };
        Duration::from_secs(secs)
    }

    fn label(self) -> &'static str {
        match self {
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::D1 => "1d",
        }
    }
}

/// Submit the graph once and consume frames until the run goes quiet or
/// the server closes the connection.
async fn run_once(ws_url: &str, graph: &Value) -> Result<()> {
    let (mut ws, _) = connect_async(ws_url)
        .await
        .with_context(|| format!("connecting to {ws_url}"))?;

    ws.send(Message::Text(json!({"type": "connect"}).to_string()))
        .await?;
    ws.send(Message::Text(
        json!({"type": "graph", "graph_data": graph}).to_string(),
    ))
    .await?;

    loop {
        let frame = match tokio::time::timeout(QUIET_TIMEOUT, ws.next()).await {
            // Quiet for a full minute; assume the job finished.
            Err(_) => break,
            Ok(None) => break,
            Ok(Some(Err(_))) => break,
            Ok(Some(Ok(frame))) => frame,
        };
        let Message::Text(text) = frame else { continue };
        let Ok(data) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        match data.get("type").and_then(Value::as_str) {
            Some(kind @ ("status" | "error" | "stopped")) => {
                println!("[{kind}] {data}");
            }
            _ => {}
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let args = Args::parse();

    let raw = match std::fs::read_to_string(&args.graph) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Graph file not found: {} ({e})", args.graph.display());
            return std::process::ExitCode::from(1);
        }
    };
    let graph: Value = match serde_json::from_str(&raw) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Failed to read graph JSON: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    let ws_url = format!("ws://{}:{}/execute", args.host, args.port);
    let delay = args.interval.duration();
    println!(
        "Starting recurring runner -> {} every {} (ws: {ws_url})",
        args.graph.display(),
        args.interval.label()
    );

    let mut count: u32 = 0;
    loop {
        count += 1;
        println!("Run #{count}...");
        if let Err(e) = run_once(&ws_url, &graph).await {
            println!("Run failed: {e:#}");
        }
        if args.runs > 0 && count >= args.runs {
            break;
        }
        tokio::time::sleep(delay).await;
    }

    println!("Done.");
    std::process::ExitCode::SUCCESS
}
