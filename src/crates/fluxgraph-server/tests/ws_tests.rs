//! Transport shell integration tests over a real socket.

use fluxgraph_server::ws::{router, AppState};
use fluxgraph_server::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server() -> (String, Engine) {
    let engine = Engine::start(fluxgraph_nodes::builtin_catalog());
    let state = AppState {
        queue: engine.queue.clone(),
        catalog: engine.catalog.clone(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (addr.to_string(), engine)
}

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_frame(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for ws frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn nodes_endpoint_lists_builtins() {
    let (addr, _engine) = spawn_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/nodes"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let nodes = body["nodes"].as_object().unwrap();
    assert!(nodes.contains_key("Text"));
    assert!(nodes.contains_key("OllamaChat"));
    let chat = &nodes["OllamaChat"];
    assert!(chat["inputs"]
        .as_array()
        .unwrap()
        .iter()
        .any(|i| i["name"] == json!("prompt")));
}

#[tokio::test]
async fn empty_graph_round_trip_over_websocket() {
    let (addr, _engine) = spawn_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/execute")).await.unwrap();

    // The runner's connect preamble is tolerated before the submission.
    ws.send(Message::Text(json!({"type": "connect"}).to_string()))
        .await
        .unwrap();
    ws.send(Message::Text(
        json!({"type": "graph", "graph_data": {"nodes": [], "links": []}}).to_string(),
    ))
    .await
    .unwrap();

    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["message"], json!("Waiting for available slot"));
    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["message"], json!("Starting execution"));
    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["message"], json!("Executing batch"));
    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["type"], json!("data"));
    assert_eq!(frame["stream"], json!(false));
    assert_eq!(frame["results"], json!({}));
    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["message"], json!("Batch finished"));

    // Terminal frame closes the socket server-side.
    let trailing = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next()).await;
    match trailing {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => {}
        other => panic!("expected closed socket, got {other:?}"),
    }
}

#[tokio::test]
async fn bare_graph_submission_runs_pipeline() {
    let (addr, _engine) = spawn_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/execute")).await.unwrap();

    // Bare LiteGraph export, no wrapper.
    ws.send(Message::Text(
        json!({
            "nodes": [{"id": 1, "type": "Text", "properties": {"text": "hi"}}],
            "links": []
        })
        .to_string(),
    ))
    .await
    .unwrap();

    loop {
        let frame = next_frame(&mut ws).await;
        if frame["type"] == json!("data") {
            assert_eq!(frame["results"]["1"]["text"], json!("hi"));
            break;
        }
    }
}

#[tokio::test]
async fn disconnect_during_stream_cancels_job() {
    let (addr, engine) = spawn_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/execute")).await.unwrap();

    // Unbounded interval feed keeps the job running until cancelled.
    ws.send(Message::Text(
        json!({
            "nodes": [{"id": 1, "type": "IntervalFeed",
                       "properties": {"period_ms": 10, "count": 0}}],
            "links": []
        })
        .to_string(),
    ))
    .await
    .unwrap();

    // Wait for at least one streaming data frame, then vanish.
    loop {
        let frame = next_frame(&mut ws).await;
        if frame["type"] == json!("data") && frame["stream"] == json!(true) {
            break;
        }
    }
    drop(ws);

    // The worker must stop the executor and free the running slot.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if engine.queue.running_id().await.is_none() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "running slot never freed after disconnect"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn malformed_graph_is_rejected_with_error_frame() {
    let (addr, _engine) = spawn_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/execute")).await.unwrap();

    ws.send(Message::Text(
        json!({"nodes": "not-a-list", "links": []}).to_string(),
    ))
    .await
    .unwrap();

    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["type"], json!("error"));
    assert!(frame["message"]
        .as_str()
        .unwrap()
        .contains("invalid graph description"));
}
