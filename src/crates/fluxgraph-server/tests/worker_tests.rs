//! Worker loop integration tests: status choreography, FIFO, cancellation.

use async_trait::async_trait;
use fluxgraph_core::{
    params_from, BatchNode, CancelFlag, GraphError, GraphResult, GraphSpec, InputMap, InputSpec,
    NodeCatalog, NodeCore, NodeId, NodeInstance, NodeStream, NodeTemplate, OutputMap, OutputSpec,
    Params, PortType, StreamPart,
};
use fluxgraph_server::protocol::{
    ServerMessage, STATUS_BATCH_FINISHED, STATUS_EXECUTING_BATCH, STATUS_STARTING,
    STATUS_STOPPED, STATUS_STREAM_STARTING, STATUS_WAITING,
};
use fluxgraph_server::queue::ClientHandle;
use fluxgraph_server::Engine;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

struct ConstNode {
    id: NodeId,
    value: Value,
}

#[async_trait]
impl NodeCore for ConstNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::new("x", PortType::Text)]
    }
}

#[async_trait]
impl BatchNode for ConstNode {
    async fn execute(&self, _inputs: InputMap) -> GraphResult<OutputMap> {
        let mut out = OutputMap::new();
        out.insert("x".into(), self.value.clone());
        Ok(out)
    }
}

struct AppendNode {
    id: NodeId,
    suffix: String,
}

#[async_trait]
impl NodeCore for AppendNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        vec![InputSpec::required("a", PortType::Text)]
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::new("y", PortType::Text)]
    }
}

#[async_trait]
impl BatchNode for AppendNode {
    async fn execute(&self, inputs: InputMap) -> GraphResult<OutputMap> {
        let a = inputs.get("a").and_then(Value::as_str).unwrap_or_default();
        let mut out = OutputMap::new();
        out.insert("y".into(), json!(format!("{a}{}", self.suffix)));
        Ok(out)
    }
}

struct FailNode {
    id: NodeId,
}

#[async_trait]
impl NodeCore for FailNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::new("x", PortType::Text)]
    }
}

#[async_trait]
impl BatchNode for FailNode {
    async fn execute(&self, _inputs: InputMap) -> GraphResult<OutputMap> {
        Err(GraphError::Node("boom".into()))
    }
}

/// Streaming node driven from the test: parts are injected through a
/// channel created at registration time.
struct GateNode {
    id: NodeId,
    parts: Mutex<Option<mpsc::UnboundedReceiver<StreamPart>>>,
    cancel: CancelFlag,
}

#[async_trait]
impl NodeCore for GateNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::new("assistant_text", PortType::Text)]
    }
    async fn stop(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl fluxgraph_core::StreamingNode for GateNode {
    async fn start(&self, _inputs: InputMap) -> GraphResult<NodeStream> {
        let mut parts = self
            .parts
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| GraphError::Node("gate already started".into()))?;
        let cancel = self.cancel.clone();
        let stream = async_stream::stream! {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    part = parts.recv() => {
                        let Some(part) = part else { return };
                        let done = part.done;
                        yield Ok(part);
                        if done { return; }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Handle for feeding a registered gate node.
#[derive(Clone)]
struct Gate {
    tx: mpsc::UnboundedSender<StreamPart>,
}

impl Gate {
    fn emit(&self, text: &str) {
        let mut outputs = OutputMap::new();
        outputs.insert("assistant_text".into(), json!(text));
        let _ = self.tx.send(StreamPart::partial(outputs));
    }

    fn finish(&self) {
        let _ = self.tx.send(StreamPart::finished(OutputMap::new()));
    }
}

fn test_catalog() -> (NodeCatalog, Gate) {
    let mut catalog = NodeCatalog::new();
    catalog.register(
        "ConstA",
        NodeTemplate::new(Vec::new(), Vec::new(), |id, params: Params| {
            let value = params.get("value").cloned().unwrap_or(json!("mock_data"));
            Ok(NodeInstance::Batch(Box::new(ConstNode { id, value })))
        })
        .with_default_params(params_from(&[("value", json!("mock_data"))])),
    );
    catalog.register(
        "Append",
        NodeTemplate::new(Vec::new(), Vec::new(), |id, params: Params| {
            let suffix = params
                .get("suffix")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(NodeInstance::Batch(Box::new(AppendNode { id, suffix })))
        }),
    );
    catalog.register(
        "Fail",
        NodeTemplate::new(Vec::new(), Vec::new(), |id, _params| {
            Ok(NodeInstance::Batch(Box::new(FailNode { id })))
        }),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let slot = Arc::new(Mutex::new(Some(rx)));
    catalog.register(
        "Gate",
        NodeTemplate::new(Vec::new(), Vec::new(), move |id, _params| {
            Ok(NodeInstance::Streaming(Box::new(GateNode {
                id,
                parts: Mutex::new(slot.lock().unwrap().take()),
                cancel: CancelFlag::new(),
            })))
        }),
    );

    (catalog, Gate { tx })
}

fn graph(value: Value) -> GraphSpec {
    GraphSpec::from_value(value).unwrap()
}

/// Submit like the transport shell does: waiting status first.
async fn submit(
    engine: &Engine,
    spec: GraphSpec,
) -> (
    fluxgraph_server::ExecutionJob,
    mpsc::Receiver<ServerMessage>,
) {
    let (client, rx) = ClientHandle::channel(64);
    client.send(ServerMessage::status(STATUS_WAITING)).await;
    let job = engine.queue.enqueue(client, spec).await;
    (job, rx)
}

fn assert_status(message: Option<ServerMessage>, expected: &str) {
    match message {
        Some(ServerMessage::Status { message }) => assert_eq!(message, expected),
        other => panic!("expected status '{expected}', got {other:?}"),
    }
}

async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> Option<ServerMessage> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for frame")
}

#[tokio::test]
async fn empty_graph_batch_flow() {
    let (catalog, _gate) = test_catalog();
    let engine = Engine::start(catalog);
    let (job, mut rx) = submit(&engine, GraphSpec::default()).await;

    assert_status(recv(&mut rx).await, STATUS_WAITING);
    assert_status(recv(&mut rx).await, STATUS_STARTING);
    assert_status(recv(&mut rx).await, STATUS_EXECUTING_BATCH);
    match recv(&mut rx).await {
        Some(ServerMessage::Data { stream, results }) => {
            assert!(!stream);
            assert!(results.is_empty());
        }
        other => panic!("expected data frame, got {other:?}"),
    }
    assert_status(recv(&mut rx).await, STATUS_BATCH_FINISHED);
    job.done.wait().await;
    assert_eq!(engine.queue.running_id().await, None);
}

#[tokio::test]
async fn linear_batch_produces_serialized_results() {
    let (catalog, _gate) = test_catalog();
    let engine = Engine::start(catalog);
    let spec = graph(json!({
        "nodes": [
            {"id": 1, "type": "ConstA", "properties": {}},
            {"id": 2, "type": "Append", "properties": {"suffix": "_processed"}}
        ],
        "links": [[1, 1, 0, 2, 0]]
    }));
    let (_job, mut rx) = submit(&engine, spec).await;

    let data = loop {
        match recv(&mut rx).await {
            Some(ServerMessage::Data { results, .. }) => break results,
            Some(ServerMessage::Status { .. }) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    };
    assert_eq!(data["2"]["y"], json!("mock_data_processed"));
    assert_status(recv(&mut rx).await, STATUS_BATCH_FINISHED);
}

#[tokio::test]
async fn cycle_is_reported_as_error_without_data() {
    let (catalog, _gate) = test_catalog();
    let engine = Engine::start(catalog);
    let spec = graph(json!({
        "nodes": [
            {"id": 1, "type": "Append", "properties": {}},
            {"id": 2, "type": "Append", "properties": {}}
        ],
        "links": [[1, 1, 0, 2, 0], [2, 2, 0, 1, 0]]
    }));
    let (_job, mut rx) = submit(&engine, spec).await;

    assert_status(recv(&mut rx).await, STATUS_WAITING);
    assert_status(recv(&mut rx).await, STATUS_STARTING);
    match recv(&mut rx).await {
        Some(ServerMessage::Error { message }) => assert!(message.contains("cycle")),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(recv(&mut rx).await.is_none(), "no frames after terminal error");
}

#[tokio::test]
async fn node_failure_is_reported_as_error() {
    let (catalog, _gate) = test_catalog();
    let engine = Engine::start(catalog);
    let spec = graph(json!({
        "nodes": [{"id": 3, "type": "Fail", "properties": {}}],
        "links": []
    }));
    let (_job, mut rx) = submit(&engine, spec).await;

    let error = loop {
        match recv(&mut rx).await {
            Some(ServerMessage::Error { message }) => break message,
            Some(ServerMessage::Status { .. }) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    };
    assert!(error.contains("boom"));
    assert!(error.contains('3'));
}

#[tokio::test]
async fn streaming_flow_emits_initial_then_stream_frames() {
    let (catalog, gate) = test_catalog();
    let engine = Engine::start(catalog);
    let spec = graph(json!({
        "nodes": [{"id": 1, "type": "Gate", "properties": {}}],
        "links": []
    }));
    let (_job, mut rx) = submit(&engine, spec).await;

    assert_status(recv(&mut rx).await, STATUS_WAITING);
    assert_status(recv(&mut rx).await, STATUS_STARTING);
    assert_status(recv(&mut rx).await, STATUS_STREAM_STARTING);

    // Initial static snapshot.
    match recv(&mut rx).await {
        Some(ServerMessage::Data { stream, .. }) => assert!(!stream),
        other => panic!("expected initial data, got {other:?}"),
    }

    gate.emit("hello");
    match recv(&mut rx).await {
        Some(ServerMessage::Data { stream, results }) => {
            assert!(stream);
            assert_eq!(results["1"]["assistant_text"], json!("hello"));
        }
        other => panic!("expected streaming data, got {other:?}"),
    }

    gate.finish();
    loop {
        match recv(&mut rx).await {
            Some(ServerMessage::Data { .. }) => continue,
            Some(ServerMessage::Status { message }) => {
                assert_eq!(message, "Stream finished");
                break;
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

#[tokio::test]
async fn cancellation_during_stream_stops_without_further_data() {
    let (catalog, gate) = test_catalog();
    let engine = Engine::start(catalog);
    let spec = graph(json!({
        "nodes": [{"id": 1, "type": "Gate", "properties": {}}],
        "links": []
    }));
    let (job, mut rx) = submit(&engine, spec).await;

    // Drain through the initial snapshot and one streaming tick.
    assert_status(recv(&mut rx).await, STATUS_WAITING);
    assert_status(recv(&mut rx).await, STATUS_STARTING);
    assert_status(recv(&mut rx).await, STATUS_STREAM_STARTING);
    recv(&mut rx).await.unwrap();
    gate.emit("tick");
    recv(&mut rx).await.unwrap();

    engine.queue.cancel_job(&job).await;
    // Parts emitted after cancellation must not reach the client.
    gate.emit("late");

    let mut saw_stopped = false;
    while let Some(frame) = recv(&mut rx).await {
        match frame {
            ServerMessage::Status { message } if message == STATUS_STOPPED => {
                saw_stopped = true;
            }
            ServerMessage::Data { results, .. } => {
                assert_ne!(results.get("1").and_then(|r| r.get("assistant_text")),
                    Some(&json!("late")),
                    "data emitted after cancellation");
            }
            other => panic!("unexpected frame {other:?}"),
        }
        if saw_stopped {
            break;
        }
    }
    assert!(saw_stopped);

    job.done.wait().await;
    assert_eq!(engine.queue.running_id().await, None);
}

#[tokio::test]
async fn client_disconnect_cancels_running_stream() {
    let (catalog, gate) = test_catalog();
    let engine = Engine::start(catalog);
    let spec = graph(json!({
        "nodes": [{"id": 1, "type": "Gate", "properties": {}}],
        "links": []
    }));
    let (job, mut rx) = submit(&engine, spec).await;

    // Let it start streaming, then vanish.
    assert_status(recv(&mut rx).await, STATUS_WAITING);
    assert_status(recv(&mut rx).await, STATUS_STARTING);
    assert_status(recv(&mut rx).await, STATUS_STREAM_STARTING);
    recv(&mut rx).await.unwrap();
    drop(rx);
    gate.emit("into the void");

    job.done.wait().await;
    assert_eq!(engine.queue.running_id().await, None);
}

#[tokio::test]
async fn fifo_under_cancellation() {
    let (catalog, gate) = test_catalog();
    let engine = Engine::start(catalog);

    // A: gated stream holds the worker. B, C: batch jobs.
    let stream_spec = graph(json!({
        "nodes": [{"id": 1, "type": "Gate", "properties": {}}],
        "links": []
    }));
    let batch_spec = graph(json!({
        "nodes": [{"id": 1, "type": "ConstA", "properties": {}}],
        "links": []
    }));

    let (job_a, mut rx_a) = submit(&engine, stream_spec).await;
    let (job_b, mut rx_b) = submit(&engine, batch_spec.clone()).await;
    let (job_c, mut rx_c) = submit(&engine, batch_spec).await;

    // A is running; B and C wait.
    assert_status(recv(&mut rx_a).await, STATUS_WAITING);
    assert_status(recv(&mut rx_a).await, STATUS_STARTING);
    assert_status(recv(&mut rx_a).await, STATUS_STREAM_STARTING);
    recv(&mut rx_a).await.unwrap();
    assert_eq!(engine.queue.position(&job_b).await, 0);
    assert_eq!(engine.queue.position(&job_c).await, 1);

    // Cancel B before A completes.
    engine.queue.cancel_job(&job_b).await;

    // Release A; it finishes normally.
    gate.finish();
    loop {
        match recv(&mut rx_a).await.expect("terminal for A") {
            ServerMessage::Status { message } if message == "Stream finished" => break,
            _ => continue,
        }
    }

    // B never starts: waiting status only, then silence.
    assert_status(recv(&mut rx_b).await, STATUS_WAITING);
    job_b.done.wait().await;
    assert!(rx_b.try_recv().is_err());

    // C runs to completion.
    assert_status(recv(&mut rx_c).await, STATUS_WAITING);
    assert_status(recv(&mut rx_c).await, STATUS_STARTING);
    assert_status(recv(&mut rx_c).await, STATUS_EXECUTING_BATCH);
    recv(&mut rx_c).await.unwrap();
    assert_status(recv(&mut rx_c).await, STATUS_BATCH_FINISHED);
    job_a.done.wait().await;
    job_c.done.wait().await;
}

#[tokio::test]
async fn fifo_two_batch_jobs_run_in_submission_order() {
    let (catalog, gate) = test_catalog();
    let engine = Engine::start(catalog);

    let stream_spec = graph(json!({
        "nodes": [{"id": 1, "type": "Gate", "properties": {}}],
        "links": []
    }));
    let batch_spec = graph(json!({
        "nodes": [{"id": 1, "type": "ConstA", "properties": {}}],
        "links": []
    }));

    let (_job_a, mut rx_a) = submit(&engine, stream_spec).await;
    let (_job_b, mut rx_b) = submit(&engine, batch_spec).await;

    // While A holds the worker, B has seen nothing past waiting.
    assert_status(recv(&mut rx_a).await, STATUS_WAITING);
    assert_status(recv(&mut rx_a).await, STATUS_STARTING);
    assert_status(recv(&mut rx_b).await, STATUS_WAITING);
    assert!(rx_b.try_recv().is_err());

    gate.finish();
    // B proceeds only after A's terminal frame.
    assert_status(recv(&mut rx_b).await, STATUS_STARTING);
}
