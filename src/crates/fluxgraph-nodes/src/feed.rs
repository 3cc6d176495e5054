//! Periodic data feed node.
//!
//! Streaming source that emits a numbered tick every `period_ms`, for
//! `count` ticks (0 = unbounded). Downstream indicator and chat nodes
//! re-evaluate on every tick, which makes this the standard driver for
//! recurring analytics graphs when no live market feed is wired in.

use async_trait::async_trait;
use fluxgraph_core::{
    params_from, CancelFlag, GraphResult, InputMap, InputSpec, NodeCore, NodeId, NodeInstance,
    NodeStream, NodeTemplate, OutputMap, OutputSpec, ParamMeta, Params, PortType, StreamPart,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub struct IntervalFeedNode {
    id: NodeId,
    period: Duration,
    count: u64,
    cancel: CancelFlag,
}

impl IntervalFeedNode {
    pub fn template() -> NodeTemplate {
        NodeTemplate::new(
            Vec::new(),
            Self::outputs(),
            |id, params: Params| {
                let period_ms = params
                    .get("period_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(1000)
                    .max(1);
                let count = params.get("count").and_then(Value::as_u64).unwrap_or(0);
                Ok(NodeInstance::Streaming(Box::new(IntervalFeedNode {
                    id,
                    period: Duration::from_millis(period_ms),
                    count,
                    cancel: CancelFlag::new(),
                })))
            },
        )
        .with_default_params(params_from(&[
            ("period_ms", json!(1000)),
            ("count", json!(0)),
        ]))
        .with_params_meta(vec![
            ParamMeta::new("period_ms", "number", json!(1000)),
            ParamMeta::new("count", "number", json!(0)),
        ])
    }

    fn outputs() -> Vec<OutputSpec> {
        vec![
            OutputSpec::new("tick", PortType::Number),
            OutputSpec::new("elapsed_ms", PortType::Number),
        ]
    }
}

#[async_trait]
impl NodeCore for IntervalFeedNode {
    fn id(&self) -> NodeId {
        self.id
    }
    fn input_specs(&self) -> Vec<InputSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<OutputSpec> {
        Self::outputs()
    }
    async fn stop(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl fluxgraph_core::StreamingNode for IntervalFeedNode {
    async fn start(&self, _inputs: InputMap) -> GraphResult<NodeStream> {
        let period = self.period;
        let count = self.count;
        let cancel = self.cancel.clone();

        let stream = async_stream::stream! {
            let started = Instant::now();
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }

                let mut outputs = OutputMap::new();
                outputs.insert("tick".into(), json!(tick));
                outputs.insert(
                    "elapsed_ms".into(),
                    json!(started.elapsed().as_millis() as u64),
                );

                tick += 1;
                let last = count > 0 && tick >= count;
                if last {
                    yield Ok(StreamPart::finished(outputs));
                    return;
                }
                yield Ok(StreamPart::partial(outputs));
            }
        };
        Ok(Box::pin(stream))
    }
}
