//! Node abstraction
//!
//! A node is a unit of computation with typed inputs, typed outputs, and
//! parameters. Nodes come in exactly one of two capability variants:
//!
//! - **Batch** ([`BatchNode`]): one `execute` call producing a result map.
//! - **Streaming** ([`StreamingNode`]): a `start` call producing a lazy
//!   sequence of partial result maps, the last of which is marked `done`.
//!
//! Both variants share the [`NodeCore`] contract (identity, slot schemas,
//! progress reporting, cooperative stop) and are carried through the engine
//! as a tagged [`NodeInstance`].
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │         NodeInstance         │
//!            │                              │
//!            │  Batch(Box<dyn BatchNode>)   │──── execute(inputs) ──▶ OutputMap
//!            │  Streaming(Box<dyn           │
//!            │      StreamingNode>)         │──── start(inputs) ────▶ StreamPart…
//!            └──────────────────────────────┘
//! ```
//!
//! Values bound to inputs and produced on outputs are `serde_json::Value`s;
//! the declared [`PortType`]s describe their semantics, not their encoding.

use crate::error::{GraphError, GraphResult};
use crate::types::{AssetClass, AssetSymbol, PortType};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Node identifier, unique within one graph. LiteGraph exports use small
/// integers; the wire protocol stringifies them.
pub type NodeId = u64;

/// Parameter values: `default_params` overlaid with descriptor properties.
pub type Params = serde_json::Map<String, Value>;

/// Inputs bound for one node invocation, keyed by input name. Multi-input
/// slots are bound to an array of the aggregated link values.
pub type InputMap = HashMap<String, Value>;

/// Outputs produced by one node invocation, keyed by output name.
pub type OutputMap = HashMap<String, Value>;

/// Progress callback: `(percent 0..=100, human message)`.
pub type ProgressFn = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// Declared input slot.
#[derive(Debug, Clone, Serialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PortType,
    /// Optional inputs may be left unlinked, or linked to a source that
    /// produced no value.
    pub optional: bool,
    /// Multi-inputs aggregate any number of same-typed links into an
    /// ordered sequence.
    pub multi: bool,
}

impl InputSpec {
    pub fn required(name: impl Into<String>, ty: PortType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            multi: false,
        }
    }

    pub fn optional(name: impl Into<String>, ty: PortType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: true,
            multi: false,
        }
    }

    pub fn multi(name: impl Into<String>, ty: PortType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: true,
            multi: true,
        }
    }
}

/// Declared output slot.
#[derive(Debug, Clone, Serialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PortType,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, ty: PortType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// UI metadata for one parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParamMeta {
    pub name: String,
    /// Widget kind: `text`, `number`, `combo`, `multiselect`.
    pub kind: String,
    pub default: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl ParamMeta {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            default,
            options: Vec::new(),
            min: None,
            max: None,
            step: None,
        }
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.step = Some(step);
        self
    }
}

/// Cooperative cancellation token shared between the executor, its nodes,
/// and the queue's cancel monitor.
///
/// `cancel` is idempotent; `cancelled().await` resolves immediately once the
/// flag is set, so suspension points can race ordinary work against it.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set. Returns immediately if already set.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelFlag")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One emission of a streaming node: a partial output map, with `done`
/// marking the final emission.
#[derive(Debug, Clone, Default)]
pub struct StreamPart {
    pub outputs: OutputMap,
    pub done: bool,
}

impl StreamPart {
    pub fn partial(outputs: OutputMap) -> Self {
        Self {
            outputs,
            done: false,
        }
    }

    pub fn finished(outputs: OutputMap) -> Self {
        Self {
            outputs,
            done: true,
        }
    }
}

/// Lazy sequence of parts produced by a streaming node.
pub type NodeStream = BoxStream<'static, GraphResult<StreamPart>>;

/// Contract shared by both capability variants.
#[async_trait]
pub trait NodeCore: Send + Sync {
    fn id(&self) -> NodeId;

    fn input_specs(&self) -> Vec<InputSpec>;

    fn output_specs(&self) -> Vec<OutputSpec>;

    /// Asset class every `AssetSymbol` input must carry, if constrained.
    fn required_asset_class(&self) -> Option<AssetClass> {
        None
    }

    /// Connects the executor's progress sink. Default: progress discarded.
    fn set_progress(&self, _progress: ProgressFn) {}

    /// Cooperative stop. Must be idempotent; must never fail.
    async fn stop(&self) {}
}

/// Batch capability: one-shot evaluation.
#[async_trait]
pub trait BatchNode: NodeCore {
    async fn execute(&self, inputs: InputMap) -> GraphResult<OutputMap>;
}

/// Streaming capability: lazy evaluation yielding partial results.
#[async_trait]
pub trait StreamingNode: NodeCore {
    async fn start(&self, inputs: InputMap) -> GraphResult<NodeStream>;
}

/// A constructed node, tagged by capability variant.
pub enum NodeInstance {
    Batch(Box<dyn BatchNode>),
    Streaming(Box<dyn StreamingNode>),
}

impl std::fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeInstance::Batch(n) => f.debug_tuple("Batch").field(&n.id()).finish(),
            NodeInstance::Streaming(n) => f.debug_tuple("Streaming").field(&n.id()).finish(),
        }
    }
}

impl NodeInstance {
    pub fn id(&self) -> NodeId {
        match self {
            NodeInstance::Batch(n) => n.id(),
            NodeInstance::Streaming(n) => n.id(),
        }
    }

    pub fn input_specs(&self) -> Vec<InputSpec> {
        match self {
            NodeInstance::Batch(n) => n.input_specs(),
            NodeInstance::Streaming(n) => n.input_specs(),
        }
    }

    pub fn output_specs(&self) -> Vec<OutputSpec> {
        match self {
            NodeInstance::Batch(n) => n.output_specs(),
            NodeInstance::Streaming(n) => n.output_specs(),
        }
    }

    pub fn required_asset_class(&self) -> Option<AssetClass> {
        match self {
            NodeInstance::Batch(n) => n.required_asset_class(),
            NodeInstance::Streaming(n) => n.required_asset_class(),
        }
    }

    pub fn set_progress(&self, progress: ProgressFn) {
        match self {
            NodeInstance::Batch(n) => n.set_progress(progress),
            NodeInstance::Streaming(n) => n.set_progress(progress),
        }
    }

    pub async fn stop(&self) {
        match self {
            NodeInstance::Batch(n) => n.stop().await,
            NodeInstance::Streaming(n) => n.stop().await,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, NodeInstance::Streaming(_))
    }
}

/// Validate assembled inputs against a node's declared schema.
///
/// Checks required presence, dynamic type compatibility, and the asset
/// class of `AssetSymbol` inputs when the node declares a constraint.
pub fn validate_inputs(
    node_id: NodeId,
    specs: &[InputSpec],
    inputs: &InputMap,
    required_asset_class: Option<AssetClass>,
) -> GraphResult<()> {
    let mut problems: Vec<String> = Vec::new();

    for spec in specs {
        let value = match inputs.get(&spec.name) {
            Some(v) => v,
            None => {
                if !spec.optional {
                    problems.push(format!("missing required input '{}'", spec.name));
                }
                continue;
            }
        };

        let type_ok = if spec.multi {
            value
                .as_array()
                .map_or(false, |items| items.iter().all(|v| spec.ty.matches(v)))
        } else {
            spec.ty.matches(value)
        };
        if !type_ok {
            problems.push(format!(
                "input '{}' is not a valid {}",
                spec.name,
                spec.ty.name()
            ));
            continue;
        }

        if spec.ty == PortType::AssetSymbol {
            if let (Some(required), Some(symbol)) =
                (required_asset_class, AssetSymbol::from_value(value))
            {
                if symbol.asset_class != required {
                    problems.push(format!(
                        "input '{}' has asset class {}, expected {}",
                        spec.name, symbol.asset_class, required
                    ));
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(GraphError::InputValidation {
            node_id,
            details: problems.join("; "),
        })
    }
}
