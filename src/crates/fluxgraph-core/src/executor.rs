//! Graph executor
//!
//! Validates a [`GraphSpec`](crate::graph::GraphSpec) against a
//! [`NodeCatalog`](crate::catalog::NodeCatalog), then evaluates the nodes in
//! dependency order.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       GraphExecutor                        │
//! │                                                            │
//! │  GraphSpec ──▶ instantiate ──▶ link check ──▶ topo order   │
//! │                                                            │
//! │  execute():  node₁ ─▶ node₂ ─▶ … ─▶ nodeₙ   (batch)        │
//! │  stream():   static prepass, then per-source ticks         │
//! │                                                            │
//! │  progress: (completed / total × 100, message)              │
//! │  stop():   cancel flag + per-node stop                     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Construction fails fast on unknown node types, cyclic link structures,
//! and invalid links. Evaluation order is the topological order of the link
//! DAG with ties broken by ascending node id, so a given graph always
//! executes identically.
//!
//! The executor is `Streaming` when any instantiated node carries the
//! streaming capability; the worker consults [`GraphExecutor::is_streaming`]
//! to pick between [`GraphExecutor::execute`] and
//! [`GraphExecutor::stream`](crate::stream).

use crate::catalog::NodeCatalog;
use crate::error::{GraphError, GraphResult};
use crate::graph::{GraphSpec, Link};
use crate::node::{
    validate_inputs, CancelFlag, InputMap, NodeId, NodeInstance, OutputMap, ProgressFn,
};
use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Whole-graph results: per-node output maps keyed by node id.
pub type ExecutionResults = HashMap<NodeId, OutputMap>;

/// Executes one graph, in batch or streaming mode.
pub struct GraphExecutor {
    pub(crate) nodes: HashMap<NodeId, NodeInstance>,
    /// Topological order, ties broken by ascending node id.
    pub(crate) order: Vec<NodeId>,
    /// Links keyed by destination node.
    pub(crate) incoming: HashMap<NodeId, Vec<Link>>,
    /// Unique destination ids per source node.
    pub(crate) outgoing: HashMap<NodeId, Vec<NodeId>>,
    pub(crate) streaming_ids: Vec<NodeId>,
    pub(crate) cancel: CancelFlag,
    progress: Mutex<Option<ProgressFn>>,
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("nodes", &self.nodes)
            .field("order", &self.order)
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .field("streaming_ids", &self.streaming_ids)
            .finish_non_exhaustive()
    }
}

impl GraphExecutor {
    /// Build an executor: instantiate nodes, validate links, order the DAG.
    pub fn new(spec: &GraphSpec, catalog: &NodeCatalog) -> GraphResult<Self> {
        let mut nodes: HashMap<NodeId, NodeInstance> = HashMap::new();
        for desc in &spec.nodes {
            if nodes.contains_key(&desc.id) {
                return Err(GraphError::Node(format!("duplicate node id {}", desc.id)));
            }
            let node = catalog.instantiate(&desc.type_name, desc.id, &desc.properties)?;
            nodes.insert(desc.id, node);
        }

        let mut incoming: HashMap<NodeId, Vec<Link>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut edges: HashSet<(NodeId, NodeId)> = HashSet::new();
        for link in &spec.links {
            validate_link(link, &nodes)?;
            incoming.entry(link.to_node).or_default().push(link.clone());
            if edges.insert((link.from_node, link.to_node)) {
                outgoing.entry(link.from_node).or_default().push(link.to_node);
            }
        }

        let order = topological_order(&nodes, &edges)?;
        let streaming_ids: Vec<NodeId> = order
            .iter()
            .copied()
            .filter(|id| nodes[id].is_streaming())
            .collect();

        debug!(
            nodes = nodes.len(),
            links = spec.links.len(),
            streaming = streaming_ids.len(),
            "graph executor constructed"
        );

        Ok(Self {
            nodes,
            order,
            incoming,
            outgoing,
            streaming_ids,
            cancel: CancelFlag::new(),
            progress: Mutex::new(None),
        })
    }

    /// True when any node carries the streaming capability.
    pub fn is_streaming(&self) -> bool {
        !self.streaming_ids.is_empty()
    }

    /// Connect a progress sink; also wired into every node for intra-node
    /// reports.
    pub fn set_progress_callback(&self, progress: ProgressFn) {
        for node in self.nodes.values() {
            node.set_progress(progress.clone());
        }
        *self.progress.lock().unwrap() = Some(progress);
    }

    pub(crate) fn report_progress(&self, percent: f32, message: &str) {
        if let Some(progress) = self.progress.lock().unwrap().as_ref() {
            progress(percent, message);
        }
    }

    /// Request cancellation: set the shared flag and stop every node.
    ///
    /// Idempotent. After this returns no further results are emitted.
    pub async fn stop(&self) {
        self.cancel.cancel();
        for node in self.nodes.values() {
            node.stop().await;
        }
    }

    /// Batch evaluation: run every node once in topological order and
    /// return the whole-graph result map.
    pub async fn execute(&self) -> GraphResult<ExecutionResults> {
        let mut results = ExecutionResults::new();
        let total = self.order.len() as f32;

        for (index, &node_id) in self.order.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            self.report_progress(
                index as f32 / total * 100.0,
                &format!("Executing node {node_id}"),
            );

            let outputs = self.run_node(node_id, &results).await?;
            results.insert(node_id, outputs);

            self.report_progress(
                (index + 1) as f32 / total * 100.0,
                &format!("Finished node {node_id}"),
            );
        }

        Ok(results)
    }

    /// Assemble, validate, and run a single node against the current
    /// result snapshot.
    pub(crate) async fn run_node(
        &self,
        node_id: NodeId,
        results: &ExecutionResults,
    ) -> GraphResult<OutputMap> {
        let node = &self.nodes[&node_id];
        let inputs = self.assemble_inputs(node_id, results);
        validate_inputs(
            node_id,
            &node.input_specs(),
            &inputs,
            node.required_asset_class(),
        )?;

        match node {
            NodeInstance::Batch(batch) => batch
                .execute(inputs)
                .await
                .map_err(|e| GraphError::in_node(node_id, e)),
            // A streaming node reached through the batch path is drained to
            // completion and its merged parts become the node result.
            NodeInstance::Streaming(streaming) => {
                let mut stream = streaming
                    .start(inputs)
                    .await
                    .map_err(|e| GraphError::in_node(node_id, e))?;
                let mut merged = OutputMap::new();
                while let Some(part) = stream.next().await {
                    if self.cancel.is_cancelled() {
                        return Err(GraphError::Cancelled);
                    }
                    let part = part.map_err(|e| GraphError::in_node(node_id, e))?;
                    merged.extend(part.outputs);
                    if part.done {
                        break;
                    }
                }
                Ok(merged)
            }
        }
    }

    /// Bind incoming link values to input names for one node.
    ///
    /// Multi-input slots collect every incoming value into an array ordered
    /// by `(source node id, source slot)`; optional inputs whose source has
    /// produced nothing are omitted.
    pub(crate) fn assemble_inputs(&self, node_id: NodeId, results: &ExecutionResults) -> InputMap {
        let mut inputs = InputMap::new();
        let specs = self.nodes[&node_id].input_specs();
        let Some(links) = self.incoming.get(&node_id) else {
            return inputs;
        };

        for (slot, spec) in specs.iter().enumerate() {
            let mut sources: Vec<&Link> = links.iter().filter(|l| l.to_slot == slot).collect();
            if sources.is_empty() {
                continue;
            }
            sources.sort_by_key(|l| (l.from_node, l.from_slot));

            if spec.multi {
                let values: Vec<Value> = sources
                    .iter()
                    .filter_map(|link| self.link_value(link, results))
                    .collect();
                inputs.insert(spec.name.clone(), Value::Array(values));
            } else if let Some(value) = sources
                .iter()
                .find_map(|link| self.link_value(link, results))
            {
                inputs.insert(spec.name.clone(), value);
            }
        }

        inputs
    }

    /// Most recent value carried by one link, if its source has produced it.
    fn link_value(&self, link: &Link, results: &ExecutionResults) -> Option<Value> {
        let source = self.nodes.get(&link.from_node)?;
        let specs = source.output_specs();
        let output_name = &specs.get(link.from_slot)?.name;
        results.get(&link.from_node)?.get(output_name).cloned()
    }
}

fn validate_link(link: &Link, nodes: &HashMap<NodeId, NodeInstance>) -> GraphResult<()> {
    let invalid = |reason: String| GraphError::LinkInvalid {
        link_id: link.id,
        reason,
    };

    let source = nodes
        .get(&link.from_node)
        .ok_or_else(|| invalid(format!("source node {} does not exist", link.from_node)))?;
    let dest = nodes
        .get(&link.to_node)
        .ok_or_else(|| invalid(format!("destination node {} does not exist", link.to_node)))?;

    let outputs = source.output_specs();
    let out_spec = outputs.get(link.from_slot).ok_or_else(|| {
        invalid(format!(
            "output slot {} out of range for node {}",
            link.from_slot, link.from_node
        ))
    })?;

    let inputs = dest.input_specs();
    let in_spec = inputs.get(link.to_slot).ok_or_else(|| {
        invalid(format!(
            "input slot {} out of range for node {}",
            link.to_slot, link.to_node
        ))
    })?;

    if !in_spec.ty.assignable_from(out_spec.ty) {
        return Err(invalid(format!(
            "type {} is not assignable to {} input '{}'",
            out_spec.ty, in_spec.ty, in_spec.name
        )));
    }

    Ok(())
}

/// Kahn's algorithm with a `BTreeSet` ready set: deterministic topological
/// order with ascending-id tie-break. Leftover nodes mean a cycle.
fn topological_order(
    nodes: &HashMap<NodeId, NodeInstance>,
    edges: &HashSet<(NodeId, NodeId)>,
) -> GraphResult<Vec<NodeId>> {
    let mut indegree: HashMap<NodeId, usize> = nodes.keys().map(|&id| (id, 0)).collect();
    let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for &(from, to) in edges {
        *indegree.get_mut(&to).expect("validated link endpoint") += 1;
        successors.entry(from).or_default().push(to);
    }

    let mut ready: BTreeSet<NodeId> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(&id) = ready.iter().next() {
        ready.remove(&id);
        order.push(id);
        if let Some(nexts) = successors.get(&id) {
            for &next in nexts {
                let deg = indegree.get_mut(&next).expect("validated link endpoint");
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(next);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        return Err(GraphError::CycleDetected);
    }
    Ok(order)
}
