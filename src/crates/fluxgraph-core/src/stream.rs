//! Streaming graph evaluation
//!
//! When a graph contains streaming nodes the executor yields a lazy
//! sequence of whole-graph snapshots ("ticks") instead of a single result:
//!
//! 1. Batch nodes with no streaming ancestor run once (the static prepass)
//!    and an initial snapshot tick is emitted.
//! 2. Each streaming node is started; a forwarding task per node pushes its
//!    parts into one shared multiplexer channel.
//! 3. Every received part is merged into the snapshot, dirty downstream
//!    batch nodes are re-evaluated in topological order (at most once per
//!    tick, against the latest upstream values), and the updated snapshot
//!    is emitted.
//! 4. The sequence ends when every streaming node has signalled `done`, or
//!    silently when the executor is stopped.
//!
//! A producer/consumer channel per streaming node keeps the multiplexer
//! free of node-specific control flow; commit order on the shared channel
//! decides tick order.

use crate::error::{GraphError, GraphResult};
use crate::executor::{ExecutionResults, GraphExecutor};
use crate::node::{NodeId, NodeInstance, StreamPart};
use futures::StreamExt;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// One emission of the streaming executor: the current whole-graph results.
pub type SnapshotTick = GraphResult<ExecutionResults>;

impl GraphExecutor {
    /// Streaming evaluation. Returns a stream of snapshot ticks; the first
    /// tick carries the static prepass results.
    ///
    /// The returned stream ends without a trailing item on cancellation —
    /// `Stopped` reporting is the worker's concern. Callers keep their own
    /// `Arc` for `stop()`: `executor.clone().stream()`.
    pub fn stream(self: Arc<Self>) -> ReceiverStream<SnapshotTick> {
        let (tick_tx, tick_rx) = mpsc::channel::<SnapshotTick>(32);

        tokio::spawn(async move {
            if let Err(err) = self.run_streaming(&tick_tx).await {
                if err.is_cancelled() || self.cancel.is_cancelled() {
                    debug!("streaming run ended by cancellation");
                } else {
                    let _ = tick_tx.send(Err(err)).await;
                }
            }
        });

        ReceiverStream::new(tick_rx)
    }

    async fn run_streaming(&self, ticks: &mpsc::Sender<SnapshotTick>) -> GraphResult<()> {
        let mut snapshot = ExecutionResults::new();
        let stream_downstream = self.streaming_descendants();

        // Static prepass: batch nodes that do not depend on any stream.
        for &node_id in &self.order {
            if self.cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            if self.nodes[&node_id].is_streaming() || stream_downstream.contains(&node_id) {
                continue;
            }
            let outputs = self.run_node(node_id, &snapshot).await?;
            snapshot.insert(node_id, outputs);
        }

        if ticks.send(Ok(snapshot.clone())).await.is_err() {
            return Ok(());
        }

        // Start every streaming node and forward its parts into one channel.
        let (part_tx, mut part_rx) = mpsc::channel::<(NodeId, GraphResult<StreamPart>)>(32);
        let mut remaining: HashSet<NodeId> = HashSet::new();

        for &node_id in &self.streaming_ids {
            let NodeInstance::Streaming(node) = &self.nodes[&node_id] else {
                continue;
            };
            let inputs = self.assemble_inputs(node_id, &snapshot);
            crate::node::validate_inputs(
                node_id,
                &node.input_specs(),
                &inputs,
                node.required_asset_class(),
            )?;
            let mut parts = node
                .start(inputs)
                .await
                .map_err(|e| GraphError::in_node(node_id, e))?;

            remaining.insert(node_id);
            let tx = part_tx.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                while let Some(part) = parts.next().await {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let done = matches!(&part, Ok(p) if p.done);
                    if tx.send((node_id, part)).await.is_err() {
                        break;
                    }
                    if done {
                        break;
                    }
                }
            });
        }
        drop(part_tx);

        while !remaining.is_empty() {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => return Err(GraphError::Cancelled),
                item = part_rx.recv() => item,
            };
            let Some((node_id, part)) = item else {
                if self.cancel.is_cancelled() {
                    return Err(GraphError::Cancelled);
                }
                // All producers ended without a final `done` part.
                warn!("streaming producers closed before signalling done");
                break;
            };
            let part = part.map_err(|e| GraphError::in_node(node_id, e))?;

            snapshot.entry(node_id).or_default().extend(part.outputs);
            if part.done {
                remaining.remove(&node_id);
            }

            self.refresh_downstream(node_id, &mut snapshot).await?;

            if self.cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            if ticks.send(Ok(snapshot.clone())).await.is_err() {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Re-evaluate batch nodes reachable from `source`, in topological
    /// order, each at most once, against the latest snapshot values.
    ///
    /// Nodes whose required inputs are not yet available are skipped; they
    /// will be retried on a later tick.
    async fn refresh_downstream(
        &self,
        source: NodeId,
        snapshot: &mut ExecutionResults,
    ) -> GraphResult<()> {
        let reachable = self.reachable_from(source);
        for &node_id in &self.order {
            if !reachable.contains(&node_id) || self.nodes[&node_id].is_streaming() {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            match self.run_node(node_id, snapshot).await {
                Ok(outputs) => {
                    snapshot.insert(node_id, outputs);
                }
                Err(GraphError::InputValidation { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Every node reachable from any streaming node.
    fn streaming_descendants(&self) -> HashSet<NodeId> {
        let mut all = HashSet::new();
        for &id in &self.streaming_ids {
            all.extend(self.reachable_from(id));
        }
        all
    }

    fn reachable_from(&self, start: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = self
            .outgoing
            .get(&start)
            .map(|next| next.iter().copied().collect())
            .unwrap_or_default();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id) {
                if let Some(next) = self.outgoing.get(&id) {
                    queue.extend(next.iter().copied());
                }
            }
        }
        seen
    }
}

