//! Worker loop.
//!
//! A single task pulls jobs from the queue in FIFO order, constructs an
//! executor per job, and drives it to a terminal frame:
//!
//! ```text
//! get_next ─▶ "Starting execution"
//!              │
//!              ├─ batch:  "Executing batch" ─▶ data ─▶ "Batch finished"
//!              ├─ stream: "Stream starting" ─▶ data… ─▶ "Stream finished"
//!              │                                        (or "Stopped")
//!              └─ error:  terminal error frame
//! ```
//!
//! A cancel monitor per job watches both the job's cancel flag and client
//! liveness; either signal stops the executor, which drains without further
//! emissions. `mark_done` runs on every path, so the queue's running slot
//! and the job's done latch are always released.

use crate::protocol::{
    ServerMessage, STATUS_BATCH_FINISHED, STATUS_EXECUTING_BATCH, STATUS_STARTING,
    STATUS_STOPPED, STATUS_STREAM_FINISHED, STATUS_STREAM_STARTING,
};
use crate::queue::{ExecutionJob, ExecutionQueue};
use fluxgraph_core::{GraphExecutor, NodeCatalog};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tooling::logging::timed;
use tooling::serialization::serialize_results;
use tracing::{info, warn};

/// Spawn the single worker task.
pub fn spawn_worker(queue: Arc<ExecutionQueue>, catalog: Arc<NodeCatalog>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let job = queue.get_next().await;
            info!(job = job.id, "job picked up");
            run_job(&queue, &catalog, &job).await;
            queue.mark_done(&job).await;
        }
    })
}

async fn run_job(queue: &ExecutionQueue, catalog: &NodeCatalog, job: &ExecutionJob) {
    job.client
        .send(ServerMessage::status(STATUS_STARTING))
        .await;

    let executor = match GraphExecutor::new(&job.graph, catalog) {
        Ok(executor) => Arc::new(executor),
        Err(err) => {
            warn!(job = job.id, "graph construction failed: {err}");
            job.client.send(ServerMessage::error(err.to_string())).await;
            return;
        }
    };

    // Stop the executor when the job is cancelled or the client goes away.
    let monitor = {
        let executor = executor.clone();
        let cancel = job.cancel.clone();
        let client = job.client.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(job = job_id, "cancel flag raised; stopping executor");
                }
                _ = client.closed() => {
                    info!(job = job_id, "client disconnected; stopping executor");
                    cancel.cancel();
                }
            }
            executor.stop().await;
        })
    };

    if executor.is_streaming() {
        run_streaming(job, &executor).await;
    } else {
        run_batch(job, &executor).await;
    }

    monitor.abort();
}

async fn run_batch(job: &ExecutionJob, executor: &Arc<GraphExecutor>) {
    job.client
        .send(ServerMessage::status(STATUS_EXECUTING_BATCH))
        .await;

    match timed("batch graph execution", executor.execute()).await {
        Ok(results) => {
            if job.cancel.is_cancelled() {
                job.client.send(ServerMessage::status(STATUS_STOPPED)).await;
                return;
            }
            let serialized = serialize_results(&results);
            job.client.send(ServerMessage::data(false, serialized)).await;
            job.client
                .send(ServerMessage::status(STATUS_BATCH_FINISHED))
                .await;
        }
        Err(err) if err.is_cancelled() => {
            job.client.send(ServerMessage::status(STATUS_STOPPED)).await;
        }
        Err(err) => {
            warn!(job = job.id, "batch execution failed: {err}");
            job.client.send(ServerMessage::error(err.to_string())).await;
        }
    }
}

async fn run_streaming(job: &ExecutionJob, executor: &Arc<GraphExecutor>) {
    job.client
        .send(ServerMessage::status(STATUS_STREAM_STARTING))
        .await;

    let mut ticks = executor.clone().stream();
    let mut first = true;

    while let Some(tick) = ticks.next().await {
        if job.cancel.is_cancelled() {
            break;
        }
        match tick {
            Ok(results) => {
                let serialized = serialize_results(&results);
                job.client
                    .send(ServerMessage::data(!first, serialized))
                    .await;
                first = false;
            }
            Err(err) => {
                warn!(job = job.id, "stream execution failed: {err}");
                job.client.send(ServerMessage::error(err.to_string())).await;
                return;
            }
        }
    }

    let terminal = if job.cancel.is_cancelled() {
        STATUS_STOPPED
    } else {
        STATUS_STREAM_FINISHED
    };
    job.client.send(ServerMessage::status(terminal)).await;
}

/// Convenience used by binaries and tests: queue + worker over one catalog.
pub struct Engine {
    pub queue: Arc<ExecutionQueue>,
    pub catalog: Arc<NodeCatalog>,
    worker: JoinHandle<()>,
}

impl Engine {
    pub fn start(catalog: NodeCatalog) -> Self {
        let queue = Arc::new(ExecutionQueue::new());
        let catalog = Arc::new(catalog);
        let worker = spawn_worker(queue.clone(), catalog.clone());
        Self {
            queue,
            catalog,
            worker,
        }
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
