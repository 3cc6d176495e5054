//! Execution queue.
//!
//! FIFO admission of graph jobs with at most one running at a time.
//! Cancellation is honoured at every stage: a queued job is silently
//! dropped before pickup, a running job has its cancel flag raised and the
//! worker stops its executor. Every job's done latch is set exactly once,
//! whether the job completed, errored, or was cancelled.

use crate::protocol::ServerMessage;
use fluxgraph_core::{CancelFlag, GraphSpec};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

/// Sender half of one client's outbound frame channel.
///
/// The worker writes frames here; the transport shell pumps them onto the
/// socket. Liveness doubles as the disconnect signal: when the pump drops
/// the receiver, `is_closed`/`closed` fire and the cancel monitor stops the
/// job.
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<ServerMessage>,
    connection_id: Uuid,
}

impl ClientHandle {
    /// Create a handle plus the receiver the transport pump reads from.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                connection_id: Uuid::new_v4(),
            },
            rx,
        )
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Send one frame; returns false when the client is gone.
    pub async fn send(&self, message: ServerMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the client disconnects.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// Set-exactly-once completion latch.
#[derive(Clone, Default)]
pub struct DoneFlag {
    inner: Arc<DoneInner>,
}

#[derive(Default)]
struct DoneInner {
    flag: AtomicBool,
    notify: Notify,
}

impl DoneFlag {
    /// Set the latch. Returns true only for the first call.
    pub fn set(&self) -> bool {
        let first = !self.inner.flag.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

/// One admitted graph execution.
#[derive(Clone)]
pub struct ExecutionJob {
    pub id: u64,
    pub client: ClientHandle,
    pub graph: Arc<GraphSpec>,
    pub cancel: CancelFlag,
    pub done: DoneFlag,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ExecutionJob>,
    running: Option<u64>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

/// FIFO queue of graph jobs with a single running slot.
#[derive(Default)]
pub struct ExecutionQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job; returns it with its zero-based queue position already
    /// reflected by [`ExecutionQueue::position`].
    pub async fn enqueue(&self, client: ClientHandle, graph: GraphSpec) -> ExecutionJob {
        let mut state = self.state.lock().await;
        let job = ExecutionJob {
            id: state.next_id,
            client,
            graph: Arc::new(graph),
            cancel: CancelFlag::new(),
            done: DoneFlag::default(),
        };
        state.next_id += 1;
        state.pending.push_back(job.clone());
        debug!(job = job.id, pending = state.pending.len(), "job enqueued");
        drop(state);
        self.notify.notify_one();
        job
    }

    /// Wait for the next non-cancelled job and move it to running.
    ///
    /// Cancelled jobs at the head are silently dropped: their done latch is
    /// set and the scan continues.
    pub async fn get_next(&self) -> ExecutionJob {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                while let Some(job) = state.pending.pop_front() {
                    if state.cancelled.contains(&job.id) {
                        debug!(job = job.id, "skipping cancelled job");
                        job.done.set();
                        continue;
                    }
                    state.running = Some(job.id);
                    return job;
                }
            }
            notified.await;
        }
    }

    /// Mark a job cancelled. Pending jobs are removed immediately; the
    /// running job has its cancel flag raised for the worker to act on.
    pub async fn cancel_job(&self, job: &ExecutionJob) {
        let mut state = self.state.lock().await;
        state.cancelled.insert(job.id);

        if let Some(index) = state.pending.iter().position(|j| j.id == job.id) {
            state.pending.remove(index);
            job.done.set();
            debug!(job = job.id, "cancelled while pending");
        } else if state.running == Some(job.id) {
            job.cancel.cancel();
            debug!(job = job.id, "cancel requested while running");
        } else {
            // Already finished or skipped; cancellation is a no-op.
        }
    }

    /// Clear the running slot and set the job's done latch.
    pub async fn mark_done(&self, job: &ExecutionJob) {
        let mut state = self.state.lock().await;
        if state.running == Some(job.id) {
            state.running = None;
        }
        state.cancelled.remove(&job.id);
        job.done.set();
        drop(state);
        self.notify.notify_one();
    }

    /// Zero-based position: 0 when running or next up.
    pub async fn position(&self, job: &ExecutionJob) -> usize {
        let state = self.state.lock().await;
        if state.running == Some(job.id) {
            return 0;
        }
        state
            .pending
            .iter()
            .position(|j| j.id == job.id)
            .unwrap_or(0)
    }

    /// Id of the currently running job, if any.
    pub async fn running_id(&self) -> Option<u64> {
        self.state.lock().await.running
    }

    /// Number of jobs awaiting pickup.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
