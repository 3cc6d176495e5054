//! Execution queue unit tests.

use fluxgraph_server::queue::{ClientHandle, ExecutionQueue};
use fluxgraph_core::GraphSpec;
use std::time::Duration;

fn empty_graph() -> GraphSpec {
    GraphSpec::default()
}

fn client() -> ClientHandle {
    ClientHandle::channel(8).0
}

#[tokio::test]
async fn enqueue_and_get_next() {
    let queue = ExecutionQueue::new();
    let job = queue.enqueue(client(), empty_graph()).await;
    assert_eq!(job.id, 0);

    let picked = queue.get_next().await;
    assert_eq!(picked.id, job.id);
    assert_eq!(queue.running_id().await, Some(job.id));
}

#[tokio::test]
async fn job_ids_are_monotonic() {
    let queue = ExecutionQueue::new();
    let a = queue.enqueue(client(), empty_graph()).await;
    let b = queue.enqueue(client(), empty_graph()).await;
    let c = queue.enqueue(client(), empty_graph()).await;
    assert_eq!((a.id, b.id, c.id), (0, 1, 2));
}

#[tokio::test]
async fn cancel_pending_job_removes_it_and_sets_done() {
    let queue = ExecutionQueue::new();
    let job = queue.enqueue(client(), empty_graph()).await;
    assert_eq!(queue.pending_len().await, 1);

    queue.cancel_job(&job).await;

    assert_eq!(queue.pending_len().await, 0);
    assert!(job.done.is_set());
    // Done latch resolves waiters immediately.
    job.done.wait().await;
}

#[tokio::test]
async fn cancel_running_job_raises_cancel_flag() {
    let queue = ExecutionQueue::new();
    let job = queue.enqueue(client(), empty_graph()).await;
    let picked = queue.get_next().await;
    assert_eq!(queue.running_id().await, Some(picked.id));

    queue.cancel_job(&picked).await;

    assert!(picked.cancel.is_cancelled());
    assert!(!picked.done.is_set());
    assert_eq!(queue.running_id().await, Some(job.id));
}

#[tokio::test]
async fn get_next_skips_cancelled_jobs() {
    let queue = ExecutionQueue::new();
    let first = queue.enqueue(client(), empty_graph()).await;
    let second = queue.enqueue(client(), empty_graph()).await;

    queue.cancel_job(&first).await;

    let picked = queue.get_next().await;
    assert_eq!(picked.id, second.id);
    assert!(first.done.is_set());
}

#[tokio::test]
async fn get_next_suspends_until_enqueue() {
    let queue = std::sync::Arc::new(ExecutionQueue::new());
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.get_next().await.id })
    };

    // Not ready yet.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    let job = queue.enqueue(client(), empty_graph()).await;
    assert_eq!(waiter.await.unwrap(), job.id);
}

#[tokio::test]
async fn position_reflects_running_and_pending_order() {
    let queue = ExecutionQueue::new();
    let a = queue.enqueue(client(), empty_graph()).await;
    let b = queue.enqueue(client(), empty_graph()).await;

    assert_eq!(queue.position(&a).await, 0);
    assert_eq!(queue.position(&b).await, 1);

    queue.get_next().await;
    assert_eq!(queue.position(&a).await, 0);
    // b moved to the head of pending.
    assert_eq!(queue.position(&b).await, 0);
}

#[tokio::test]
async fn job_lifecycle_complete_flow() {
    let queue = ExecutionQueue::new();
    let job = queue.enqueue(client(), empty_graph()).await;

    let picked = queue.get_next().await;
    assert_eq!(queue.running_id().await, Some(picked.id));
    assert_eq!(queue.pending_len().await, 0);

    queue.mark_done(&picked).await;
    assert_eq!(queue.running_id().await, None);
    assert!(job.done.is_set());
}

#[tokio::test]
async fn done_latch_sets_exactly_once() {
    let queue = ExecutionQueue::new();
    let job = queue.enqueue(client(), empty_graph()).await;
    assert!(job.done.set());
    assert!(!job.done.set());

    // mark_done after an external set does not unset or re-notify.
    queue.cancel_job(&job).await;
    assert!(job.done.is_set());
}

#[tokio::test]
async fn rapid_cancellation_leaves_queue_clean() {
    let queue = ExecutionQueue::new();
    let mut jobs = Vec::new();
    for _ in 0..10 {
        jobs.push(queue.enqueue(client(), empty_graph()).await);
    }
    for job in &jobs {
        queue.cancel_job(job).await;
    }

    assert_eq!(queue.pending_len().await, 0);
    for job in &jobs {
        assert!(job.done.is_set());
    }

    // Nothing left for the worker.
    let picked = tokio::time::timeout(Duration::from_millis(20), queue.get_next()).await;
    assert!(picked.is_err());
}

#[tokio::test]
async fn concurrent_enqueue_and_dequeue_account_for_all_jobs() {
    let queue = std::sync::Arc::new(ExecutionQueue::new());
    const JOBS: usize = 50;

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for _ in 0..JOBS {
                queue.enqueue(client(), empty_graph()).await;
                tokio::task::yield_now().await;
            }
        })
    };

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..JOBS {
                let job = queue.get_next().await;
                seen.push(job.id);
                queue.mark_done(&job).await;
            }
            seen
        })
    };

    producer.await.unwrap();
    let seen = consumer.await.unwrap();
    assert_eq!(seen.len(), JOBS);
    // FIFO order across non-cancelled jobs.
    let mut sorted = seen.clone();
    sorted.sort_unstable();
    assert_eq!(seen, sorted);
}
