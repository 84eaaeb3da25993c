//! Tests for priority ordering, capacity, failure isolation and shutdown.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use rstest::{fixture, rstest};
use tokio::sync::oneshot;
use tracing_test::traced_test;

use super::*;

fn queue(capacity: usize, threads: usize) -> PriorityDispatchQueue {
    PriorityDispatchQueue::new(ParallelQueueOptions::new(capacity, threads).expect("valid options"))
        .expect("queue starts")
}

#[fixture]
fn single_worker() -> PriorityDispatchQueue { queue(10, 1) }

/// Occupy the only worker until the returned sender fires.
fn block_worker(queue: &PriorityDispatchQueue) -> (oneshot::Sender<()>, WorkHandle) {
    let (release, gate) = oneshot::channel::<()>();
    let handle = queue
        .try_submit(
            move |_| async move {
                let _ = gate.await;
                Ok(())
            },
            i32::MAX,
        )
        .expect("gate accepted");
    (release, handle)
}

fn recording(
    log: &Arc<Mutex<Vec<(i32, usize)>>>,
    priority: i32,
    index: usize,
) -> impl FnOnce(tokio_util::sync::CancellationToken) -> futures::future::Ready<Result<(), WorkError>>
+ Send
+ 'static {
    let log = Arc::clone(log);
    move |_| {
        log.lock().expect("log lock").push((priority, index));
        futures::future::ready(Ok(()))
    }
}

#[rstest]
#[tokio::test]
async fn single_worker_runs_highest_priority_first(single_worker: PriorityDispatchQueue) {
    let (release, gate) = block_worker(&single_worker);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for (index, priority) in [3000, 1000, 2000, 3000].into_iter().enumerate() {
        handles.push(
            single_worker
                .try_submit(recording(&log, priority, index), priority)
                .expect("accepted"),
        );
    }
    release.send(()).expect("gate waiting");
    assert_eq!(gate.outcome().await, WorkOutcome::Completed);
    for handle in handles {
        assert_eq!(handle.outcome().await, WorkOutcome::Completed);
    }

    assert_eq!(
        *log.lock().expect("log lock"),
        vec![(3000, 0), (3000, 3), (2000, 2), (1000, 1)]
    );
}

#[rstest]
#[tokio::test]
async fn equal_priorities_run_in_submission_order(single_worker: PriorityDispatchQueue) {
    let (release, _gate) = block_worker(&single_worker);
    let log = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..5)
        .map(|index| {
            single_worker
                .try_submit(recording(&log, DEFAULT_EVENT_PRIORITY, index), DEFAULT_EVENT_PRIORITY)
                .expect("accepted")
        })
        .collect();
    release.send(()).expect("gate waiting");
    for handle in handles {
        handle.outcome().await;
    }
    let order: Vec<usize> = log.lock().expect("log lock").iter().map(|(_, i)| *i).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn submissions_beyond_capacity_are_rejected() {
    let queue = queue(3, 1);
    let (release, _gate) = block_worker(&queue);
    for _ in 0..2 {
        queue
            .try_submit(|_| async { Ok(()) }, DEFAULT_CHUNK_PRIORITY)
            .expect("within capacity");
    }
    for _ in 0..3 {
        let err = queue
            .try_submit(|_| async { Ok(()) }, DEFAULT_RPC_PRIORITY)
            .expect_err("queue is full");
        assert_eq!(err, DispatchError::QueueFull { capacity: 3 });
    }
    assert_eq!(queue.outstanding(), 3);
    drop(release);
}

#[tokio::test]
async fn blocking_submit_waits_for_a_free_slot() {
    let queue = Arc::new(queue(1, 1));
    let (release, gate) = block_worker(&queue);

    let waiter = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.submit(|_| async { Ok(()) }, 0).await }
    });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    release.send(()).expect("gate waiting");
    gate.outcome().await;
    let handle = waiter.await.expect("join").expect("slot freed");
    assert_eq!(handle.outcome().await, WorkOutcome::Completed);
}

async fn explode() -> Result<(), WorkError> { panic!("boom") }

#[rstest]
#[traced_test]
#[tokio::test]
async fn failures_and_panics_stay_with_their_item(single_worker: PriorityDispatchQueue) {
    let failed = single_worker
        .try_submit(|_| async { Err(WorkError::new("bad input")) }, 0)
        .expect("accepted");
    let panicked = single_worker
        .try_submit(|_| explode(), 0)
        .expect("accepted");
    let healthy = single_worker
        .try_submit(|_| async { Ok(()) }, 0)
        .expect("accepted");

    assert_eq!(
        failed.outcome().await,
        WorkOutcome::Failed(WorkError::new("bad input"))
    );
    assert_eq!(panicked.outcome().await, WorkOutcome::Panicked("boom".into()));
    assert_eq!(healthy.outcome().await, WorkOutcome::Completed);
    assert!(logs_contain("work item panicked"));
    assert!(logs_contain("panic=boom"));
}

#[rstest]
#[tokio::test]
async fn item_cancelled_before_start_is_skipped(single_worker: PriorityDispatchQueue) {
    let (release, _gate) = block_worker(&single_worker);
    let ran = Arc::new(AtomicBool::new(false));
    let handle = single_worker
        .try_submit(
            {
                let ran = Arc::clone(&ran);
                move |_| async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
            0,
        )
        .expect("accepted");
    handle.cancel();
    release.send(()).expect("gate waiting");

    assert_eq!(handle.outcome().await, WorkOutcome::Cancelled);
    assert!(!ran.load(Ordering::SeqCst));
}

#[rstest]
#[tokio::test]
async fn running_item_observes_cancellation(single_worker: PriorityDispatchQueue) {
    let (started_tx, started) = oneshot::channel();
    let handle = single_worker
        .try_submit(
            move |token| async move {
                let _ = started_tx.send(());
                token.cancelled().await;
                Err(WorkError::new("stopped"))
            },
            0,
        )
        .expect("accepted");
    started.await.expect("job started");
    handle.cancel();
    assert_eq!(handle.outcome().await, WorkOutcome::Cancelled);
}

#[rstest]
#[tokio::test]
async fn drain_runs_pending_items(single_worker: PriorityDispatchQueue) {
    let (release, gate) = block_worker(&single_worker);
    let handles: Vec<_> = (0..3)
        .map(|_| {
            single_worker
                .try_submit(|_| async { Ok(()) }, 0)
                .expect("accepted")
        })
        .collect();

    let queue = Arc::new(single_worker);
    let shutdown = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.shutdown(ShutdownMode::Drain).await }
    });
    tokio::task::yield_now().await;
    assert_eq!(
        queue
            .try_submit(|_| async { Ok(()) }, 0)
            .map(|_| ())
            .expect_err("intake stopped"),
        DispatchError::ShuttingDown
    );

    release.send(()).expect("gate waiting");
    shutdown.await.expect("shutdown completes");
    assert_eq!(gate.outcome().await, WorkOutcome::Completed);
    for handle in handles {
        assert_eq!(handle.outcome().await, WorkOutcome::Completed);
    }
    assert_eq!(queue.outstanding(), 0);
}

#[rstest]
#[tokio::test]
async fn abort_discards_pending_and_cancels_running(single_worker: PriorityDispatchQueue) {
    let (started_tx, started) = oneshot::channel();
    let running = single_worker
        .try_submit(
            move |token| async move {
                let _ = started_tx.send(());
                token.cancelled().await;
                Err(WorkError::new("aborted"))
            },
            i32::MAX,
        )
        .expect("accepted");
    started.await.expect("job started");
    let ran = Arc::new(AtomicBool::new(false));
    let pending: Vec<_> = (0..2)
        .map(|_| {
            let ran = Arc::clone(&ran);
            single_worker
                .try_submit(
                    move |_| async move {
                        ran.store(true, Ordering::SeqCst);
                        Ok(())
                    },
                    0,
                )
                .expect("accepted")
        })
        .collect();

    single_worker.shutdown(ShutdownMode::Abort).await;

    assert_eq!(running.outcome().await, WorkOutcome::Cancelled);
    for handle in pending {
        assert_eq!(handle.outcome().await, WorkOutcome::Cancelled);
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!single_worker.is_accepting());
}

#[rstest]
#[case(0, 1)]
#[case(1, 0)]
#[case(MAX_CAPACITY + 1, 1)]
#[case(usize::MAX, 1)]
fn out_of_range_capacity_or_threads_is_rejected(#[case] capacity: usize, #[case] threads: usize) {
    assert_eq!(
        ParallelQueueOptions::new(capacity, threads),
        Err(DispatchError::InvalidConfig { capacity, threads })
    );
}

#[tokio::test]
async fn oversized_capacity_is_rejected_before_spawning() {
    let options = ParallelQueueOptions {
        capacity: usize::MAX,
        threads: 1,
    };
    assert_eq!(
        PriorityDispatchQueue::new(options).map(|_| ()),
        Err(DispatchError::InvalidConfig {
            capacity: usize::MAX,
            threads: 1
        })
    );
    assert!(ParallelQueueOptions::new(MAX_CAPACITY, 1).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_run_items_in_parallel() {
    let queue = queue(8, 4);
    let barrier = Arc::new(tokio::sync::Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            queue
                .try_submit(
                    move |_| async move {
                        barrier.wait().await;
                        Ok(())
                    },
                    0,
                )
                .expect("accepted")
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.outcome().await, WorkOutcome::Completed);
    }
}
