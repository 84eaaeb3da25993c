//! Bounded priority queue drained by a fixed pool of worker tasks.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError, oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use super::{DispatchError, ParallelQueueOptions, WorkError, WorkHandle, WorkOutcome};
use crate::{metrics, panic::format_panic};

type Job = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), WorkError>> + Send>;

/// How [`PriorityDispatchQueue::shutdown`] treats items still pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Run every pending item before the workers exit.
    Drain,
    /// Discard pending items as cancelled and cancel running ones.
    Abort,
}

struct QueuedItem {
    priority: i32,
    seq: u64,
    job: Job,
    token: CancellationToken,
    reply: oneshot::Sender<WorkOutcome>,
    permit: OwnedSemaphorePermit,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for QueuedItem {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    items: BinaryHeap<QueuedItem>,
    next_seq: u64,
    accepting: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    permits: Arc<Semaphore>,
    capacity: usize,
    abort: CancellationToken,
    stop: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<QueuedItem> {
        let mut state = self.lock();
        let item = state.items.pop();
        if item.is_some() && !state.items.is_empty() {
            self.notify.notify_one();
        }
        item
    }
}

/// Work queue executing jobs in priority order on a fixed set of workers.
///
/// Capacity bounds pending and running items together: a slot is held from
/// submission until the job finishes. Higher priorities run first and items
/// of equal priority run in submission order.
///
/// Workers are tokio tasks, so the queue must be created inside a runtime.
pub struct PriorityDispatchQueue {
    shared: Arc<Shared>,
    tracker: TaskTracker,
    options: ParallelQueueOptions,
}

impl PriorityDispatchQueue {
    /// Create the queue and spawn its workers.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] when `options` are invalid.
    pub fn new(options: ParallelQueueOptions) -> Result<Self, DispatchError> {
        options.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                accepting: true,
                ..QueueState::default()
            }),
            notify: Notify::new(),
            permits: Arc::new(Semaphore::new(options.capacity)),
            capacity: options.capacity,
            abort: CancellationToken::new(),
            stop: CancellationToken::new(),
        });
        let tracker = TaskTracker::new();
        for worker in 0..options.threads {
            tracker.spawn(worker_loop(Arc::clone(&shared), worker));
        }
        debug!(capacity = options.capacity, threads = options.threads, "dispatch queue started");
        Ok(Self {
            shared,
            tracker,
            options,
        })
    }

    /// Options the queue was built with.
    #[must_use]
    pub const fn options(&self) -> ParallelQueueOptions { self.options }

    /// Items submitted and not yet finished.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.capacity - self.shared.permits.available_permits()
    }

    /// Items waiting for a worker.
    #[must_use]
    pub fn pending(&self) -> usize { self.shared.lock().items.len() }

    /// Whether new work is still accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool { self.shared.lock().accepting }

    /// Submit a job without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueFull`] when every slot is taken and
    /// [`DispatchError::ShuttingDown`] once shutdown has begun.
    pub fn try_submit<F, Fut>(&self, job: F, priority: i32) -> Result<WorkHandle, DispatchError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let permit = match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                metrics::inc_work_rejected();
                debug!(priority, capacity = self.shared.capacity, "dispatch queue full");
                return Err(DispatchError::QueueFull {
                    capacity: self.shared.capacity,
                });
            }
            Err(TryAcquireError::Closed) => return Err(DispatchError::ShuttingDown),
        };
        self.enqueue(Box::new(move |token| job(token).boxed()), priority, permit)
    }

    /// Submit a job, waiting for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShuttingDown`] if shutdown begins before or
    /// while waiting.
    pub async fn submit<F, Fut>(&self, job: F, priority: i32) -> Result<WorkHandle, DispatchError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::ShuttingDown)?;
        self.enqueue(Box::new(move |token| job(token).boxed()), priority, permit)
    }

    fn enqueue(
        &self,
        job: Job,
        priority: i32,
        permit: OwnedSemaphorePermit,
    ) -> Result<WorkHandle, DispatchError> {
        let token = self.shared.abort.child_token();
        let (reply, outcome) = oneshot::channel();
        {
            let mut state = self.shared.lock();
            if !state.accepting {
                return Err(DispatchError::ShuttingDown);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.items.push(QueuedItem {
                priority,
                seq,
                job,
                token: token.clone(),
                reply,
                permit,
            });
        }
        metrics::inc_work_outstanding();
        self.shared.notify.notify_one();
        Ok(WorkHandle {
            token,
            outcome,
            priority,
        })
    }

    /// Stop accepting work and wait for every worker to exit.
    ///
    /// Calling this more than once is harmless; a later [`ShutdownMode::Abort`]
    /// still discards whatever a slower drain has not started.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        let discarded = {
            let mut state = self.shared.lock();
            state.accepting = false;
            match mode {
                ShutdownMode::Drain => Vec::new(),
                ShutdownMode::Abort => std::mem::take(&mut state.items).into_vec(),
            }
        };
        self.shared.permits.close();
        if mode == ShutdownMode::Abort {
            self.shared.abort.cancel();
        }
        let count = discarded.len();
        for item in discarded {
            item.token.cancel();
            finish(item.reply, item.permit, WorkOutcome::Cancelled);
        }
        self.shared.stop.cancel();
        self.tracker.close();
        info!(?mode, discarded = count, "dispatch queue shutting down");
        self.tracker.wait().await;
    }
}

impl Drop for PriorityDispatchQueue {
    fn drop(&mut self) {
        self.shared.lock().accepting = false;
        self.shared.permits.close();
        self.shared.abort.cancel();
        self.shared.stop.cancel();
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    loop {
        let notified = shared.notify.notified();
        if let Some(item) = shared.pop() {
            run_item(item, worker).await;
            continue;
        }
        if shared.stop.is_cancelled() {
            debug!(worker, "dispatch worker exiting");
            return;
        }
        tokio::select! {
            () = notified => {}
            () = shared.stop.cancelled() => {}
        }
    }
}

async fn run_item(item: QueuedItem, worker: usize) {
    let QueuedItem {
        priority,
        seq,
        job,
        token,
        reply,
        permit,
    } = item;

    if token.is_cancelled() {
        debug!(worker, priority, seq, "skipping cancelled work item");
        finish(reply, permit, WorkOutcome::Cancelled);
        return;
    }

    let run_token = token.clone();
    let result = AssertUnwindSafe(async move { job(run_token).await })
        .catch_unwind()
        .await;
    let outcome = match result {
        Ok(Ok(())) => WorkOutcome::Completed,
        Ok(Err(_)) if token.is_cancelled() => WorkOutcome::Cancelled,
        Ok(Err(err)) => {
            warn!(worker, priority, seq, error = %err, "work item failed");
            WorkOutcome::Failed(err)
        }
        Err(panic) => {
            let panic_msg = format_panic(panic).to_string();
            error!(worker, priority, seq, panic = %panic_msg, "work item panicked");
            WorkOutcome::Panicked(panic_msg)
        }
    };
    finish(reply, permit, outcome);
}

fn finish(reply: oneshot::Sender<WorkOutcome>, permit: OwnedSemaphorePermit, outcome: WorkOutcome) {
    metrics::finish_work(outcome.label());
    drop(permit);
    // The submitter may have dropped its handle.
    let _ = reply.send(outcome);
}
