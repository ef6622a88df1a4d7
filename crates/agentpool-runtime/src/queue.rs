//! Priority task intake.
//!
//! The queue is unbounded: `push` never blocks and never drops a task while
//! the queue is open. Ordering is strict priority descending; within one
//! priority, tasks leave in the order they were pushed. A requeued task is
//! pushed again and therefore joins the back of its (new) priority tier.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use agentpool_core::TaskRequest;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was closed for shutdown; the task is handed back.
    #[error("Task queue is closed")]
    Closed(Box<QueuedTask>),
}

/// A task waiting for dispatch.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub request: TaskRequest,

    /// Caller-held cancellation signal.
    pub cancel: CancellationToken,

    /// Executions already attempted.
    pub attempts: u32,
}

impl QueuedTask {
    /// Wrap a request with a fresh cancellation token.
    pub fn new(request: TaskRequest) -> Self {
        Self::with_cancel(request, CancellationToken::new())
    }

    /// Wrap a request with a caller-supplied cancellation token.
    pub fn with_cancel(request: TaskRequest, cancel: CancellationToken) -> Self {
        Self {
            request,
            cancel,
            attempts: 0,
        }
    }
}

struct Entry {
    seq: u64,
    task: QueuedTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first, then lower seq.
        self.task
            .request
            .priority
            .cmp(&other.task.request.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

/// Priority queue safe for concurrent producers and a single consumer.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
    available: Notify,
}

impl TaskQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task. Fails only once the queue is closed.
    pub fn push(&self, task: QueuedTask) -> Result<(), QueueError> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(QueueError::Closed(Box::new(task)));
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry { seq, task });
        }
        self.available.notify_one();
        Ok(())
    }

    /// Dequeue the highest-priority task, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout; the caller retries.
    pub async fn take(&self, timeout: Duration) -> Option<QueuedTask> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_take() {
                return Some(task);
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.try_take();
            }
        }
    }

    /// Dequeue without waiting.
    pub fn try_take(&self) -> Option<QueuedTask> {
        self.lock().heap.pop().map(|entry| entry.task)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further pushes. Queued tasks stay takeable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove and return every queued task in dispatch order.
    pub fn drain(&self) -> Vec<QueuedTask> {
        let mut inner = self.lock();
        let mut drained = Vec::with_capacity(inner.heap.len());
        while let Some(entry) = inner.heap.pop() {
            drained.push(entry.task);
        }
        drained
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding this lock cannot leave the heap half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
