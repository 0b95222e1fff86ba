//! Ordered task holders.
//!
//! A [`Queue`] buffers pending tasks in FIFO order and tracks which of them are
//! in flight. Serial queues allow one task in flight, concurrent queues up to
//! their concurrency limit. All state sits behind one mutex; two condition
//! variables wake the dispatch loop (`available`) and drain waiters (`idle`).

use std::cell::Cell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use quay_core::{QueueConfig, QueueMode};

use crate::error::{DispatchError, TaskFailure};
use crate::metrics::QueueMetrics;
use crate::sync::{lock, wait};
use crate::task::{Task, TaskId, TaskState};

/// Callback receiving failures of tasks run on a queue.
pub type ErrorSink = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

/// How a background queue should be built.
#[derive(Clone)]
pub struct QueueOptions {
    pub mode: QueueMode,
    /// `None` takes the dispatcher's `default_concurrency_limit`. Ignored for serial queues.
    pub concurrency_limit: Option<usize>,
    /// `None` takes the dispatcher's `max_queue_depth`.
    pub max_depth: Option<usize>,
    pub error_sink: Option<ErrorSink>,
}

impl QueueOptions {
    pub fn serial() -> Self {
        Self {
            mode: QueueMode::Serial,
            concurrency_limit: None,
            max_depth: None,
            error_sink: None,
        }
    }

    pub fn concurrent(limit: usize) -> Self {
        Self {
            mode: QueueMode::Concurrent,
            concurrency_limit: Some(limit),
            max_depth: None,
            error_sink: None,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            mode: config.mode,
            concurrency_limit: config.concurrency,
            max_depth: config.max_depth,
            error_sink: None,
        }
    }

    /// Cap the number of pending tasks.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Receive failures of tasks run on this queue.
    pub fn error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }
}

impl fmt::Debug for QueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOptions")
            .field("mode", &self.mode)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("max_depth", &self.max_depth)
            .field("has_error_sink", &self.error_sink.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QueueId(pub Uuid);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

thread_local! {
    static CURRENT_QUEUE: Cell<Option<QueueId>> = const { Cell::new(None) };
}

/// Marks the current thread as running a task of `queue` until dropped.
pub(crate) struct WorkerScope {
    previous: Option<QueueId>,
}

impl WorkerScope {
    pub(crate) fn enter(queue: QueueId) -> Self {
        let previous = CURRENT_QUEUE.with(|c| c.replace(Some(queue)));
        Self { previous }
    }
}

impl Drop for WorkerScope {
    fn drop(&mut self) {
        CURRENT_QUEUE.with(|c| c.set(self.previous));
    }
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub id: QueueId,
    pub name: String,
    pub mode: QueueMode,
    pub concurrency: usize,
    pub max_depth: Option<usize>,
    pub pending: usize,
    pub in_flight: usize,
    pub closed: bool,
}

struct QueueInner {
    pending: VecDeque<Task>,
    in_flight: HashSet<TaskId>,
    /// Completed tasks whose follow-up has not been submitted yet.
    handoffs: usize,
    closed: bool,
    next_position: u64,
    next_ordinal: u64,
}

impl QueueInner {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty() && self.handoffs == 0
    }
}

pub struct Queue {
    id: QueueId,
    name: String,
    mode: QueueMode,
    limit: usize,
    max_depth: Option<usize>,
    error_sink: Option<ErrorSink>,
    inner: Mutex<QueueInner>,
    available: Condvar,
    idle: Condvar,
    metrics: Mutex<QueueMetrics>,
}

impl Queue {
    /// Create a queue. Serial queues always get a limit of 1; a zero limit is
    /// raised to 1.
    pub fn new(
        name: impl Into<String>,
        mode: QueueMode,
        concurrency_limit: usize,
        max_depth: Option<usize>,
        error_sink: Option<ErrorSink>,
    ) -> Self {
        let limit = match mode {
            QueueMode::Serial => 1,
            QueueMode::Concurrent => concurrency_limit.max(1),
        };
        Self {
            id: QueueId(Uuid::new_v4()),
            name: name.into(),
            mode,
            limit,
            max_depth,
            error_sink,
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                in_flight: HashSet::new(),
                handoffs: 0,
                closed: false,
                next_position: 0,
                next_ordinal: 0,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            metrics: Mutex::new(QueueMetrics::default()),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn concurrency_limit(&self) -> usize {
        self.limit
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    /// Append a task. Never blocks on other tasks.
    pub fn enqueue(&self, mut task: Task) -> Result<(), DispatchError> {
        let mut inner = lock(&self.inner);
        let refusal = if inner.closed {
            Some(DispatchError::QueueClosed(self.name.clone()))
        } else {
            match self.max_depth {
                Some(depth) if inner.pending.len() >= depth => Some(DispatchError::QueueFull {
                    queue: self.name.clone(),
                    depth,
                }),
                _ => None,
            }
        };
        if let Some(err) = refusal {
            lock(&self.metrics).rejected += 1;
            drop(inner);
            debug!(queue = %self.name, task = %task.id(), error = %err, "enqueue refused");
            // `task` drops here, outside the queue lock.
            return Err(err);
        }

        task.position = inner.next_position;
        inner.next_position += 1;
        task.shared().transition(TaskState::Pending);
        debug!(queue = %self.name, task = %task.id(), position = task.position, "task enqueued");
        inner.pending.push_back(task);
        lock(&self.metrics).submitted += 1;
        drop(inner);

        self.available.notify_all();
        Ok(())
    }

    /// Take the head of `pending` and mark it running, if the queue has
    /// capacity. Serial queues refuse while a task is in flight.
    pub fn dequeue_for_worker(&self) -> Option<Task> {
        let mut inner = lock(&self.inner);
        self.take_next(&mut inner)
    }

    /// Blocking variant of [`dequeue_for_worker`](Self::dequeue_for_worker)
    /// used by dispatch loops. Suspends until a task can start; returns
    /// `None` once the queue is closed and nothing is pending.
    pub fn next_task(&self) -> Option<Task> {
        let mut inner = lock(&self.inner);
        loop {
            if let Some(task) = self.take_next(&mut inner) {
                return Some(task);
            }
            if inner.closed && inner.pending.is_empty() {
                return None;
            }
            inner = wait(&self.available, inner);
        }
    }

    fn take_next(&self, inner: &mut QueueInner) -> Option<Task> {
        if inner.in_flight.len() >= self.limit {
            return None;
        }
        let mut task = inner.pending.pop_front()?;
        task.ordinal = inner.next_ordinal;
        inner.next_ordinal += 1;
        inner.in_flight.insert(task.id());
        task.shared().transition(TaskState::Running);
        lock(&self.metrics).record_start(inner.in_flight.len());
        Some(task)
    }

    /// Release the in-flight slot of a finished task.
    pub fn complete(&self, task_id: TaskId) {
        self.release(task_id, false);
    }

    /// Release the slot of a completed task that still has a follow-up to
    /// run. The queue does not read as idle until
    /// [`finish_handoff`](Self::finish_handoff) is called, so a draining
    /// shutdown waits for the follow-up.
    pub(crate) fn complete_with_handoff(&self, task_id: TaskId) {
        self.release(task_id, true);
    }

    pub(crate) fn finish_handoff(&self) {
        let mut inner = lock(&self.inner);
        inner.handoffs = inner.handoffs.saturating_sub(1);
        if inner.is_idle() {
            self.idle.notify_all();
        }
    }

    fn release(&self, task_id: TaskId, handoff: bool) {
        let mut inner = lock(&self.inner);
        if !inner.in_flight.remove(&task_id) {
            warn!(queue = %self.name, task = %task_id, "complete called for a task not in flight");
        }
        if handoff {
            inner.handoffs += 1;
        }
        let idle = inner.is_idle();
        drop(inner);

        self.available.notify_all();
        if idle {
            self.idle.notify_all();
        }
    }

    /// Close the queue to new work.
    ///
    /// With `drain`, blocks until every pending and in-flight task finished.
    /// Without it, pending tasks are cancelled immediately and in-flight tasks
    /// are left to finish on their own.
    pub fn shutdown(&self, drain: bool) -> Result<(), DispatchError> {
        if drain && self.is_current() {
            return Err(DispatchError::ShutdownFromWorker(self.name.clone()));
        }

        let discarded: Vec<Task> = {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            let discarded: Vec<Task> = if drain {
                Vec::new()
            } else {
                inner.pending.drain(..).collect()
            };
            for task in &discarded {
                task.shared().transition(TaskState::Cancelled);
            }
            lock(&self.metrics).cancelled += discarded.len() as u64;
            if inner.is_idle() {
                self.idle.notify_all();
            }
            discarded
        };
        self.available.notify_all();
        info!(
            queue = %self.name,
            drain,
            discarded = discarded.len(),
            "queue closed"
        );
        drop(discarded);

        if drain {
            let mut inner = lock(&self.inner);
            while !inner.is_idle() {
                inner = wait(&self.idle, inner);
            }
            info!(queue = %self.name, "queue drained");
        }
        Ok(())
    }

    /// Remove a still-pending task. Returns `false` if it already left `pending`.
    pub(crate) fn cancel_pending(&self, task_id: TaskId) -> bool {
        let removed = {
            let mut inner = lock(&self.inner);
            let removed = inner
                .pending
                .iter()
                .position(|t| t.id() == task_id)
                .and_then(|index| inner.pending.remove(index));
            if let Some(task) = &removed {
                task.shared().transition(TaskState::Cancelled);
                lock(&self.metrics).cancelled += 1;
                if inner.is_idle() {
                    self.idle.notify_all();
                }
            }
            removed
        };
        match removed {
            Some(_) => {
                debug!(queue = %self.name, task = %task_id, "pending task cancelled");
                true
            }
            None => false,
        }
    }

    pub(crate) fn record_finish(&self, duration: Duration, failed: bool) {
        lock(&self.metrics).record_finish(duration, failed);
    }

    /// Deliver a failure to the error sink, or log it when none is registered.
    pub(crate) fn report_failure(&self, failure: &TaskFailure) {
        match &self.error_sink {
            Some(sink) => {
                if catch_unwind(AssertUnwindSafe(|| sink(failure))).is_err() {
                    error!(queue = %self.name, task = %failure.task_id, "error sink panicked");
                }
            }
            None => {
                warn!(
                    queue = %self.name,
                    task = %failure.task_id,
                    reason = %failure.reason,
                    "task failed"
                );
            }
        }
    }

    /// Whether the calling thread is currently running one of this queue's tasks.
    pub(crate) fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|c| c.get()) == Some(self.id)
    }

    pub fn status(&self) -> QueueStatus {
        let inner = lock(&self.inner);
        QueueStatus {
            id: self.id,
            name: self.name.clone(),
            mode: self.mode,
            concurrency: self.limit,
            max_depth: self.max_depth,
            pending: inner.pending.len(),
            in_flight: inner.in_flight.len(),
            closed: inner.closed,
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        lock(&self.metrics).clone()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("limit", &self.limit)
            .field("max_depth", &self.max_depth)
            .field("has_error_sink", &self.error_sink.is_some())
            .finish()
    }
}
