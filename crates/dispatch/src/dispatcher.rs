//! Public facade.
//!
//! [`Dispatcher`] is the only type callers need: it creates queues, accepts
//! submissions and tears everything down. It is cheap to clone, so tasks can
//! capture a clone to submit follow-up work, typically back to the main queue.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use quay_core::{DispatchConfig, QueueMode};

use crate::continuation::{chain, Target};
use crate::error::{DispatchError, TaskFailure};
use crate::metrics::QueueMetrics;
use crate::queue::{ErrorSink, Queue, QueueId, QueueOptions, QueueStatus};
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskContext, TaskHandle};

// ── QueueHandle ──────────────────────────────────────────────────────

/// Caller-side reference to a registered queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    id: QueueId,
    name: String,
    mode: QueueMode,
    concurrency: usize,
}

impl QueueHandle {
    fn from_queue(queue: &Queue) -> Self {
        Self {
            id: queue.id(),
            name: queue.name().to_string(),
            mode: queue.mode(),
            concurrency: queue.concurrency_limit(),
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
        self.concurrency
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mode)
    }
}

/// Resolve a handle against a scheduler. Handles from another dispatcher, or
/// to a queue that was replaced, are unknown here.
pub(crate) fn resolve_handle(
    scheduler: &Scheduler,
    handle: &QueueHandle,
) -> Result<Arc<Queue>, DispatchError> {
    let queue = scheduler.queue(&handle.name)?;
    if queue.id() != handle.id {
        return Err(DispatchError::UnknownQueue(handle.name.clone()));
    }
    Ok(queue)
}

// ── DispatcherBuilder ────────────────────────────────────────────────

/// Fluent builder for a [`Dispatcher`].
///
/// # Example
/// ```ignore
/// let dispatcher = Dispatcher::builder(DispatchConfig::default())
///     .main_error_sink(|failure| eprintln!("{failure}"))
///     .declared_queues(true)
///     .build()?;
/// ```
pub struct DispatcherBuilder {
    config: DispatchConfig,
    main_error_sink: Option<ErrorSink>,
    declared_queues: bool,
}

impl DispatcherBuilder {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            main_error_sink: None,
            declared_queues: false,
        }
    }

    /// Receive failures of main-queue tasks (default: logged).
    pub fn main_error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        self.main_error_sink = Some(Arc::new(sink));
        self
    }

    /// Also create every queue listed under `[queues]` in the config.
    pub fn declared_queues(mut self, enabled: bool) -> Self {
        self.declared_queues = enabled;
        self
    }

    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let declared = if self.declared_queues {
            self.config.queues.clone()
        } else {
            BTreeMap::new()
        };
        let scheduler = Arc::new(Scheduler::new(self.config, self.main_error_sink)?);
        let dispatcher = Dispatcher { scheduler };
        for (name, queue) in &declared {
            dispatcher.create_queue_with(name, QueueOptions::from_config(queue))?;
        }
        Ok(dispatcher)
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Entry point for submitting work.
#[derive(Clone)]
pub struct Dispatcher {
    scheduler: Arc<Scheduler>,
}

impl Dispatcher {
    /// Start a dispatcher with just the main queue.
    pub fn new(config: DispatchConfig) -> Result<Self, DispatchError> {
        DispatcherBuilder::new(config).build()
    }

    /// Start a dispatcher with the main queue plus every declared queue.
    pub fn from_config(config: DispatchConfig) -> Result<Self, DispatchError> {
        DispatcherBuilder::new(config).declared_queues(true).build()
    }

    pub fn builder(config: DispatchConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    // ── Queues ───────────────────────────────────────────────────────

    /// Create a background queue. `concurrency_limit` must be at least 1 and
    /// is forced to 1 for serial queues.
    pub fn create_queue(
        &self,
        name: &str,
        mode: QueueMode,
        concurrency_limit: usize,
    ) -> Result<QueueHandle, DispatchError> {
        if concurrency_limit == 0 {
            return Err(DispatchError::InvalidConcurrency(name.to_string()));
        }
        let options = QueueOptions {
            mode,
            concurrency_limit: Some(concurrency_limit),
            max_depth: None,
            error_sink: None,
        };
        self.create_queue_with(name, options)
    }

    /// Create a background queue with full options (depth cap, error sink).
    pub fn create_queue_with(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueHandle, DispatchError> {
        let queue = self.scheduler.register_queue(name, options)?;
        Ok(QueueHandle::from_queue(&queue))
    }

    /// Find a queue by name (the main queue included).
    pub fn lookup(&self, name: &str) -> Result<QueueHandle, DispatchError> {
        let queue = self.scheduler.queue(name)?;
        Ok(QueueHandle::from_queue(&queue))
    }

    pub fn main_queue(&self) -> QueueHandle {
        QueueHandle::from_queue(self.scheduler.main_queue())
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Submit `action` to `queue`. Returns as soon as the task is queued.
    ///
    /// The action's value is discarded; use [`submit_then`](Self::submit_then)
    /// to pass it on.
    pub fn submit<F, T>(&self, queue: &QueueHandle, action: F) -> Result<TaskHandle, DispatchError>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let target = resolve_handle(&self.scheduler, queue)?;
        let task = Task::from_fn(self.scheduler.next_task_id(), action);
        Scheduler::enqueue_on(&target, task)
    }

    /// Submit `action` to the main queue. Callable from any thread, including
    /// from inside a running background task.
    pub fn submit_main<F>(&self, action: F) -> Result<TaskHandle, DispatchError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let task = Task::from_fn(self.scheduler.next_task_id(), move |ctx: &TaskContext| {
            action(ctx);
            Ok(())
        });
        self.scheduler.submit_main(task)
    }

    /// Submit `action` to `queue`; once it returns `Ok(value)`, submit
    /// `continuation(value)` to `target`. Returns the producer's handle.
    ///
    /// The continuation is submitted only after the producer has completed
    /// and released its slot. If the action fails the continuation is never
    /// submitted. If the continuation cannot be submitted, the producer stays
    /// `Completed` and the failure goes to `queue`'s error sink.
    pub fn submit_then<F, T, C>(
        &self,
        queue: &QueueHandle,
        action: F,
        target: Target,
        continuation: C,
    ) -> Result<TaskHandle, DispatchError>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(&TaskContext, T) -> anyhow::Result<()> + Send + 'static,
    {
        let producer_queue = resolve_handle(&self.scheduler, queue)?;
        let producer = chain(
            self.scheduler.next_task_id(),
            Arc::downgrade(&self.scheduler),
            action,
            target,
            continuation,
        );
        Scheduler::enqueue_on(&producer_queue, producer)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Close one queue. See [`Queue::shutdown`] for `drain` semantics.
    pub fn shutdown(&self, queue: &QueueHandle, drain: bool) -> Result<(), DispatchError> {
        resolve_handle(&self.scheduler, queue)?.shutdown(drain)
    }

    /// Close every queue (background in registration order, main last) and
    /// join the dispatch loops. See [`Scheduler::shutdown_all`].
    pub fn shutdown_all(&self, drain: bool) -> Result<(), DispatchError> {
        self.scheduler.shutdown_all(drain)
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn status(&self, queue: &QueueHandle) -> Result<QueueStatus, DispatchError> {
        Ok(resolve_handle(&self.scheduler, queue)?.status())
    }

    /// Metrics for every queue, keyed by queue name.
    pub fn metrics(&self) -> BTreeMap<String, QueueMetrics> {
        let main = self.scheduler.main_queue();
        let mut metrics = BTreeMap::new();
        metrics.insert(main.name().to_string(), main.metrics());
        for queue in self.scheduler.background_queues() {
            metrics.insert(queue.name().to_string(), queue.metrics());
        }
        metrics
    }

    pub fn config(&self) -> &DispatchConfig {
        self.scheduler.config()
    }

    /// Log a one-line summary per queue.
    pub fn log_status(&self) {
        let mut queues = self.scheduler.background_queues();
        queues.push(Arc::clone(self.scheduler.main_queue()));
        for queue in queues {
            let status = queue.status();
            let metrics = queue.metrics();
            info!(
                queue = %status.name,
                mode = %status.mode,
                pending = status.pending,
                in_flight = status.in_flight,
                completed = metrics.completed,
                failed = metrics.failed,
                cancelled = metrics.cancelled,
                closed = status.closed,
                "queue status"
            );
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("main_queue", &self.scheduler.main_queue().name())
            .field("background_queues", &self.scheduler.background_queues().len())
            .field("stopped", &self.scheduler.is_stopped())
            .finish()
    }
}
