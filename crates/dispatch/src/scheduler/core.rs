use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use quay_core::{DispatchConfig, QueueConfig, QueueMode};

use crate::error::DispatchError;
use crate::queue::{ErrorSink, Queue, QueueOptions};
use crate::sync::{lock, read, write};
use crate::task::{Task, TaskHandle, TaskId};

/// A dispatch-loop thread and the queue it drains.
pub(super) struct WorkerThread {
    pub(super) queue: String,
    pub(super) handle: JoinHandle<()>,
}

/// The task scheduler. Owns the main serial queue (with its dedicated thread)
/// and the named background queues, and routes submissions to them.
///
/// Constructed once per [`Dispatcher`](crate::Dispatcher). Once stopped, by
/// `shutdown_all` or by being dropped, it accepts no new queues; dropping it
/// closes every queue without draining.
pub struct Scheduler {
    pub(super) config: DispatchConfig,
    /// The serial queue reserved for main-context work.
    pub(super) main: Arc<Queue>,
    /// Background queues in registration order.
    pub(super) queues: RwLock<Vec<Arc<Queue>>>,
    /// Dispatch-loop threads, joined by `shutdown_all`.
    pub(super) workers: Mutex<Vec<WorkerThread>>,
    pub(super) next_task_id: AtomicU64,
    /// Set under the `queues` write lock by `shutdown_all` and `Drop`.
    pub(super) stopped: AtomicBool,
}

impl Scheduler {
    /// Create the scheduler and start the main queue's dispatch loop.
    pub fn new(
        config: DispatchConfig,
        main_error_sink: Option<ErrorSink>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let main = Arc::new(Queue::new(
            config.main_queue.clone(),
            QueueMode::Serial,
            1,
            config.max_queue_depth,
            main_error_sink,
        ));
        let scheduler = Self {
            config,
            main: Arc::clone(&main),
            queues: RwLock::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            next_task_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        };
        let thread_name = format!("{}-main", scheduler.config.thread_prefix);
        scheduler.spawn_serial_loop(main, thread_name)?;

        info!(main_queue = %scheduler.config.main_queue, "scheduler started");
        Ok(scheduler)
    }

    /// Register a background queue and start its dispatch loop.
    pub fn register_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<Arc<Queue>, DispatchError> {
        let mut queues = write(&self.queues);
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DispatchError::Stopped);
        }
        if name == self.main.name() || queues.iter().any(|q| q.name() == name) {
            return Err(DispatchError::DuplicateQueue(name.to_string()));
        }

        let declared = QueueConfig {
            mode: options.mode,
            concurrency: options.concurrency_limit,
            max_depth: options.max_depth,
        };
        let limit = declared.resolved_concurrency(&self.config);
        if limit == 0 {
            return Err(DispatchError::InvalidConcurrency(name.to_string()));
        }
        let max_depth = declared.resolved_max_depth(&self.config);

        let queue = Arc::new(Queue::new(
            name,
            options.mode,
            limit,
            max_depth,
            options.error_sink,
        ));
        let thread_name = format!("{}-bg-{}", self.config.thread_prefix, name);
        match options.mode {
            QueueMode::Serial => self.spawn_serial_loop(Arc::clone(&queue), thread_name)?,
            QueueMode::Concurrent => {
                self.spawn_concurrent_loop(Arc::clone(&queue), thread_name)?
            }
        }
        queues.push(Arc::clone(&queue));

        info!(
            queue = %name,
            mode = %options.mode,
            concurrency = limit,
            max_depth = ?max_depth,
            "queue registered"
        );
        Ok(queue)
    }

    /// Look up a queue by name. The main queue resolves under its own name.
    pub fn queue(&self, name: &str) -> Result<Arc<Queue>, DispatchError> {
        if name == self.main.name() {
            return Ok(Arc::clone(&self.main));
        }
        read(&self.queues)
            .iter()
            .find(|q| q.name() == name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownQueue(name.to_string()))
    }

    pub fn main_queue(&self) -> &Arc<Queue> {
        &self.main
    }

    /// All background queues, in registration order.
    pub fn background_queues(&self) -> Vec<Arc<Queue>> {
        read(&self.queues).clone()
    }

    /// Whether `shutdown_all` ran (or the scheduler is being dropped).
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn next_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Route a task to the named queue.
    pub fn submit(&self, queue_name: &str, task: Task) -> Result<TaskHandle, DispatchError> {
        let queue = self.queue(queue_name)?;
        Self::enqueue_on(&queue, task)
    }

    /// Route a task to the main queue. Callable from any thread, including
    /// from inside a running background task.
    pub fn submit_main(&self, task: Task) -> Result<TaskHandle, DispatchError> {
        Self::enqueue_on(&self.main, task)
    }

    pub(crate) fn enqueue_on(queue: &Arc<Queue>, task: Task) -> Result<TaskHandle, DispatchError> {
        let shared = Arc::clone(task.shared());
        queue.enqueue(task)?;
        Ok(TaskHandle::new(shared, queue))
    }

    /// Close every queue and join the dispatch loops. No queue can be
    /// registered afterwards.
    ///
    /// Background queues close one after another in registration order, and
    /// the main queue closes last. While draining, a task may therefore hand
    /// work to the main queue or to a queue registered after its own; a queue
    /// registered earlier is already closed.
    ///
    /// A draining call from inside a task of any queue fails with
    /// [`DispatchError::ShutdownFromWorker`] before anything is closed.
    pub fn shutdown_all(&self, drain: bool) -> Result<(), DispatchError> {
        let queues = {
            let queues = write(&self.queues);
            if drain {
                if let Some(current) = queues
                    .iter()
                    .chain(iter::once(&self.main))
                    .find(|q| q.is_current())
                {
                    return Err(DispatchError::ShutdownFromWorker(current.name().to_string()));
                }
            }
            self.stopped.store(true, Ordering::SeqCst);
            queues.clone()
        };

        info!(drain, queues = queues.len(), "scheduler shutdown requested");
        for queue in &queues {
            queue.shutdown(drain)?;
        }
        self.main.shutdown(drain)?;
        self.join_workers();
        info!("scheduler stopped");
        Ok(())
    }

    /// Join every dispatch-loop thread except the calling one.
    fn join_workers(&self) {
        let workers = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for worker in workers {
            if worker.handle.thread().id() == current {
                continue;
            }
            if worker.handle.join().is_err() {
                error!(queue = %worker.queue, "dispatch loop panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let queues: Vec<Arc<Queue>> = {
            let mut queues = write(&self.queues);
            self.stopped.store(true, Ordering::SeqCst);
            queues.drain(..).collect()
        };
        for queue in queues.iter().chain(iter::once(&self.main)) {
            if !queue.is_closed() {
                // A non-draining shutdown cannot fail.
                let _ = queue.shutdown(false);
            }
        }
    }
}
