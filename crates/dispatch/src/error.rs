use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::task::TaskId;

/// Errors returned synchronously by dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("queue '{0}' is closed")]
    QueueClosed(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("queue '{0}' already exists")]
    DuplicateQueue(String),

    #[error("queue '{queue}' is full ({depth} pending)")]
    QueueFull { queue: String, depth: usize },

    #[error(transparent)]
    TaskFailed(TaskFailure),

    #[error("task {0} was cancelled before it started")]
    Cancelled(TaskId),

    #[error("concurrency limit for queue '{0}' must be at least 1")]
    InvalidConcurrency(String),

    #[error("queue '{0}' cannot be drained from one of its own tasks")]
    ShutdownFromWorker(String),

    #[error("dispatcher has been shut down")]
    Stopped,

    #[error("failed to start worker: {0}")]
    WorkerSpawn(String),

    #[error(transparent)]
    Config(#[from] quay_core::ConfigError),
}

/// A task action that returned an error or panicked.
///
/// Never returned from `submit`; delivered to the owning queue's error sink
/// and surfaced by [`TaskHandle::join`](crate::TaskHandle::join).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub queue: String,
    pub reason: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} on queue '{}' failed: {}",
            self.task_id, self.queue, self.reason
        )
    }
}

impl std::error::Error for TaskFailure {}
