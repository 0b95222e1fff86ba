//! Cooperative task dispatch: one serial main queue plus named background
//! queues, each drained by its own worker context.
//!
//! Callers interact with [`Dispatcher`]; everything else is plumbing it wires
//! together. A background task "jumps back" to the main context by submitting
//! a continuation to the main queue, either explicitly through
//! [`Dispatcher::submit_main`] or via [`Dispatcher::submit_then`].

pub mod cancel;
pub mod collaborators;
pub mod continuation;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod scheduler;
mod sync;
pub mod task;

pub use cancel::{CancelToken, Cancelled};
pub use collaborators::{fetch_and_display, DisplaySink, ResourceFetcher};
pub use continuation::Target;
pub use dispatcher::{Dispatcher, DispatcherBuilder, QueueHandle};
pub use error::{DispatchError, TaskFailure};
pub use metrics::QueueMetrics;
pub use queue::{ErrorSink, Queue, QueueId, QueueOptions, QueueStatus};
pub use quay_core::{DispatchConfig, QueueConfig, QueueMode};
pub use scheduler::Scheduler;
pub use task::{Task, TaskContext, TaskHandle, TaskId, TaskState};
