//! Continuations: tasks that carry a producer's result onward.
//!
//! A chained producer runs its action; on success the value moves into a new
//! task that is submitted to the target queue after the producer completed.
//! The producer keeps no reference to the value afterwards. If the action
//! fails, nothing is submitted. If the submission itself fails, the producer
//! stays `Completed` and the failure goes to the producer queue's error sink.

use std::sync::{Arc, Weak};

use anyhow::{anyhow, Context};
use tracing::debug;

use crate::dispatcher::{resolve_handle, QueueHandle};
use crate::error::DispatchError;
use crate::queue::Queue;
use crate::scheduler::Scheduler;
use crate::task::{FollowUp, Task, TaskContext, TaskId};

/// Where a continuation is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The main serial queue.
    Main,
    /// A specific queue.
    Queue(QueueHandle),
}

impl Target {
    pub(crate) fn resolve(&self, scheduler: &Scheduler) -> Result<Arc<Queue>, DispatchError> {
        match self {
            Target::Main => Ok(Arc::clone(scheduler.main_queue())),
            Target::Queue(handle) => resolve_handle(scheduler, handle),
        }
    }
}

impl From<QueueHandle> for Target {
    fn from(handle: QueueHandle) -> Self {
        Target::Queue(handle)
    }
}

/// Build a producer task running `action`, whose value is handed to
/// `continuation` on `target`.
///
/// The continuation is submitted as the producer's follow-up, so the worker
/// only submits it once the producer is `Completed` and out of flight. The
/// scheduler is held weakly: a pending producer must not keep its own
/// dispatcher alive.
pub(crate) fn chain<F, T, C>(
    id: TaskId,
    scheduler: Weak<Scheduler>,
    action: F,
    target: Target,
    continuation: C,
) -> Task
where
    F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
    C: FnOnce(&TaskContext, T) -> anyhow::Result<()> + Send + 'static,
{
    Task::from_body(
        id,
        Box::new(move |ctx: &TaskContext| -> anyhow::Result<Option<FollowUp>> {
            let value = action(ctx)?;
            let producer = ctx.task_id();
            let follow_up: FollowUp = Box::new(move || {
                submit_continuation(producer, &scheduler, &target, value, continuation)
            });
            Ok(Some(follow_up))
        }),
    )
}

fn submit_continuation<T, C>(
    producer: TaskId,
    scheduler: &Weak<Scheduler>,
    target: &Target,
    value: T,
    continuation: C,
) -> anyhow::Result<()>
where
    T: Send + 'static,
    C: FnOnce(&TaskContext, T) -> anyhow::Result<()> + Send + 'static,
{
    let scheduler = scheduler.upgrade().ok_or_else(|| {
        anyhow!("dispatcher dropped before the continuation of task {producer} was submitted")
    })?;
    let queue = target
        .resolve(&scheduler)
        .with_context(|| format!("submitting continuation of task {producer}"))?;
    let task = Task::from_fn(scheduler.next_task_id(), move |ctx: &TaskContext| {
        continuation(ctx, value)
    });
    let handle = Scheduler::enqueue_on(&queue, task)
        .with_context(|| format!("submitting continuation of task {producer}"))?;

    debug!(
        %producer,
        continuation = %handle.id(),
        queue = %queue.name(),
        "continuation submitted"
    );
    Ok(())
}
