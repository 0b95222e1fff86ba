use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{DispatchError, TaskFailure};
use crate::queue::{Queue, WorkerScope};
use crate::sync::lock;
use crate::task::{FollowUp, Task, TaskContext, TaskId, TaskState};

use super::core::WorkerThread;
use super::Scheduler;

impl Scheduler {
    /// Start a loop that runs the queue's tasks one by one on its own thread.
    pub(super) fn spawn_serial_loop(
        &self,
        queue: Arc<Queue>,
        thread_name: String,
    ) -> Result<(), DispatchError> {
        let name = queue.name().to_string();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || serial_loop(&queue))
            .map_err(|e| DispatchError::WorkerSpawn(e.to_string()))?;
        lock(&self.workers).push(WorkerThread { queue: name, handle });
        Ok(())
    }

    /// Start a loop that pulls tasks in FIFO order and hands them to a
    /// `rayon` pool sized to the queue's concurrency limit.
    pub(super) fn spawn_concurrent_loop(
        &self,
        queue: Arc<Queue>,
        thread_name: String,
    ) -> Result<(), DispatchError> {
        let name = queue.name().to_string();
        let pool_prefix = thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(queue.concurrency_limit())
            .thread_name(move |i| format!("{pool_prefix}-{i}"))
            .build()
            .map_err(|e| DispatchError::WorkerSpawn(e.to_string()))?;

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || concurrent_loop(queue, pool))
            .map_err(|e| DispatchError::WorkerSpawn(e.to_string()))?;
        lock(&self.workers).push(WorkerThread { queue: name, handle });
        Ok(())
    }
}

fn serial_loop(queue: &Arc<Queue>) {
    debug!(queue = %queue.name(), "dispatch loop started");
    while let Some(task) = queue.next_task() {
        run_task(queue, task);
    }
    debug!(queue = %queue.name(), "dispatch loop stopped");
}

fn concurrent_loop(queue: Arc<Queue>, pool: rayon::ThreadPool) {
    debug!(queue = %queue.name(), workers = pool.current_num_threads(), "dispatch loop started");
    // `next_task` only hands out a task while fewer than `limit` are in flight,
    // so the pool always has an idle thread for it.
    while let Some(task) = queue.next_task() {
        let queue = Arc::clone(&queue);
        pool.spawn(move || run_task(&queue, task));
    }
    debug!(queue = %queue.name(), "dispatch loop stopped");
}

/// Execute one dequeued task, record its outcome and release its slot.
///
/// Errors and panics from the action mark the task `Failed` and go to the
/// queue's error sink; the calling worker always survives. A follow-up runs
/// only after the task is `Completed` and out of flight.
pub(crate) fn run_task(queue: &Queue, mut task: Task) {
    let Some(body) = task.take_body() else {
        warn!(queue = %queue.name(), task = %task.id(), "task has no action");
        queue.complete(task.id());
        return;
    };
    let ctx = TaskContext::for_task(&task, queue.name());
    debug!(
        queue = %queue.name(),
        task = %task.id(),
        ordinal = ctx.start_ordinal(),
        "task started"
    );

    let started = Instant::now();
    let outcome = {
        let _scope = WorkerScope::enter(queue.id());
        catch_unwind(AssertUnwindSafe(|| body(&ctx)))
    };
    let elapsed = started.elapsed();

    let outcome = match outcome {
        Ok(Ok(follow_up)) => Ok(follow_up),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_reason(payload.as_ref())),
    };

    match outcome {
        Ok(follow_up) => {
            queue.record_finish(elapsed, false);
            task.shared().transition(TaskState::Completed);
            debug!(queue = %queue.name(), task = %task.id(), ?elapsed, "task completed");
            match follow_up {
                Some(follow_up) => hand_off(queue, task.id(), follow_up),
                None => queue.complete(task.id()),
            }
        }
        Err(reason) => {
            queue.record_finish(elapsed, true);
            queue.report_failure(&TaskFailure {
                task_id: task.id(),
                queue: queue.name().to_string(),
                reason: reason.clone(),
            });
            task.shared().transition(TaskState::Failed(reason));
            queue.complete(task.id());
        }
    }
}

/// Release a completed task's slot, then run its follow-up. The queue stays
/// non-idle until the follow-up returned.
fn hand_off(queue: &Queue, task_id: TaskId, follow_up: FollowUp) {
    queue.complete_with_handoff(task_id);
    let result = match catch_unwind(AssertUnwindSafe(follow_up)) {
        Ok(result) => result.map_err(|e| format!("{e:#}")),
        Err(payload) => Err(panic_reason(payload.as_ref())),
    };
    if let Err(reason) = result {
        debug!(queue = %queue.name(), task = %task_id, %reason, "follow-up failed");
        queue.report_failure(&TaskFailure {
            task_id,
            queue: queue.name().to_string(),
            reason,
        });
    }
    queue.finish_handoff();
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_reason_extracts_message() {
        let payload = catch_unwind(|| panic!("disk on fire")).unwrap_err();
        assert_eq!(panic_reason(payload.as_ref()), "panicked: disk on fire");

        let payload = catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_reason(payload.as_ref()), "panicked");
    }
}
