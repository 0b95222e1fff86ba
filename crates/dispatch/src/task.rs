//! Tasks, their lifecycle, and the handles callers keep after submitting.
//!
//! Lifecycle: `Created → Pending → Running → {Completed | Failed}`, plus
//! `Pending → Cancelled` for work discarded before it started. Terminal states
//! never change again.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{DispatchError, TaskFailure};
use crate::queue::Queue;
use crate::sync::{lock, wait};

/// Opaque task identifier. Assigned from a per-dispatcher counter, so ids
/// also order tasks by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Created,
    Pending,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed(_) | TaskState::Cancelled
        )
    }

    /// Whether `self → next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Created, TaskState::Pending)
                | (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed(_))
        )
    }
}

/// Boxed task body. Always run at most once.
pub type Action = Box<dyn FnOnce(&TaskContext) -> anyhow::Result<()> + Send + 'static>;

/// Step a worker runs after its task reached `Completed` and released its
/// slot. An error here is reported to the queue's error sink; the task's
/// terminal state stays as it is.
pub(crate) type FollowUp = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// What a worker actually runs: the action, plus an optional follow-up.
pub(crate) type Body =
    Box<dyn FnOnce(&TaskContext) -> anyhow::Result<Option<FollowUp>> + Send + 'static>;

// ── Shared state ─────────────────────────────────────────────────────

/// State shared between a queued [`Task`] and every [`TaskHandle`] to it.
#[derive(Debug)]
pub(crate) struct TaskShared {
    id: TaskId,
    state: Mutex<TaskState>,
    changed: Condvar,
    cancel: CancelToken,
}

impl TaskShared {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Mutex::new(TaskState::Created),
            changed: Condvar::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub(crate) fn transition(&self, next: TaskState) -> bool {
        let mut state = lock(&self.state);
        if !state.can_transition_to(&next) {
            return false;
        }
        *state = next;
        self.changed.notify_all();
        true
    }

    pub(crate) fn state(&self) -> TaskState {
        lock(&self.state).clone()
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

// ── Task ─────────────────────────────────────────────────────────────

/// An atomic unit of deferred work.
///
/// Owned by its queue while pending and by the executing worker while running.
pub struct Task {
    id: TaskId,
    created_at: DateTime<Utc>,
    body: Option<Body>,
    shared: Arc<TaskShared>,
    /// Enqueue sequence within the owning queue.
    pub(crate) position: u64,
    /// Start sequence within the owning queue, assigned at dequeue.
    pub(crate) ordinal: u64,
}

impl Task {
    pub fn new(id: TaskId, action: Action) -> Self {
        Self::from_body(id, Box::new(move |ctx: &TaskContext| action(ctx).map(|()| None::<FollowUp>)))
    }

    pub(crate) fn from_body(id: TaskId, body: Body) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            body: Some(body),
            shared: Arc::new(TaskShared::new(id)),
            position: 0,
            ordinal: 0,
        }
    }

    /// Box a closure into a task, discarding whatever value it produces.
    pub fn from_fn<F, T>(id: TaskId, f: F) -> Self
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        Self::new(id, Box::new(move |ctx: &TaskContext| f(ctx).map(|_| ())))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub(crate) fn shared(&self) -> &Arc<TaskShared> {
        &self.shared
    }

    pub(crate) fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .field("position", &self.position)
            .finish()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // A pending task dropped without running (its queue went away) must
        // still release anyone waiting on its handle.
        self.shared.transition(TaskState::Cancelled);
    }
}

// ── Execution context ────────────────────────────────────────────────

/// Passed to every task action while it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    queue: String,
    position: u64,
    ordinal: u64,
    cancel: CancelToken,
}

impl TaskContext {
    pub(crate) fn for_task(task: &Task, queue: &str) -> Self {
        Self {
            task_id: task.id,
            queue: queue.to_string(),
            position: task.position,
            ordinal: task.ordinal,
            cancel: task.shared.cancel_token().clone(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Name of the queue running this task.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Zero-based enqueue position within the queue.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Zero-based start position within the queue.
    pub fn start_ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Handle ───────────────────────────────────────────────────────────

/// Caller-side view of a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
    queue_name: String,
    queue: Weak<Queue>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<TaskShared>, queue: &Arc<Queue>) -> Self {
        Self {
            shared,
            queue_name: queue.name().to_string(),
            queue: Arc::downgrade(queue),
        }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Name of the queue the task was submitted to.
    pub fn queue(&self) -> &str {
        &self.queue_name
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancel the task.
    ///
    /// A pending task is removed from its queue and never runs. A running task
    /// only has its [`CancelToken`] tripped. Returns `false` once the task has
    /// reached a terminal state.
    pub fn cancel(&self) -> bool {
        if let Some(queue) = self.queue.upgrade() {
            if queue.cancel_pending(self.id()) {
                return true;
            }
        }
        match self.state() {
            TaskState::Running => {
                self.shared.cancel_token().cancel();
                true
            }
            _ => false,
        }
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self) -> TaskState {
        let mut state = lock(&self.shared.state);
        while !state.is_terminal() {
            state = wait(&self.shared.changed, state);
        }
        state.clone()
    }

    /// Block for at most `timeout`. `None` if the task is still unfinished.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        while !state.is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = match self.shared.changed.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Some(state.clone())
    }

    /// Wait for the task and turn a failed or cancelled outcome into an error.
    pub fn join(&self) -> Result<(), DispatchError> {
        match self.wait() {
            TaskState::Completed => Ok(()),
            TaskState::Failed(reason) => Err(DispatchError::TaskFailed(TaskFailure {
                task_id: self.id(),
                queue: self.queue_name.clone(),
                reason,
            })),
            _ => Err(DispatchError::Cancelled(self.id())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn noop(id: u64) -> Task {
        Task::from_fn(TaskId(id), |_| Ok(()))
    }

    #[test]
    fn lifecycle_edges() {
        use TaskState::*;
        assert!(Created.can_transition_to(&Pending));
        assert!(Pending.can_transition_to(&Running));
        assert!(Pending.can_transition_to(&Cancelled));
        assert!(Running.can_transition_to(&Completed));
        assert!(Running.can_transition_to(&Failed("boom".into())));

        assert!(!Created.can_transition_to(&Running));
        assert!(!Running.can_transition_to(&Cancelled));
        assert!(!Completed.can_transition_to(&Failed("late".into())));
        assert!(!Cancelled.can_transition_to(&Running));
    }

    #[test]
    fn terminal_states_stick() {
        let task = noop(1);
        let shared = Arc::clone(task.shared());
        assert!(shared.transition(TaskState::Pending));
        assert!(shared.transition(TaskState::Running));
        assert!(shared.transition(TaskState::Completed));
        assert!(!shared.transition(TaskState::Failed("again".into())));
        assert_eq!(shared.state(), TaskState::Completed);
    }

    #[test]
    fn dropping_pending_task_cancels_it() {
        let task = noop(2);
        let shared = Arc::clone(task.shared());
        shared.transition(TaskState::Pending);
        drop(task);
        assert_eq!(shared.state(), TaskState::Cancelled);
    }

    #[test]
    fn dropping_finished_task_keeps_state() {
        let task = noop(3);
        let shared = Arc::clone(task.shared());
        shared.transition(TaskState::Pending);
        shared.transition(TaskState::Running);
        shared.transition(TaskState::Completed);
        drop(task);
        assert_eq!(shared.state(), TaskState::Completed);
    }

    #[test]
    fn from_fn_discards_value() {
        let mut task = Task::from_fn(TaskId(4), |ctx| Ok(ctx.position() + 41));
        let ctx = TaskContext::for_task(&task, "bg");
        let body = task.take_body().unwrap();
        assert!(matches!(body(&ctx), Ok(None)));
        assert!(task.take_body().is_none());
    }

    #[test]
    fn waiters_wake_on_transition() {
        let task = noop(5);
        let shared = Arc::clone(task.shared());
        shared.transition(TaskState::Pending);

        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut state = lock(&shared.state);
                while !state.is_terminal() {
                    state = wait(&shared.changed, state);
                }
                state.clone()
            })
        };

        shared.transition(TaskState::Running);
        shared.transition(TaskState::Failed("nope".into()));
        assert_eq!(waiter.join().unwrap(), TaskState::Failed("nope".into()));
        drop(task);
    }

    #[test]
    fn task_id_display() {
        assert_eq!(TaskId(12).to_string(), "#12");
    }
}
