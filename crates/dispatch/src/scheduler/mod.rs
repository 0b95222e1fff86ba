//! Scheduler: owns the main queue and the background queues, and runs one
//! dispatch loop per queue.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, queue registration, routing and teardown
//! - `execution`: dispatch loops and single-task execution

mod core;
mod execution;

pub use self::core::Scheduler;
pub(crate) use self::execution::run_task;
