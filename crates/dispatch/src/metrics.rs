use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-queue counters, exposed as a snapshot by `Dispatcher::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueMetrics {
    /// Tasks accepted by `enqueue`.
    pub submitted: u64,
    /// Submissions refused (`QueueClosed`, `QueueFull`).
    pub rejected: u64,
    /// Tasks moved from pending to running.
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    /// Pending tasks that never ran (handle cancel or non-draining shutdown).
    pub cancelled: u64,
    /// Highest number of simultaneously running tasks observed.
    pub peak_in_flight: usize,
    /// Average task duration over completed and failed runs.
    pub avg_task_duration: Duration,
    pub last_finished: Option<DateTime<Utc>>,
}

impl QueueMetrics {
    pub fn record_start(&mut self, in_flight: usize) {
        self.started += 1;
        self.peak_in_flight = self.peak_in_flight.max(in_flight);
    }

    /// Record a task run that reached `Completed` or `Failed`.
    pub fn record_finish(&mut self, duration: Duration, failed: bool) {
        if failed {
            self.failed += 1;
        } else {
            self.completed += 1;
        }
        self.last_finished = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.completed + self.failed;
        self.avg_task_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_task_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    /// Tasks that reached any terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}
