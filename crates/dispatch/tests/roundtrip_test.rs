//! Every submitted task runs exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quay_dispatch::{DispatchConfig, Dispatcher, QueueMode};

const TASKS: usize = 500;

fn tally(mode: QueueMode, limit: usize) {
    let d = Dispatcher::new(DispatchConfig::default()).unwrap();
    let queue = d.create_queue("work", mode, limit).unwrap();
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..TASKS).map(|_| AtomicUsize::new(0)).collect());

    let mut ids = HashSet::with_capacity(TASKS);
    for slot in 0..TASKS {
        let runs = Arc::clone(&runs);
        let handle = d
            .submit(&queue, move |_| {
                runs[slot].fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(ids.insert(handle.id()), "task id {} handed out twice", handle.id());
    }

    d.shutdown(&queue, true).unwrap();

    for (slot, count) in runs.iter().enumerate() {
        assert_eq!(count.load(Ordering::SeqCst), 1, "task {slot} ran a wrong number of times");
    }
    assert_eq!(ids.len(), TASKS);

    let metrics = d.metrics()["work"].clone();
    assert_eq!(metrics.submitted, TASKS as u64);
    assert_eq!(metrics.started, TASKS as u64);
    assert_eq!(metrics.completed, TASKS as u64);
    assert_eq!(metrics.failed + metrics.cancelled + metrics.rejected, 0);
    assert_eq!(metrics.finished(), TASKS as u64);
    assert!(metrics.last_finished.is_some());
    d.shutdown_all(true).unwrap();
}

#[test]
fn serial_queue_runs_each_task_once() {
    tally(QueueMode::Serial, 1);
}

#[test]
fn concurrent_queue_runs_each_task_once() {
    tally(QueueMode::Concurrent, 4);
}

#[test]
fn config_defaults_drive_declared_queues() {
    let config = DispatchConfig::from_toml(
        r#"
default_concurrency_limit = 3

[queues.work]
mode = "concurrent"
"#,
    )
    .unwrap();
    let d = Dispatcher::from_config(config).unwrap();
    let queue = d.lookup("work").unwrap();
    assert_eq!(queue.concurrency_limit(), 3);

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let counter = Arc::clone(&counter);
        d.submit(&queue, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }
    d.shutdown_all(true).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 50);
}
