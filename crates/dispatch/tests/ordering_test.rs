//! Ordering guarantees of serial and concurrent queues.
//!
//! Serial queues start tasks in enqueue order and never overlap them, no
//! matter how many threads submit. Concurrent queues start in enqueue order
//! but never exceed their concurrency limit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use quay_dispatch::{DispatchConfig, Dispatcher, QueueMode};

const SUBMITTERS: usize = 4;
const TIMEOUT: Duration = Duration::from_secs(5);
const PER_SUBMITTER: usize = 25;

/// Tracks how many tasks run at once and the highest value seen.
#[derive(Default)]
struct Occupancy {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) -> usize {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        now
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn serial_queue_starts_in_enqueue_order_without_overlap() {
    let d = Dispatcher::new(DispatchConfig::default()).unwrap();
    let log = d.create_queue("log", QueueMode::Serial, 1).unwrap();

    let occupancy = Arc::new(Occupancy::default());
    let starts: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(SUBMITTERS));

    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|_| {
            let d = d.clone();
            let log = log.clone();
            let occupancy = Arc::clone(&occupancy);
            let starts = Arc::clone(&starts);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_SUBMITTER {
                    let occupancy = Arc::clone(&occupancy);
                    let starts = Arc::clone(&starts);
                    d.submit(&log, move |ctx| {
                        let concurrent = occupancy.enter();
                        starts.lock().unwrap().push((ctx.position(), ctx.start_ordinal()));
                        thread::sleep(Duration::from_micros(200));
                        occupancy.leave();
                        anyhow::ensure!(concurrent == 1, "overlap: {concurrent} tasks running");
                        Ok(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    d.shutdown(&log, true).unwrap();

    let starts = starts.lock().unwrap();
    let total = SUBMITTERS * PER_SUBMITTER;
    assert_eq!(starts.len(), total);
    for (i, (position, ordinal)) in starts.iter().enumerate() {
        assert_eq!(*position, i as u64, "start #{i} was enqueued at {position}");
        assert_eq!(*ordinal, i as u64);
    }
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);

    let metrics = d.metrics()["log"].clone();
    assert_eq!(metrics.completed, total as u64);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.peak_in_flight, 1);
    d.shutdown_all(true).unwrap();
}

/// Holds the first `size` arrivals until all of them are running at once.
struct Rendezvous {
    size: usize,
    arrived: Mutex<usize>,
    all_in: Condvar,
}

impl Rendezvous {
    fn new(size: usize) -> Self {
        Self {
            size,
            arrived: Mutex::new(0),
            all_in: Condvar::new(),
        }
    }

    /// Returns whether everyone arrived before the timeout.
    fn arrive(&self) -> bool {
        let mut arrived = self.arrived.lock().unwrap();
        *arrived += 1;
        self.all_in.notify_all();
        let (arrived, _) = self
            .all_in
            .wait_timeout_while(arrived, TIMEOUT, |arrived| *arrived < self.size)
            .unwrap();
        *arrived >= self.size
    }
}

#[test]
fn concurrent_queue_fills_and_respects_limit() {
    const LIMIT: usize = 3;
    const TASKS: usize = 30;

    let d = Dispatcher::new(DispatchConfig::default()).unwrap();
    let bg = d.create_queue("bg", QueueMode::Concurrent, LIMIT).unwrap();
    let occupancy = Arc::new(Occupancy::default());
    let rendezvous = Arc::new(Rendezvous::new(LIMIT));
    let next_start = Arc::new(AtomicUsize::new(0));
    let starts: Arc<Mutex<Vec<(u64, usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..TASKS {
        let occupancy = Arc::clone(&occupancy);
        let rendezvous = Arc::clone(&rendezvous);
        let next_start = Arc::clone(&next_start);
        let starts = Arc::clone(&starts);
        d.submit(&bg, move |ctx| {
            let sequence = next_start.fetch_add(1, Ordering::SeqCst);
            occupancy.enter();
            // The first LIMIT tasks only proceed once all of them are running.
            let met = ctx.position() >= LIMIT as u64 || rendezvous.arrive();
            starts.lock().unwrap().push((ctx.position(), sequence, met));
            thread::sleep(Duration::from_millis(2));
            occupancy.leave();
            Ok(())
        })
        .unwrap();
    }

    d.shutdown(&bg, true).unwrap();

    assert_eq!(occupancy.peak.load(Ordering::SeqCst), LIMIT);
    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), TASKS);
    for &(position, sequence, met) in starts.iter() {
        assert!(met, "task at {position} gave up waiting for the others");
        // Dequeue is FIFO, so a task can only be overtaken by earlier tasks
        // that were handed out with it, and at most LIMIT are out at once.
        assert!(
            position < (sequence + LIMIT) as u64,
            "task at {position} started as #{sequence}"
        );
    }
    let metrics = d.metrics()["bg"].clone();
    assert_eq!(metrics.completed, TASKS as u64);
    assert_eq!(metrics.peak_in_flight, LIMIT);
    d.shutdown_all(true).unwrap();
}

#[test]
fn concurrent_tasks_run_on_pool_threads() {
    let d = Dispatcher::new(DispatchConfig::default()).unwrap();
    let bg = d.create_queue("img", QueueMode::Concurrent, 2).unwrap();
    let names = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..4 {
        let names = Arc::clone(&names);
        d.submit(&bg, move |_| {
            let name = thread::current().name().unwrap_or_default().to_string();
            names.lock().unwrap().push(name);
            Ok(())
        })
        .unwrap();
    }
    d.shutdown_all(true).unwrap();

    let names = names.lock().unwrap();
    assert_eq!(names.len(), 4);
    assert!(
        names.iter().all(|n| n.starts_with("quay-bg-img-")),
        "{names:?}"
    );
}

#[test]
fn main_queue_serialises_submissions_from_background_tasks() {
    let d = Dispatcher::new(DispatchConfig::default()).unwrap();
    let bg = d.create_queue("bg", QueueMode::Concurrent, 4).unwrap();
    let occupancy = Arc::new(Occupancy::default());
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..16 {
        let main = d.clone();
        let occupancy = Arc::clone(&occupancy);
        let ran = Arc::clone(&ran);
        d.submit(&bg, move |_| {
            main.submit_main(move |ctx| {
                occupancy.enter();
                assert_eq!(ctx.queue(), "main");
                thread::sleep(Duration::from_micros(300));
                occupancy.leave();
                ran.fetch_add(1, Ordering::SeqCst);
            })?;
            Ok(())
        })
        .unwrap();
    }
    d.shutdown_all(true).unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 16);
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
}
