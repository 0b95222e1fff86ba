//! The fetch-then-display scenario, wired to a simulated network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info};

use quay_dispatch::{
    fetch_and_display, DispatchError, Dispatcher, DisplaySink, QueueHandle, QueueOptions,
    ResourceFetcher, TaskState,
};

/// Pretends to download a resource: sleeps, then returns placeholder bytes.
pub struct SimulatedFetcher {
    latency: Duration,
    failing: HashSet<String>,
}

impl SimulatedFetcher {
    pub fn new(latency: Duration, failing: impl IntoIterator<Item = String>) -> Self {
        Self {
            latency,
            failing: failing.into_iter().collect(),
        }
    }
}

impl ResourceFetcher for SimulatedFetcher {
    fn fetch(&self, resource_id: &str) -> anyhow::Result<Bytes> {
        thread::sleep(self.latency);
        if self.failing.contains(resource_id) {
            anyhow::bail!("simulated network failure");
        }
        Ok(Bytes::from(format!("<image data for {resource_id}>")))
    }
}

/// Writes displayed resources to stdout.
pub struct StdoutSink;

impl DisplaySink for StdoutSink {
    fn display(&self, resource_id: &str, bytes: &[u8]) {
        println!("{resource_id} ready ({} bytes)", bytes.len());
    }
}

/// What to run.
#[derive(Debug, Clone)]
pub struct DemoPlan {
    pub images: Vec<String>,
    pub queue: String,
    pub concurrency: Option<usize>,
    pub drain: bool,
}

/// Outcome counts of one demo run.
#[derive(Debug, Default, Serialize)]
pub struct DemoReport {
    pub submitted: u64,
    pub fetched: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Use the queue the config declared, or create it.
fn background_queue(
    dispatcher: &Dispatcher,
    plan: &DemoPlan,
    failures: Arc<AtomicU64>,
) -> Result<QueueHandle> {
    match dispatcher.lookup(&plan.queue) {
        Ok(queue) => Ok(queue),
        Err(DispatchError::UnknownQueue(_)) => {
            let options = QueueOptions::concurrent(
                plan.concurrency
                    .unwrap_or(dispatcher.config().default_concurrency_limit),
            )
            .error_sink(move |failure| {
                failures.fetch_add(1, Ordering::Relaxed);
                error!(task = %failure.task_id, reason = %failure.reason, "fetch failed");
            });
            dispatcher
                .create_queue_with(&plan.queue, options)
                .with_context(|| format!("failed to create queue '{}'", plan.queue))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch every image in the background, display each from the main queue,
/// and interleave a piece of UI work on main. Shuts the dispatcher down
/// before returning.
pub fn run(
    dispatcher: &Dispatcher,
    plan: &DemoPlan,
    fetcher: Arc<dyn ResourceFetcher>,
    sink: Arc<dyn DisplaySink>,
) -> Result<DemoReport> {
    let failures = Arc::new(AtomicU64::new(0));
    let queue = background_queue(dispatcher, plan, Arc::clone(&failures))?;
    info!(queue = %queue, images = plan.images.len(), "starting demo");

    let mut handles = Vec::with_capacity(plan.images.len());
    for image in &plan.images {
        let handle = fetch_and_display(
            dispatcher,
            &queue,
            Arc::clone(&fetcher),
            Arc::clone(&sink),
            image.as_str(),
        )
        .with_context(|| format!("failed to submit fetch of {image}"))?;
        handles.push(handle);
    }

    dispatcher
        .submit_main(|_| println!("UI Task Two"))
        .context("failed to submit UI task")?;

    dispatcher
        .shutdown_all(plan.drain)
        .context("dispatcher shutdown failed")?;

    let mut report = DemoReport {
        submitted: handles.len() as u64,
        ..DemoReport::default()
    };
    for handle in &handles {
        match handle.state() {
            TaskState::Completed => report.fetched += 1,
            TaskState::Failed(_) => report.failed += 1,
            TaskState::Cancelled => report.cancelled += 1,
            // Non-draining shutdown leaves running fetches to finish on their own.
            _ => {}
        }
    }
    info!(
        fetched = report.fetched,
        failed = report.failed,
        sink_failures = failures.load(Ordering::Relaxed),
        cancelled = report.cancelled,
        "demo finished"
    );
    Ok(report)
}
