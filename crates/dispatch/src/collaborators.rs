//! Narrow interfaces to the outside world.
//!
//! The dispatcher never fetches or renders anything itself. Callers plug in a
//! [`ResourceFetcher`] (run as the body of a background task) and a
//! [`DisplaySink`] (run only inside a main-queue continuation).

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tracing::debug;

use crate::continuation::Target;
use crate::dispatcher::{Dispatcher, QueueHandle};
use crate::error::DispatchError;
use crate::task::TaskHandle;

/// Loads a resource by id. Called on a background worker; may block.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, resource_id: &str) -> anyhow::Result<Bytes>;
}

/// Presents fetched bytes. Only ever called on the main queue.
pub trait DisplaySink: Send + Sync {
    fn display(&self, resource_id: &str, bytes: &[u8]);
}

/// Fetch `resource_id` on `queue`, then display it from the main queue.
///
/// Returns the handle of the fetch task. A failed or cancelled fetch never
/// reaches the sink; the failure goes to `queue`'s error sink instead.
pub fn fetch_and_display(
    dispatcher: &Dispatcher,
    queue: &QueueHandle,
    fetcher: Arc<dyn ResourceFetcher>,
    sink: Arc<dyn DisplaySink>,
    resource_id: impl Into<String>,
) -> Result<TaskHandle, DispatchError> {
    let resource_id = resource_id.into();
    let display_id = resource_id.clone();

    dispatcher.submit_then(
        queue,
        move |ctx| {
            ctx.cancel_token().check()?;
            let bytes = fetcher
                .fetch(&resource_id)
                .with_context(|| format!("fetching {resource_id}"))?;
            debug!(task = %ctx.task_id(), resource = %resource_id, len = bytes.len(), "resource fetched");
            Ok(bytes)
        },
        Target::Main,
        move |_ctx, bytes: Bytes| {
            sink.display(&display_id, &bytes);
            Ok(())
        },
    )
}
