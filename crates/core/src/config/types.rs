use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Queue mode ──────────────────────────────────────────────────────

/// Execution discipline of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// One task at a time; tasks start and finish in submission order.
    Serial,
    /// Up to `concurrency` tasks in flight; tasks start in submission order only.
    Concurrent,
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueMode::Serial => write!(f, "serial"),
            QueueMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for a dispatcher.
///
/// Parsed from `quay.toml` with support for environment variable overrides.
/// Declares the main queue name, defaults applied to every background queue,
/// and optionally the background queues to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker count for concurrent queues created without an explicit limit.
    #[serde(default = "default_concurrency_limit")]
    pub default_concurrency_limit: usize,

    /// Pending-task cap applied to queues without their own `max_depth`.
    /// `None` means unbounded.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,

    /// Name of the process-wide serial queue.
    #[serde(default = "default_main_queue")]
    pub main_queue: String,

    /// Prefix for worker thread names (`{prefix}-main`, `{prefix}-bg-{queue}`).
    #[serde(default = "default_thread_prefix")]
    pub thread_prefix: String,

    /// Background queues created by `Dispatcher::from_config`.
    #[serde(default)]
    pub queues: BTreeMap<String, QueueConfig>,
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_main_queue() -> String {
    "main".into()
}

fn default_thread_prefix() -> String {
    "quay".into()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency_limit: default_concurrency_limit(),
            max_queue_depth: None,
            main_queue: default_main_queue(),
            thread_prefix: default_thread_prefix(),
            queues: BTreeMap::new(),
        }
    }
}

impl DispatchConfig {
    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Dispatch config loaded:");
        tracing::info!("  main queue:         {}", self.main_queue);
        tracing::info!("  default concurrency: {}", self.default_concurrency_limit);
        tracing::info!(
            "  max queue depth:    {}",
            self.max_queue_depth
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unbounded".into())
        );
        for (name, queue) in &self.queues {
            tracing::info!(
                "  queue {:<12} mode={}, concurrency={}",
                name,
                queue.mode,
                queue.resolved_concurrency(self)
            );
        }
    }

    /// Return the config as JSON (for `--print-config` style output).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "main_queue": self.main_queue,
            "default_concurrency_limit": self.default_concurrency_limit,
            "max_queue_depth": self.max_queue_depth,
            "thread_prefix": self.thread_prefix,
            "queues": self.queues,
        })
    }
}

// ── Queue declarations ──────────────────────────────────────────────

/// A background queue declared in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub mode: QueueMode,

    /// Worker count for concurrent queues (defaults to `default_concurrency_limit`).
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Pending-task cap (defaults to `max_queue_depth`).
    #[serde(default)]
    pub max_depth: Option<usize>,
}

impl QueueConfig {
    pub fn serial() -> Self {
        Self {
            mode: QueueMode::Serial,
            concurrency: None,
            max_depth: None,
        }
    }

    pub fn concurrent(limit: usize) -> Self {
        Self {
            mode: QueueMode::Concurrent,
            concurrency: Some(limit),
            max_depth: None,
        }
    }

    /// Effective worker count: always 1 for serial queues.
    pub fn resolved_concurrency(&self, defaults: &DispatchConfig) -> usize {
        match self.mode {
            QueueMode::Serial => 1,
            QueueMode::Concurrent => self
                .concurrency
                .unwrap_or(defaults.default_concurrency_limit),
        }
    }

    /// Effective pending-task cap.
    pub fn resolved_max_depth(&self, defaults: &DispatchConfig) -> Option<usize> {
        self.max_depth.or(defaults.max_queue_depth)
    }
}
