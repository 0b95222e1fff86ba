use std::path::Path;

use crate::error::ConfigError;

use super::types::DispatchConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl DispatchConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from defaults plus environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `QUAY_KEY` overrides the top-level `key`.
    /// - `QUAY_DEFAULT_CONCURRENCY_LIMIT` -> `default_concurrency_limit`
    /// - `QUAY_MAX_QUEUE_DEPTH` -> `max_queue_depth` (`unbounded` or empty clears it)
    /// - `QUAY_MAIN_QUEUE` -> `main_queue`
    /// - `QUAY_THREAD_PREFIX` -> `thread_prefix`
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable numbers are
    /// logged and ignored.
    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("QUAY_DEFAULT_CONCURRENCY_LIMIT") {
            match v.trim().parse::<usize>() {
                Ok(limit) => self.default_concurrency_limit = limit,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid QUAY_DEFAULT_CONCURRENCY_LIMIT"),
            }
        }
        if let Some(v) = lookup("QUAY_MAX_QUEUE_DEPTH") {
            let v = v.trim();
            if v.is_empty() || v.eq_ignore_ascii_case("unbounded") {
                self.max_queue_depth = None;
            } else {
                match v.parse::<usize>() {
                    Ok(depth) => self.max_queue_depth = Some(depth),
                    Err(_) => tracing::warn!(value = %v, "ignoring invalid QUAY_MAX_QUEUE_DEPTH"),
                }
            }
        }
        if let Some(v) = lookup("QUAY_MAIN_QUEUE") {
            self.main_queue = v;
        }
        if let Some(v) = lookup("QUAY_THREAD_PREFIX") {
            self.thread_prefix = v;
        }
    }
}
