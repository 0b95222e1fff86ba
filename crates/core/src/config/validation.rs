use super::types::{DispatchConfig, QueueMode};
use crate::error::ConfigError;

impl DispatchConfig {
    /// Validate the config: limits, depths and queue names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_defaults()?;
        self.validate_queues()?;
        Ok(())
    }

    fn validate_defaults(&self) -> Result<(), ConfigError> {
        if self.default_concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "default_concurrency_limit must be at least 1".into(),
            ));
        }
        if self.max_queue_depth == Some(0) {
            return Err(ConfigError::Invalid(
                "max_queue_depth must be at least 1 (omit it for unbounded)".into(),
            ));
        }
        if self.main_queue.trim().is_empty() {
            return Err(ConfigError::Invalid("main_queue must not be empty".into()));
        }
        Ok(())
    }

    /// Ensure declared queues don't shadow the main queue and carry sane limits.
    fn validate_queues(&self) -> Result<(), ConfigError> {
        for (name, queue) in &self.queues {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("queue names must not be empty".into()));
            }
            if *name == self.main_queue {
                return Err(ConfigError::Invalid(format!(
                    "queue '{name}' collides with the main queue"
                )));
            }
            match (queue.mode, queue.concurrency) {
                (_, Some(0)) => {
                    return Err(ConfigError::Invalid(format!(
                        "queue '{name}' concurrency must be at least 1"
                    )));
                }
                (QueueMode::Serial, Some(n)) if n > 1 => {
                    return Err(ConfigError::Invalid(format!(
                        "serial queue '{name}' cannot have concurrency {n}"
                    )));
                }
                _ => {}
            }
            if queue.max_depth == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "queue '{name}' max_depth must be at least 1"
                )));
            }
        }
        Ok(())
    }
}
