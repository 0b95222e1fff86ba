//! Cooperative cancellation.
//!
//! Running tasks are never preempted. A task that wants to stop early polls
//! its [`CancelToken`], usually through [`CancelToken::check`] and `?`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Returned by [`CancelToken::check`] once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task cancelled")]
pub struct Cancelled;

/// Shared cancellation flag for a single task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());

        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.check(), Err(Cancelled));
    }

    #[test]
    fn check_works_with_anyhow() {
        fn poll(token: &CancelToken) -> anyhow::Result<u32> {
            token.check()?;
            Ok(1)
        }
        let token = CancelToken::new();
        assert_eq!(poll(&token).unwrap(), 1);
        token.cancel();
        assert_eq!(poll(&token).unwrap_err().to_string(), "task cancelled");
    }
}
