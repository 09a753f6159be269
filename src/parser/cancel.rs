//! Cooperative cancellation for long scans.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::DatasetError;

/// How often scanning loops poll the token, in rows.
pub const CANCEL_CHECK_INTERVAL: usize = 10_000;

/// Shared flag plus an optional deadline. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that trips once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns the matching error once cancelled or past the deadline.
    pub fn check(&self) -> Result<(), DatasetError> {
        if self.is_cancelled() {
            return Err(DatasetError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(DatasetError::TimedOut),
            _ => Ok(()),
        }
    }

    /// Polls only every [`CANCEL_CHECK_INTERVAL`] rows.
    pub fn check_every(&self, row: usize) -> Result<(), DatasetError> {
        if row % CANCEL_CHECK_INTERVAL == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert!(matches!(clone.check(), Err(DatasetError::Cancelled)));
    }

    #[test]
    fn test_elapsed_deadline_times_out() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(matches!(token.check(), Err(DatasetError::TimedOut)));
    }

    #[test]
    fn test_check_every_skips_between_intervals() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.check_every(1).is_ok());
        assert!(token.check_every(CANCEL_CHECK_INTERVAL).is_err());
    }
}
