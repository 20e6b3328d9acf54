//! Upload Retry Logic
//!
//! Transient transport failures are retried on a fixed backoff schedule.
//! Exhausting the schedule is fatal for the session.

use std::time::Duration;

use crate::upload::error::UploadError;

/// Default wait before each attempt, in seconds
pub const DEFAULT_RETRY_DELAYS_SECS: [u64; 5] = [0, 3, 5, 10, 20];

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Wait before attempt `n` is `delays[n]`; one attempt per entry
    pub delays: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_RETRY_DELAYS_SECS)
    }
}

impl RetryConfig {
    /// Create a schedule from whole seconds
    pub fn from_secs(delays: &[u64]) -> Self {
        Self {
            delays: delays.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    /// Total attempts allowed before a session gives up
    pub fn max_attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    /// Wait before the given attempt, `None` once the schedule is exhausted
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        Some(self.delays.get(attempt).copied().unwrap_or_default())
    }
}

/// Check if an error is retryable
pub fn is_retryable_error(error: &UploadError) -> bool {
    match error {
        // Transport errors are retryable
        UploadError::Transfer(_) => true,
        UploadError::Http(e) => !e.is_builder() && !e.is_decode(),
        // Local file errors, validation and control flow are not
        _ => false,
    }
}
