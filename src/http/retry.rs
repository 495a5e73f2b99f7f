//! Retry policy for transient fetch failures.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;

use crate::settings::RetrySettings;

const BACKOFF_BASE_SECS: f64 = 0.5;
const BACKOFF_CAP_SECS: f64 = 30.0;

/// Decides whether and when a failed request is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    statuses: HashSet<u16>,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            statuses: settings.statuses.iter().copied().collect(),
        }
    }

    /// Whether a response status warrants another attempt.
    pub fn should_retry_status(&self, attempt: u32, status: u16) -> bool {
        attempt < self.max_retries && self.statuses.contains(&status)
    }

    /// Whether a connection or timeout error warrants another attempt.
    pub fn should_retry_error(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Exponential backoff with jitter for the given attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = BACKOFF_CAP_SECS.min(BACKOFF_BASE_SECS * 2f64.powi(attempt as i32));
        let jittered = delay * rand::thread_rng().gen_range(0.7..1.3);
        Duration::from_secs_f64(jittered)
    }
}
