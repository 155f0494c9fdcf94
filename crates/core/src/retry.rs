//! Local retry decisions for one operation

use std::time::Duration;

use stratasync_common::error::ErrorClassification;
use stratasync_common::{ExponentialBackoff, Jitter};
use stratasync_domain::RetrySettings;

use crate::errors::SyncResult;

/// Bounded retry with full-jitter exponential backoff
///
/// `next_delay(n)` sleeps `uniform(0, min(max, base * multiplier^(n-1)))`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is raised to at least one
    pub fn new(backoff: ExponentialBackoff, max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self { backoff, max_attempts: max_attempts.max(1), attempt_timeout }
    }

    /// Build from per-kind settings
    pub fn from_settings(settings: &RetrySettings) -> SyncResult<Self> {
        let backoff = ExponentialBackoff::new(
            settings.base_delay(),
            settings.max_delay(),
            settings.multiplier,
        )?
        .with_jitter(Jitter::Full);
        Ok(Self::new(backoff, settings.max_attempts, settings.attempt_timeout()))
    }

    /// Store writes allowed per operation, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deadline applied to each store write
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Backoff between local attempts
    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// Jittered sleep after the given 1-based attempt failed
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Whether `error` is worth another attempt
    pub fn is_retryable<E: ErrorClassification + ?Sized>(&self, error: &E) -> bool {
        error.is_retryable()
    }

    /// Whether another local attempt is allowed after `attempt` failed with `error`
    pub fn should_retry<E: ErrorClassification + ?Sized>(&self, attempt: u32, error: &E) -> bool {
        attempt < self.max_attempts && self.is_retryable(error)
    }
}
