//! Structured log events for retry loops
//!
//! Executors and the recovery manager report attempts through a
//! [`RetrySpan`] so every retry-related log line carries the same field
//! names: `target`, `operation_id`, `attempt`, `max_attempts`, `delay_ms`,
//! `error_kind`.

use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Log handle for one operation's retry loop
#[derive(Debug, Clone)]
pub struct RetrySpan {
    target: String,
    operation_id: String,
    max_attempts: u32,
}

impl RetrySpan {
    /// Start tracking an operation
    pub fn start(target: impl Into<String>, operation_id: impl Into<String>, max_attempts: u32) -> Self {
        let span = Self { target: target.into(), operation_id: operation_id.into(), max_attempts };
        debug!(
            target_id = %span.target,
            operation_id = %span.operation_id,
            max_attempts = span.max_attempts,
            "Starting sync operation"
        );
        span
    }

    /// Target the span is attached to
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Operation the span is attached to
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Record the start of an attempt
    pub fn record_attempt(&self, attempt: u32) {
        debug!(
            target_id = %self.target,
            operation_id = %self.operation_id,
            attempt,
            max_attempts = self.max_attempts,
            "Sync attempt"
        );
    }

    /// Record a retryable failure followed by a backoff sleep
    pub fn record_retry(&self, attempt: u32, error_kind: &str, delay: Duration) {
        warn!(
            target_id = %self.target,
            operation_id = %self.operation_id,
            attempt,
            max_attempts = self.max_attempts,
            error_kind,
            delay_ms = delay.as_millis(),
            "Sync attempt failed, retrying"
        );
    }

    /// Record a success
    pub fn record_success(&self, attempts: u32, elapsed: Duration) {
        info!(
            target_id = %self.target,
            operation_id = %self.operation_id,
            attempts,
            elapsed_ms = elapsed.as_millis(),
            "Sync operation succeeded"
        );
    }

    /// Record a non-retryable failure
    pub fn record_terminal(&self, attempt: u32, error_kind: &str, message: &str) {
        error!(
            target_id = %self.target,
            operation_id = %self.operation_id,
            attempt,
            error_kind,
            error = %message,
            "Sync operation failed with terminal error"
        );
    }

    /// Record that every local attempt was used
    pub fn record_exhausted(&self, error_kind: &str) {
        warn!(
            target_id = %self.target,
            operation_id = %self.operation_id,
            max_attempts = self.max_attempts,
            error_kind,
            "Retries exhausted, handing off to recovery"
        );
    }

    /// Record a short-circuit by an open breaker
    pub fn record_circuit_open(&self, retry_after: Option<Duration>) {
        warn!(
            target_id = %self.target,
            operation_id = %self.operation_id,
            retry_after_ms = retry_after.map(|d| d.as_millis()),
            "Circuit open, operation short-circuited"
        );
    }

    /// Record that the recovery ceiling was reached
    pub fn record_escalated(&self, recovery_attempts: u32, error_kind: &str) {
        error!(
            target_id = %self.target,
            operation_id = %self.operation_id,
            recovery_attempts,
            error_kind,
            "Recovery ceiling reached, operation escalated for manual intervention"
        );
    }
}
