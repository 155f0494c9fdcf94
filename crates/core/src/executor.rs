//! Sync operation executor
//!
//! Runs one operation against one target: worker-pool admission, breaker
//! admission, a deadline per write, and a bounded local retry loop. Operations
//! that exhaust their retries or hit an open breaker are handed to the
//! recovery manager; terminal failures are returned to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use stratasync_common::error::CommonError;
use stratasync_common::{RetrySpan, SharedClock};
use stratasync_domain::{
    BatchId, ErrorKind, OperationId, SyncFailure, SyncOperation, SyncStatus, TargetId,
};
use tracing::{debug, instrument};

use crate::clock::utc_now;
use crate::errors::{StoreError, SyncError, SyncResult};
use crate::metrics::SyncMetrics;
use crate::recovery::{RecoveryManager, SubmitOutcome};
use crate::registry::{TargetEntry, TargetRegistry};

/// Result of executing one operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Operation that was executed
    pub operation_id: OperationId,
    /// Operation this one re-attempted, for recovery runs
    pub parent_operation_id: Option<OperationId>,
    /// Batch the operation carried
    pub batch_id: BatchId,
    /// Target written to
    pub target_id: TargetId,
    /// Final status
    pub status: SyncStatus,
    /// Store writes made
    pub attempts: u32,
    /// Error from the last failed write
    pub last_error: Option<SyncFailure>,
    /// Set when the operation was handed to recovery
    pub recovery: Option<SubmitOutcome>,
    /// Wall time spent, serialized in milliseconds
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl SyncReport {
    /// Whether the operation succeeded
    pub fn succeeded(&self) -> bool {
        self.status == SyncStatus::Succeeded
    }

    /// Failure kind of the last attempt, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.last_error.as_ref().map(|failure| failure.kind)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

/// How the local retry loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopOutcome {
    Succeeded,
    Terminal,
    Exhausted,
    ShortCircuited,
    PoolUnavailable,
    Cancelled,
}

impl LoopOutcome {
    fn needs_recovery(self) -> bool {
        matches!(self, Self::Exhausted | Self::ShortCircuited | Self::PoolUnavailable)
    }
}

/// Executes sync operations against registered targets
pub struct SyncOperationExecutor {
    registry: Arc<TargetRegistry>,
    recovery: Option<Arc<RecoveryManager>>,
    metrics: SyncMetrics,
    clock: SharedClock,
}

impl std::fmt::Debug for SyncOperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOperationExecutor")
            .field("registry", &self.registry)
            .field("recovery", &self.recovery.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncOperationExecutor {
    /// Create an executor without recovery handoff
    pub fn new(registry: Arc<TargetRegistry>, metrics: SyncMetrics, clock: SharedClock) -> Self {
        Self { registry, recovery: None, metrics, clock }
    }

    /// Hand exhausted and short-circuited operations to `recovery`
    #[must_use]
    pub fn with_recovery(mut self, recovery: Arc<RecoveryManager>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Targets this executor writes to
    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Recovery manager failed operations are handed to, if attached
    pub fn recovery(&self) -> Option<&Arc<RecoveryManager>> {
        self.recovery.as_ref()
    }

    /// Execute an operation, handing it to recovery when it cannot complete now
    ///
    /// Returns `succeeded`, `failed_retryable` (pending in recovery) or
    /// `failed_terminal`. Errors are reserved for unknown targets, missing
    /// payloads and payload-store failures during handoff.
    #[instrument(skip(self, operation), fields(target_id = %operation.target_id, operation_id = %operation.operation_id))]
    pub async fn execute(&self, mut operation: SyncOperation) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let outcome = self.run(&mut operation).await?;

        let recovery = match &self.recovery {
            Some(recovery) if outcome.needs_recovery() => Some(recovery.submit(&operation).await?),
            Some(recovery) if outcome == LoopOutcome::Succeeded => {
                recovery.mark_delivered(operation.operation_id);
                None
            }
            _ => None,
        };

        operation.release_batch();
        Ok(self.finish(operation, recovery, started))
    }

    /// Run the local retry loop without any recovery handoff
    ///
    /// The recovery manager re-attempts jobs through this entry point.
    pub async fn attempt(&self, mut operation: SyncOperation) -> SyncResult<SyncReport> {
        let started = Instant::now();
        self.run(&mut operation).await?;
        operation.release_batch();
        Ok(self.finish(operation, None, started))
    }

    fn finish(
        &self,
        operation: SyncOperation,
        recovery: Option<SubmitOutcome>,
        started: Instant,
    ) -> SyncReport {
        let elapsed = started.elapsed();
        self.metrics.operation(&operation.target_id, operation.status);
        if operation.attempt_count > 0 {
            self.metrics.duration(&operation.target_id, elapsed);
        }

        SyncReport {
            operation_id: operation.operation_id,
            parent_operation_id: operation.parent_operation_id,
            batch_id: operation.batch_id,
            target_id: operation.target_id,
            status: operation.status,
            attempts: operation.attempt_count,
            last_error: operation.last_error,
            recovery,
            elapsed,
        }
    }

    async fn run(&self, operation: &mut SyncOperation) -> SyncResult<LoopOutcome> {
        let entry = self.registry.get(&operation.target_id)?;
        let batch = operation
            .batch
            .clone()
            .ok_or(SyncError::MissingPayload(operation.operation_id))?;

        let span = RetrySpan::start(
            operation.target_id.as_str(),
            operation.operation_id.to_string(),
            entry.retry().max_attempts(),
        );

        // Held for the whole loop, including backoff sleeps
        let _slot = match entry.pool().acquire().await {
            Ok(slot) => slot,
            Err(err) => return Ok(self.pool_unavailable(operation, &err)),
        };

        let started = Instant::now();
        loop {
            if operation.attempt_count >= entry.retry().max_attempts() {
                // Re-executed after an earlier exhaustion; no write budget left
                let kind = operation.last_error.as_ref().map_or("unknown", |e| e.kind.as_str());
                span.record_exhausted(kind);
                operation.status = SyncStatus::FailedRetryable;
                self.metrics.retry_exhausted(&operation.target_id);
                return Ok(LoopOutcome::Exhausted);
            }

            let permit = match entry.breaker().try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    span.record_circuit_open(open.retry_after);
                    self.fail(operation, ErrorKind::CircuitOpen, open.to_string(), SyncStatus::FailedRetryable);
                    return Ok(LoopOutcome::ShortCircuited);
                }
            };

            operation.attempt_count += 1;
            operation.status = SyncStatus::InProgress;
            operation.last_attempt_at = Some(utc_now(self.clock.as_ref()));
            span.record_attempt(operation.attempt_count);

            match write_with_deadline(&entry, &batch).await {
                Ok(ack) => {
                    permit.success();
                    operation.status = SyncStatus::Succeeded;
                    self.metrics.records_processed(&operation.target_id, ack.records_written);
                    span.record_success(operation.attempt_count, started.elapsed());
                    return Ok(LoopOutcome::Succeeded);
                }
                Err(err) => {
                    let kind = err.kind();
                    let message = err.to_string();

                    if !entry.retry().is_retryable(&err) {
                        permit.neutral();
                        span.record_terminal(operation.attempt_count, kind.as_str(), &message);
                        self.fail(operation, kind, message, SyncStatus::FailedTerminal);
                        return Ok(LoopOutcome::Terminal);
                    }

                    permit.failure();
                    self.fail(operation, kind, message, SyncStatus::FailedRetryable);

                    if !entry.retry().should_retry(operation.attempt_count, &err) {
                        span.record_exhausted(kind.as_str());
                        self.metrics.retry_exhausted(&operation.target_id);
                        return Ok(LoopOutcome::Exhausted);
                    }

                    let delay = entry.retry().next_delay(operation.attempt_count);
                    span.record_retry(operation.attempt_count, kind.as_str(), delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn pool_unavailable(&self, operation: &mut SyncOperation, err: &CommonError) -> LoopOutcome {
        if matches!(err, CommonError::TaskCancelled { .. }) {
            debug!(target_id = %operation.target_id, "Worker pool closed, operation cancelled");
            self.fail(operation, ErrorKind::Cancelled, err.to_string(), SyncStatus::Cancelled);
            return LoopOutcome::Cancelled;
        }
        self.fail(
            operation,
            ErrorKind::ResourceExhausted,
            err.to_string(),
            SyncStatus::FailedRetryable,
        );
        LoopOutcome::PoolUnavailable
    }

    fn fail(&self, operation: &mut SyncOperation, kind: ErrorKind, message: String, status: SyncStatus) {
        self.metrics.error(&operation.target_id, kind);
        operation.status = status;
        operation.record_failure(SyncFailure::new(kind, message, utc_now(self.clock.as_ref())));
    }
}

async fn write_with_deadline(
    entry: &TargetEntry,
    batch: &stratasync_domain::Batch,
) -> Result<crate::ports::WriteAck, StoreError> {
    let deadline = entry.retry().attempt_timeout();
    match tokio::time::timeout(deadline, entry.client().write(batch)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}
