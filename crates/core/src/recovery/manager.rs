//! Recovery manager
//!
//! Holds operations that exhausted their local retries (or were short-circuited
//! by an open breaker) and re-attempts them on a longer horizon. The job table
//! has its own lock and is never held across an await point or together with
//! a breaker lock.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stratasync_common::{ExponentialBackoff, Jitter, RetrySpan, SharedClock};
use stratasync_domain::{
    BatchId, ErrorKind, OperationId, RecoveryJob, RecoveryOutcome, RecoveryRecord,
    RecoverySettings, RecoverySnapshot, RecoveryStats, RecoveryStatus, SyncFailure, SyncOperation,
    SyncStatus, TargetId, TargetKind,
};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{chrono_duration, utc_now};
use crate::errors::{SyncError, SyncResult};
use crate::executor::{SyncOperationExecutor, SyncReport};
use crate::metrics::SyncMetrics;
use crate::ports::{PayloadStore, RecoveryHook};

/// What `submit` did with an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// A new job was created
    Scheduled { next_attempt_at: DateTime<Utc> },
    /// A job for this operation already exists
    AlreadyScheduled,
    /// The operation already succeeded; nothing to do
    AlreadySucceeded,
    /// Terminal, cancelled or already finished operations are not recoverable
    NotRecoverable,
}

/// Counts from one `tick`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Jobs picked up this tick
    pub due: usize,
    /// Jobs that succeeded
    pub recovered: usize,
    /// Jobs scheduled for another attempt
    pub rescheduled: usize,
    /// Jobs that hit the attempt ceiling
    pub escalated: usize,
    /// Jobs finished by a terminal error
    pub failed_terminal: usize,
    /// Records dropped after the retention window
    pub purged: usize,
}

#[derive(Debug, Default)]
struct RecoveryTable {
    jobs: HashMap<OperationId, RecoveryJob>,
    records: HashMap<OperationId, RecoveryRecord>,
    in_flight: HashSet<OperationId>,
    /// Operations the executor delivered directly, with delivery time
    delivered: HashMap<OperationId, DateTime<Utc>>,
    stats: HashMap<TargetId, RecoveryStats>,
}

impl RecoveryTable {
    fn escalated_for(&self, target: &TargetId) -> usize {
        self.records
            .values()
            .filter(|record| record.awaits_intervention() && &record.job.target_id == target)
            .count()
    }

    fn finish(&mut self, mut job: RecoveryJob, outcome: RecoveryOutcome, at: DateTime<Utc>) {
        self.in_flight.remove(&job.operation_id);
        job.escalated = outcome == RecoveryOutcome::Escalated;
        self.records.insert(job.operation_id, RecoveryRecord { job, outcome, finished_at: at });
    }
}

/// What one recovery attempt produced
enum AttemptResult {
    Ran(SyncReport),
    /// Never reached the store; still counts towards the ceiling
    NotRun(Option<SyncFailure>),
    Unrecoverable(SyncFailure),
}

/// Result of applying one recovery attempt to the table
enum Applied {
    Recovered(RecoveryJob),
    Terminal(RecoveryJob),
    Rescheduled,
    Escalated(RecoveryJob),
    Gone,
}

/// Tracks recovery jobs and re-attempts them through the executor
pub struct RecoveryManager {
    settings: RecoverySettings,
    backoff: ExponentialBackoff,
    table: Mutex<RecoveryTable>,
    payloads: Arc<dyn PayloadStore>,
    hooks: HashMap<TargetKind, Arc<dyn RecoveryHook>>,
    metrics: SyncMetrics,
    clock: SharedClock,
}

impl fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

impl RecoveryManager {
    /// Create a manager with no hooks
    ///
    /// Fails when the recovery backoff settings are invalid.
    pub fn new(
        settings: RecoverySettings,
        payloads: Arc<dyn PayloadStore>,
        metrics: SyncMetrics,
        clock: SharedClock,
    ) -> SyncResult<Self> {
        let backoff =
            ExponentialBackoff::new(settings.base_delay(), settings.max_delay(), settings.multiplier)?
                .with_jitter(Jitter::Full);
        Ok(Self {
            settings,
            backoff,
            table: Mutex::new(RecoveryTable::default()),
            payloads,
            hooks: HashMap::new(),
            metrics,
            clock,
        })
    }

    /// Run `hook` before every recovery attempt on targets of `kind`
    #[must_use]
    pub fn with_hook(mut self, kind: TargetKind, hook: Arc<dyn RecoveryHook>) -> Self {
        self.hooks.insert(kind, hook);
        self
    }

    /// Settings this manager was built with
    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        utc_now(self.clock.as_ref())
    }

    /// Accept an operation for recovery
    ///
    /// The first attempt is scheduled `base_delay` from now. Submitting the
    /// same operation again, or one that already succeeded, changes nothing.
    #[instrument(skip(self, operation), fields(target_id = %operation.target_id, operation_id = %operation.operation_id))]
    pub async fn submit(&self, operation: &SyncOperation) -> SyncResult<SubmitOutcome> {
        match operation.status {
            SyncStatus::Succeeded => {
                debug!("Operation already succeeded, ignoring recovery submission");
                return Ok(SubmitOutcome::AlreadySucceeded);
            }
            SyncStatus::FailedTerminal | SyncStatus::Cancelled => {
                return Ok(SubmitOutcome::NotRecoverable);
            }
            SyncStatus::Pending | SyncStatus::InProgress | SyncStatus::FailedRetryable => {}
        }

        if let Some(existing) = self.existing_outcome(&operation.operation_id) {
            return Ok(existing);
        }

        let batch = operation
            .batch
            .clone()
            .ok_or(SyncError::MissingPayload(operation.operation_id))?;
        let payload = self.payloads.put(operation.operation_id, batch).await?;

        let now = self.now();
        let next_attempt_at = now + chrono_duration(self.settings.base_delay());
        let job = RecoveryJob {
            operation_id: operation.operation_id,
            batch_id: operation.batch_id,
            target_id: operation.target_id.clone(),
            source_type: operation.source_type,
            payload,
            record_count: operation.record_count,
            recovery_attempt_count: 0,
            next_attempt_at,
            first_failed_at: operation.last_error.as_ref().map_or(now, |e| e.occurred_at),
            last_error: operation.last_error.clone(),
            escalated: false,
        };

        let depth = {
            let mut table = self.table.lock();
            if table.jobs.contains_key(&job.operation_id) {
                return Ok(SubmitOutcome::AlreadyScheduled);
            }
            table.jobs.insert(job.operation_id, job);
            table.jobs.len()
        };
        self.metrics.recovery_queue_depth(depth);

        info!(
            next_attempt_at = %next_attempt_at,
            error_kind = operation.last_error.as_ref().map(|e| e.kind.as_str()),
            "Operation scheduled for recovery"
        );
        Ok(SubmitOutcome::Scheduled { next_attempt_at })
    }

    fn existing_outcome(&self, operation_id: &OperationId) -> Option<SubmitOutcome> {
        let table = self.table.lock();
        if table.jobs.contains_key(operation_id) {
            return Some(SubmitOutcome::AlreadyScheduled);
        }
        if table.delivered.contains_key(operation_id) {
            return Some(SubmitOutcome::AlreadySucceeded);
        }
        table.records.get(operation_id).map(|record| match record.outcome {
            RecoveryOutcome::Recovered => SubmitOutcome::AlreadySucceeded,
            _ => SubmitOutcome::NotRecoverable,
        })
    }

    /// Re-attempt every due job through `executor`
    ///
    /// Due jobs run concurrently, each as a fresh operation that re-enters the
    /// target's breaker. Expired audit records are purged first.
    pub async fn tick(&self, executor: &SyncOperationExecutor) -> TickSummary {
        let mut summary = TickSummary { purged: self.purge_expired(), ..TickSummary::default() };

        let due = self.take_due();
        summary.due = due.len();
        if due.is_empty() {
            return summary;
        }
        debug!(due = due.len(), "Recovery tick");

        let results = join_all(due.into_iter().map(|job| self.recover_one(job, executor))).await;
        for applied in results {
            match applied {
                Applied::Recovered(job) => {
                    summary.recovered += 1;
                    self.release_payload(&job).await;
                }
                Applied::Terminal(job) => {
                    summary.failed_terminal += 1;
                    self.release_payload(&job).await;
                }
                Applied::Rescheduled => summary.rescheduled += 1,
                Applied::Escalated(_) => summary.escalated += 1,
                Applied::Gone => {}
            }
        }

        self.metrics.recovery_queue_depth(self.queue_depth());
        summary
    }

    fn take_due(&self) -> Vec<RecoveryJob> {
        let now = self.now();
        let mut table = self.table.lock();
        let mut due: Vec<RecoveryJob> = table
            .jobs
            .values()
            .filter(|job| job.next_attempt_at <= now && !table.in_flight.contains(&job.operation_id))
            .cloned()
            .collect();
        due.sort_by_key(|job| job.next_attempt_at);
        due.truncate(self.settings.max_due_per_tick);
        for job in &due {
            table.in_flight.insert(job.operation_id);
        }
        due
    }

    async fn recover_one(&self, job: RecoveryJob, executor: &SyncOperationExecutor) -> Applied {
        self.metrics.recovery_attempt(&job.target_id);
        let started = Instant::now();

        if let Err(failure) = self.prepare_target(&job, executor).await {
            return self.apply(&job, AttemptResult::NotRun(Some(failure)), started);
        }

        let batch = match self.payloads.get(&job.payload).await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                error!(
                    target_id = %job.target_id,
                    operation_id = %job.operation_id,
                    payload = %job.payload,
                    "Recovery payload missing, job cannot be retried"
                );
                let failure = SyncFailure::new(ErrorKind::MalformedPayload, "payload missing", self.now());
                return self.apply(&job, AttemptResult::Unrecoverable(failure), started);
            }
            Err(err) => {
                warn!(target_id = %job.target_id, operation_id = %job.operation_id, error = %err, "Failed to load recovery payload");
                return self.apply(&job, AttemptResult::NotRun(None), started);
            }
        };

        let operation = SyncOperation::retry_of(job.operation_id, batch, job.target_id.clone(), self.now());
        match executor.attempt(operation).await {
            Ok(report) => self.apply(&job, AttemptResult::Ran(report), started),
            Err(err) => {
                warn!(target_id = %job.target_id, operation_id = %job.operation_id, error = %err, "Recovery attempt could not run");
                self.apply(&job, AttemptResult::NotRun(None), started)
            }
        }
    }

    /// Run the hook registered for the job's target kind, if any
    async fn prepare_target(
        &self,
        job: &RecoveryJob,
        executor: &SyncOperationExecutor,
    ) -> Result<(), SyncFailure> {
        if self.hooks.is_empty() {
            return Ok(());
        }
        let Ok(entry) = executor.registry().get(&job.target_id) else {
            return Ok(());
        };
        let Some(hook) = self.hooks.get(&entry.target().kind) else {
            return Ok(());
        };

        hook.prepare(entry.target()).await.map_err(|err| {
            let kind = err.kind();
            warn!(
                target_id = %job.target_id,
                operation_id = %job.operation_id,
                error_kind = kind.as_str(),
                error = %err,
                "Recovery preparation failed, attempt skipped"
            );
            self.metrics.error(&job.target_id, kind);
            SyncFailure::new(kind, err.to_string(), self.now())
        })
    }

    /// Fold one attempt into the table
    ///
    /// Unrecoverable results finish the job as terminal; everything else
    /// either recovers it or counts one attempt towards the ceiling.
    fn apply(&self, attempted: &RecoveryJob, result: AttemptResult, started: Instant) -> Applied {
        let target = attempted.target_id.clone();
        self.metrics.recovery_duration(&target, started.elapsed());
        let now = self.now();

        let mut table = self.table.lock();
        table.in_flight.remove(&attempted.operation_id);
        let stats = table.stats.entry(target.clone()).or_default();
        stats.attempts += 1;
        stats.last_attempt_at = Some(now);

        let Some(mut job) = table.jobs.remove(&attempted.operation_id) else {
            debug!(operation_id = %attempted.operation_id, "Recovery job withdrawn while in flight");
            return Applied::Gone;
        };

        let report = match result {
            AttemptResult::Unrecoverable(failure) => {
                job.last_error = Some(failure);
                table.stats.entry(target).or_default().failures += 1;
                table.finish(job.clone(), RecoveryOutcome::FailedTerminal, now);
                return Applied::Terminal(job);
            }
            AttemptResult::NotRun(failure) => {
                if failure.is_some() {
                    job.last_error = failure;
                }
                None
            }
            AttemptResult::Ran(report) => Some(report),
        };

        if let Some(report) = &report {
            match report.status {
                SyncStatus::Succeeded => {
                    table.stats.entry(target.clone()).or_default().successes += 1;
                    job.recovery_attempt_count += 1;
                    table.finish(job.clone(), RecoveryOutcome::Recovered, now);
                    drop(table);
                    self.metrics.recovery_success(&target);
                    info!(
                        target_id = %target,
                        operation_id = %job.operation_id,
                        recovery_attempts = job.recovery_attempt_count,
                        "Operation recovered"
                    );
                    return Applied::Recovered(job);
                }
                SyncStatus::FailedTerminal => {
                    table.stats.entry(target.clone()).or_default().failures += 1;
                    job.recovery_attempt_count += 1;
                    job.last_error = report.last_error.clone();
                    table.finish(job.clone(), RecoveryOutcome::FailedTerminal, now);
                    drop(table);
                    error!(
                        target_id = %target,
                        operation_id = %job.operation_id,
                        error_kind = report.error_kind().map(|kind| kind.as_str()),
                        "Recovery hit a terminal error"
                    );
                    return Applied::Terminal(job);
                }
                SyncStatus::Cancelled => {
                    // Pool closed during shutdown; try again next time
                    table.jobs.insert(job.operation_id, job);
                    return Applied::Rescheduled;
                }
                SyncStatus::Pending | SyncStatus::InProgress | SyncStatus::FailedRetryable => {
                    if report.last_error.is_some() {
                        job.last_error = report.last_error.clone();
                    }
                }
            }
        }

        job.recovery_attempt_count += 1;
        let stats = table.stats.entry(target.clone()).or_default();
        stats.failures += 1;
        if job.recovery_attempt_count >= self.settings.max_attempts {
            stats.escalations += 1;
            table.finish(job.clone(), RecoveryOutcome::Escalated, now);
            let escalated = table.escalated_for(&target);
            drop(table);

            let kind = job.last_error.as_ref().map_or("unknown", |e| e.kind.as_str());
            RetrySpan::start(target.as_str(), job.operation_id.to_string(), self.settings.max_attempts)
                .record_escalated(job.recovery_attempt_count, kind);
            self.metrics.escalation(&target);
            self.metrics.escalated_jobs(&target, escalated);
            return Applied::Escalated(job);
        }

        let delay = self.backoff.delay(job.recovery_attempt_count + 1);
        let next = now + chrono_duration(delay);
        job.next_attempt_at = next.max(job.next_attempt_at);
        debug!(
            target_id = %target,
            operation_id = %job.operation_id,
            recovery_attempt = job.recovery_attempt_count,
            next_attempt_at = %job.next_attempt_at,
            "Recovery attempt failed, rescheduled"
        );
        table.jobs.insert(job.operation_id, job);
        Applied::Rescheduled
    }

    async fn release_payload(&self, job: &RecoveryJob) {
        if let Err(err) = self.payloads.release(&job.payload).await {
            warn!(operation_id = %job.operation_id, payload = %job.payload, error = %err, "Failed to release payload");
        }
    }

    /// Withdraw a scheduled job; returns false when nothing was scheduled
    pub async fn cancel(&self, operation_id: OperationId) -> bool {
        let job = {
            let mut table = self.table.lock();
            let Some(job) = table.jobs.remove(&operation_id) else {
                return false;
            };
            table.finish(job.clone(), RecoveryOutcome::Cancelled, self.now());
            job
        };
        self.after_cancel(&job).await;
        true
    }

    /// Withdraw every scheduled job that came from `batch_id`
    pub async fn cancel_batch(&self, batch_id: BatchId) -> usize {
        let cancelled: Vec<RecoveryJob> = {
            let now = self.now();
            let mut table = self.table.lock();
            let ids: Vec<OperationId> = table
                .jobs
                .values()
                .filter(|job| job.batch_id == batch_id)
                .map(|job| job.operation_id)
                .collect();
            let mut cancelled = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(job) = table.jobs.remove(&id) {
                    table.finish(job.clone(), RecoveryOutcome::Cancelled, now);
                    cancelled.push(job);
                }
            }
            cancelled
        };
        for job in &cancelled {
            self.after_cancel(job).await;
        }
        if !cancelled.is_empty() {
            info!(batch_id = %batch_id, cancelled = cancelled.len(), "Batch withdrawn from recovery");
        }
        cancelled.len()
    }

    async fn after_cancel(&self, job: &RecoveryJob) {
        self.metrics.operation(&job.target_id, SyncStatus::Cancelled);
        self.metrics.recovery_queue_depth(self.queue_depth());
        info!(target_id = %job.target_id, operation_id = %job.operation_id, "Recovery job cancelled");
        self.release_payload(job).await;
    }

    /// Active job or terminal record for an operation
    pub fn status(&self, operation_id: &OperationId) -> Option<RecoveryStatus> {
        let table = self.table.lock();
        if let Some(job) = table.jobs.get(operation_id) {
            return Some(RecoveryStatus::Scheduled { job: job.clone() });
        }
        table
            .records
            .get(operation_id)
            .map(|record| RecoveryStatus::Finished { record: record.clone() })
    }

    /// Escalated records awaiting manual intervention, oldest first
    pub fn escalated(&self) -> Vec<RecoveryRecord> {
        let table = self.table.lock();
        let mut records: Vec<RecoveryRecord> =
            table.records.values().filter(|r| r.awaits_intervention()).cloned().collect();
        records.sort_by_key(|record| record.finished_at);
        records
    }

    /// Scheduled jobs ordered by next attempt
    pub fn pending(&self) -> Vec<RecoveryJob> {
        let table = self.table.lock();
        let mut jobs: Vec<RecoveryJob> = table.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.next_attempt_at);
        jobs
    }

    /// Clear an escalated record once an operator has dealt with it
    pub async fn acknowledge(&self, operation_id: &OperationId) -> bool {
        let (record, remaining) = {
            let mut table = self.table.lock();
            match table.records.get(operation_id) {
                Some(record) if record.awaits_intervention() => {}
                _ => return false,
            }
            let Some(record) = table.records.remove(operation_id) else {
                return false;
            };
            let remaining = table.escalated_for(&record.job.target_id);
            (record, remaining)
        };
        self.metrics.escalated_jobs(&record.job.target_id, remaining);
        info!(
            target_id = %record.job.target_id,
            operation_id = %operation_id,
            "Escalated recovery job acknowledged"
        );
        self.release_payload(&record.job).await;
        true
    }

    /// Drop audit records older than the retention window
    ///
    /// Escalated records stay until acknowledged.
    pub fn purge_expired(&self) -> usize {
        let cutoff = self.now() - chrono_duration(self.settings.retention());
        let mut table = self.table.lock();
        let before = table.records.len();
        table.records.retain(|_, record| record.awaits_intervention() || record.finished_at >= cutoff);
        table.delivered.retain(|_, delivered_at| *delivered_at >= cutoff);
        let purged = before - table.records.len();
        if purged > 0 {
            debug!(purged, "Purged expired recovery records");
        }
        purged
    }

    /// Remember that the executor delivered `operation_id` directly
    ///
    /// A later submission of the same operation is then a no-op. Entries
    /// expire with the retention window.
    pub fn mark_delivered(&self, operation_id: OperationId) {
        let now = self.now();
        self.table.lock().delivered.insert(operation_id, now);
    }

    /// Per-target recovery counters, ordered by target id
    pub fn stats(&self) -> Vec<(TargetId, RecoveryStats)> {
        let table = self.table.lock();
        let mut stats: Vec<(TargetId, RecoveryStats)> =
            table.stats.iter().map(|(target, stats)| (target.clone(), *stats)).collect();
        stats.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        stats
    }

    /// Recovery counters for one target; zeroed when it never needed recovery
    pub fn stats_for(&self, target_id: &TargetId) -> RecoveryStats {
        self.table.lock().stats.get(target_id).copied().unwrap_or_default()
    }

    /// Number of scheduled jobs
    pub fn queue_depth(&self) -> usize {
        self.table.lock().jobs.len()
    }

    /// Serializable copy of jobs and records
    pub fn snapshot(&self) -> RecoverySnapshot {
        let table = self.table.lock();
        let mut jobs: Vec<RecoveryJob> = table.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.next_attempt_at);
        let mut records: Vec<RecoveryRecord> = table.records.values().cloned().collect();
        records.sort_by_key(|record| record.finished_at);
        RecoverySnapshot { taken_at: Some(self.now()), jobs, records }
    }

    /// Load jobs and records from a snapshot, skipping ids already present
    ///
    /// Returns the number of jobs restored.
    pub fn restore(&self, snapshot: RecoverySnapshot) -> usize {
        let (restored, depth, targets) = {
            let mut table = self.table.lock();
            let mut restored = 0;
            for job in snapshot.jobs {
                if table.records.contains_key(&job.operation_id) {
                    continue;
                }
                if let std::collections::hash_map::Entry::Vacant(slot) = table.jobs.entry(job.operation_id) {
                    slot.insert(job);
                    restored += 1;
                }
            }
            for record in snapshot.records {
                if table.jobs.contains_key(&record.job.operation_id) {
                    continue;
                }
                table.records.entry(record.job.operation_id).or_insert(record);
            }

            let targets: HashSet<TargetId> = table
                .records
                .values()
                .filter(|record| record.awaits_intervention())
                .map(|record| record.job.target_id.clone())
                .collect();
            let targets: Vec<(TargetId, usize)> = targets
                .into_iter()
                .map(|target| {
                    let count = table.escalated_for(&target);
                    (target, count)
                })
                .collect();
            (restored, table.jobs.len(), targets)
        };

        self.metrics.recovery_queue_depth(depth);
        for (target, count) in targets {
            self.metrics.escalated_jobs(&target, count);
        }
        info!(restored, queue_depth = depth, "Recovery state restored");
        restored
    }

    /// Time until the earliest scheduled attempt, if any
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = self.now();
        let table = self.table.lock();
        table
            .jobs
            .values()
            .map(|job| job.next_attempt_at)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the recovery job table
    //!
    //! End-to-end recovery through the executor is covered in
    //! `tests/sync_scenarios.rs`.

    use serde_json::json;
    use stratasync_common::MockClock;
    use stratasync_domain::{Batch, SourceType};

    use super::*;
    use crate::metrics::{InMemoryMetricsSink, SYNC_ESCALATED_JOBS, SYNC_RECOVERY_QUEUE_DEPTH};
    use crate::payload::InMemoryPayloadStore;

    struct Fixture {
        clock: MockClock,
        sink: Arc<InMemoryMetricsSink>,
        payloads: Arc<InMemoryPayloadStore>,
        manager: RecoveryManager,
    }

    fn fixture() -> Fixture {
        let clock = MockClock::new();
        let sink = Arc::new(InMemoryMetricsSink::new());
        let payloads = Arc::new(InMemoryPayloadStore::new());
        let manager = RecoveryManager::new(
            RecoverySettings::default(),
            payloads.clone(),
            SyncMetrics::new(sink.clone()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        Fixture { clock, sink, payloads, manager }
    }

    fn failed_operation(target: &str) -> SyncOperation {
        let batch = Arc::new(Batch::new(SourceType::Api, vec![json!({"id": 7})]));
        let mut op = SyncOperation::new(batch, target, Utc::now());
        op.status = SyncStatus::FailedRetryable;
        op.attempt_count = 3;
        op
    }

    /// Validates `RecoveryManager::submit` behavior for the first submission
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the job is due one base delay (60s) from now.
    /// - Ensures the payload is stored under a durable handle.
    #[tokio::test]
    async fn test_submit_schedules_after_base_delay() {
        let fx = fixture();
        let op = failed_operation("pg");
        let now = utc_now(&fx.clock);

        let outcome = fx.manager.submit(&op).await.unwrap();

        let SubmitOutcome::Scheduled { next_attempt_at } = outcome else {
            panic!("expected a scheduled job, got {outcome:?}");
        };
        assert_eq!(next_attempt_at - now, chrono::Duration::seconds(60));
        assert_eq!(fx.manager.queue_depth(), 1);
        assert_eq!(fx.payloads.len(), 1);
        assert_eq!(fx.sink.gauge(SYNC_RECOVERY_QUEUE_DEPTH, &[]), Some(1.0));

        let Some(RecoveryStatus::Scheduled { job }) = fx.manager.status(&op.operation_id) else {
            panic!("job should be scheduled");
        };
        assert_eq!(job.recovery_attempt_count, 0);
        assert!(!job.escalated);
    }

    /// Validates `RecoveryManager::submit` behavior for the repeated and
    /// already-succeeded submission scenarios.
    ///
    /// Assertions:
    /// - Ensures a second submission does not create another job.
    /// - Ensures succeeded and terminal operations are ignored.
    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let fx = fixture();
        let op = failed_operation("pg");

        fx.manager.submit(&op).await.unwrap();
        assert_eq!(fx.manager.submit(&op).await.unwrap(), SubmitOutcome::AlreadyScheduled);

        let mut done = failed_operation("pg");
        done.status = SyncStatus::Succeeded;
        assert_eq!(fx.manager.submit(&done).await.unwrap(), SubmitOutcome::AlreadySucceeded);

        let mut terminal = failed_operation("pg");
        terminal.status = SyncStatus::FailedTerminal;
        assert_eq!(fx.manager.submit(&terminal).await.unwrap(), SubmitOutcome::NotRecoverable);

        assert_eq!(fx.manager.queue_depth(), 1);
    }

    /// Validates `RecoveryManager::mark_delivered` behavior for the directly
    /// delivered operation scenario.
    ///
    /// Assertions:
    /// - Ensures a delivered operation is not scheduled again.
    /// - Confirms the marker expires with the retention window.
    #[tokio::test]
    async fn test_delivered_operation_is_not_rescheduled() {
        let fx = fixture();
        let mut op = failed_operation("pg");
        op.status = SyncStatus::Pending;
        fx.manager.mark_delivered(op.operation_id);

        assert_eq!(fx.manager.submit(&op).await.unwrap(), SubmitOutcome::AlreadySucceeded);
        assert_eq!(fx.manager.queue_depth(), 0);
        assert!(fx.payloads.is_empty());

        fx.clock.advance(fx.manager.settings().retention() + Duration::from_secs(1));
        fx.manager.purge_expired();
        assert!(matches!(fx.manager.submit(&op).await.unwrap(), SubmitOutcome::Scheduled { .. }));
    }

    #[tokio::test]
    async fn test_cancel_removes_job_and_payload() {
        let fx = fixture();
        let op = failed_operation("pg");
        fx.manager.submit(&op).await.unwrap();

        assert!(fx.manager.cancel(op.operation_id).await);
        assert!(!fx.manager.cancel(op.operation_id).await);
        assert_eq!(fx.manager.queue_depth(), 0);
        assert!(fx.payloads.is_empty());

        let Some(RecoveryStatus::Finished { record }) = fx.manager.status(&op.operation_id) else {
            panic!("cancelled job should leave a record");
        };
        assert_eq!(record.outcome, RecoveryOutcome::Cancelled);
        assert_eq!(fx.manager.submit(&op).await.unwrap(), SubmitOutcome::NotRecoverable);
    }

    #[tokio::test]
    async fn test_cancel_batch_only_touches_that_batch() {
        let fx = fixture();
        let batch = Arc::new(Batch::new(SourceType::File, vec![json!({"row": 1})]));
        for target in ["pg", "ch", "influx"] {
            let mut op = SyncOperation::new(Arc::clone(&batch), target, Utc::now());
            op.status = SyncStatus::FailedRetryable;
            fx.manager.submit(&op).await.unwrap();
        }
        fx.manager.submit(&failed_operation("pg")).await.unwrap();

        assert_eq!(fx.manager.cancel_batch(batch.batch_id).await, 3);
        assert_eq!(fx.manager.queue_depth(), 1);
    }

    /// Validates `RecoveryManager::purge_expired` behavior for the retention
    /// window scenario.
    ///
    /// Assertions:
    /// - Ensures cancelled records are dropped after 24h.
    /// - Ensures escalated records survive until acknowledged.
    #[tokio::test]
    async fn test_purge_keeps_escalated_until_acknowledged() {
        let fx = fixture();
        let cancelled = failed_operation("pg");
        fx.manager.submit(&cancelled).await.unwrap();
        fx.manager.cancel(cancelled.operation_id).await;

        let escalated_op = failed_operation("ch");
        fx.manager.submit(&escalated_op).await.unwrap();
        let mut snapshot = fx.manager.snapshot();
        let job = snapshot.jobs.pop().unwrap();
        fx.manager.cancel(escalated_op.operation_id).await;

        let mut record_job = job.clone();
        record_job.escalated = true;
        let other = fixture();
        other
            .manager
            .restore(RecoverySnapshot {
                taken_at: None,
                jobs: vec![],
                records: vec![RecoveryRecord {
                    job: record_job,
                    outcome: RecoveryOutcome::Escalated,
                    finished_at: utc_now(&other.clock),
                }],
            });
        assert_eq!(other.manager.escalated().len(), 1);
        assert_eq!(other.sink.gauge(SYNC_ESCALATED_JOBS, &[("target", "ch")]), Some(1.0));

        fx.clock.advance(Duration::from_secs(25 * 3600));
        other.clock.advance(Duration::from_secs(25 * 3600));
        assert_eq!(fx.manager.purge_expired(), 2);
        assert_eq!(other.manager.purge_expired(), 0);

        assert!(other.manager.acknowledge(&job.operation_id).await);
        assert!(other.manager.escalated().is_empty());
        assert!(!other.manager.acknowledge(&job.operation_id).await);
        assert_eq!(other.sink.gauge(SYNC_ESCALATED_JOBS, &[("target", "ch")]), Some(0.0));
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let fx = fixture();
        let first = failed_operation("pg");
        let second = failed_operation("ch");
        fx.manager.submit(&first).await.unwrap();
        fx.manager.submit(&second).await.unwrap();

        let snapshot = fx.manager.snapshot();
        assert_eq!(snapshot.jobs.len(), 2);

        let restored = fixture();
        assert_eq!(restored.manager.restore(snapshot.clone()), 2);
        assert_eq!(restored.manager.restore(snapshot), 0);
        assert_eq!(restored.manager.queue_depth(), 2);
        assert_eq!(restored.manager.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_next_due_in() {
        let fx = fixture();
        assert!(fx.manager.next_due_in().is_none());
        fx.manager.submit(&failed_operation("pg")).await.unwrap();
        assert_eq!(fx.manager.next_due_in(), Some(Duration::from_secs(60)));
        fx.clock.advance(Duration::from_secs(90));
        assert_eq!(fx.manager.next_due_in(), Some(Duration::ZERO));
    }
}
