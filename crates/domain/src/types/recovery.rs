//! Recovery jobs and their terminal records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::{BatchId, OperationId, SourceType, SyncFailure};
use super::target::TargetId;
use crate::impl_domain_status_conversions;

/// Durable reference to a stored batch payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadHandle(String);

impl PayloadHandle {
    /// Wrap a store-specific handle
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Handle as stored
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An operation that exhausted its primary retries
///
/// `next_attempt_at` never moves backwards for the same job, and
/// `recovery_attempt_count` is independent of the operation's local
/// `attempt_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryJob {
    /// Operation being recovered
    pub operation_id: OperationId,
    /// Batch the operation carried
    pub batch_id: BatchId,
    /// Target to re-attempt
    pub target_id: TargetId,
    /// Where the batch came from
    pub source_type: SourceType,
    /// Where the batch is held until recovery finishes
    pub payload: PayloadHandle,
    /// Records in the batch
    pub record_count: usize,
    /// Recovery attempts made
    pub recovery_attempt_count: u32,
    /// Earliest time for the next attempt
    pub next_attempt_at: DateTime<Utc>,
    /// When the operation was handed over
    pub first_failed_at: DateTime<Utc>,
    /// Most recent failure
    pub last_error: Option<SyncFailure>,
    /// Set once the attempt ceiling is reached
    pub escalated: bool,
}

/// How a recovery job left the active schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// A recovery attempt succeeded
    Recovered,
    /// A recovery attempt hit a terminal error
    FailedTerminal,
    /// Attempt ceiling reached; waiting for an operator
    Escalated,
    /// Withdrawn by the caller
    Cancelled,
}

impl_domain_status_conversions!(RecoveryOutcome {
    Recovered => "recovered",
    FailedTerminal => "failed_terminal",
    Escalated => "escalated",
    Cancelled => "cancelled",
});

/// Audit record kept after a job leaves the schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Job as it was when it finished
    pub job: RecoveryJob,
    /// How it finished
    pub outcome: RecoveryOutcome,
    /// When it finished
    pub finished_at: DateTime<Utc>,
}

impl RecoveryRecord {
    /// Escalated records wait for an operator
    pub fn awaits_intervention(&self) -> bool {
        self.outcome == RecoveryOutcome::Escalated
    }
}

/// Where an operation currently sits in recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// Waiting for its next attempt
    Scheduled { job: RecoveryJob },
    /// Left the schedule
    Finished { record: RecoveryRecord },
}

/// Serializable image of the recovery table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    /// When the snapshot was taken
    pub taken_at: Option<DateTime<Utc>>,
    /// Scheduled and escalated jobs
    pub jobs: Vec<RecoveryJob>,
    /// Finished records still within retention
    pub records: Vec<RecoveryRecord>,
}

impl RecoverySnapshot {
    /// Whether the snapshot holds nothing
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.records.is_empty()
    }
}

/// Recovery counters for one target
///
/// Attempts that never reached the store (open circuit, failed preparation)
/// count as attempts and failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Recovery attempts, including ones skipped by a failed hook
    pub attempts: u64,
    /// Attempts that recovered the job
    pub successes: u64,
    /// Attempts that failed
    pub failures: u64,
    /// Jobs escalated after the ceiling
    pub escalations: u64,
    /// Time of the latest attempt
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RecoveryStats {
    /// Share of attempts that recovered their operation, 0.0 before any attempt
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RecoveryJob {
        let now = Utc::now();
        RecoveryJob {
            operation_id: OperationId::new(),
            batch_id: BatchId::new(),
            target_id: TargetId::new("clickhouse"),
            source_type: SourceType::Stream,
            payload: PayloadHandle::new("batch-1"),
            record_count: 10,
            recovery_attempt_count: 0,
            next_attempt_at: now,
            first_failed_at: now,
            last_error: None,
            escalated: false,
        }
    }

    #[test]
    fn test_snapshot_serde_preserves_jobs() {
        let snapshot = RecoverySnapshot {
            taken_at: Some(Utc::now()),
            jobs: vec![job()],
            records: vec![RecoveryRecord {
                job: job(),
                outcome: RecoveryOutcome::Escalated,
                finished_at: Utc::now(),
            }],
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: RecoverySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
        assert!(back.records[0].awaits_intervention());
    }

    #[test]
    fn test_status_is_tagged() {
        let status = RecoveryStatus::Scheduled { job: job() };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "scheduled");
        assert_eq!(json["job"]["payload"], "batch-1");
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(RecoveryStats::default().success_rate(), 0.0);
        let stats = RecoveryStats { attempts: 4, successes: 1, failures: 3, ..RecoveryStats::default() };
        assert!((stats.success_rate() - 0.25).abs() < f64::EPSILON);
    }
}
