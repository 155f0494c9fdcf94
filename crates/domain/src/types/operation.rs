//! Batches and per-target sync operations

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::target::TargetId;
use crate::constants::MAX_ERROR_MESSAGE_LENGTH;
use crate::impl_domain_status_conversions;

/// Unique identifier of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Time-ordered id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for OperationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Identifier of an ingestion batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for BatchId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Origin of an ingestion batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Rows read from a source database
    Database,
    /// Records pulled from an upstream API
    Api,
    /// Records parsed from an uploaded file
    File,
    /// Events consumed from a stream
    Stream,
}

impl_domain_status_conversions!(SourceType {
    Database => "database",
    Api => "api",
    File => "file",
    Stream => "stream",
});

/// Records produced by one ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier shared by every target's operation
    pub batch_id: BatchId,
    /// Where the records came from
    pub source_type: SourceType,
    /// Records to write
    pub records: Vec<serde_json::Value>,
    /// When the batch was assembled
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// New batch with a fresh id
    pub fn new(source_type: SourceType, records: Vec<serde_json::Value>) -> Self {
        Self { batch_id: BatchId::new(), source_type, records, created_at: Utc::now() }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lifecycle of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created, not yet attempted
    Pending,
    /// A write is under way
    InProgress,
    /// Every record was written
    Succeeded,
    /// Failed with a retryable error; recovery may pick it up
    FailedRetryable,
    /// Failed with an error retrying cannot fix
    FailedTerminal,
    /// Withdrawn before it finished
    Cancelled,
}

impl_domain_status_conversions!(SyncStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Succeeded => "succeeded",
    FailedRetryable => "failed_retryable",
    FailedTerminal => "failed_terminal",
    Cancelled => "cancelled",
});

impl SyncStatus {
    /// No further attempts will be made
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal | Self::Cancelled)
    }
}

/// Coarse error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retryable, contained by the core
    Transient,
    /// Not retryable, surfaced to the caller
    Terminal,
    /// Synthetic rejection from an open breaker
    CircuitOpen,
    /// Recovery ceiling exceeded
    Escalated,
    /// Withdrawn before completion
    Cancelled,
}

impl_domain_status_conversions!(ErrorClass {
    Transient => "transient",
    Terminal => "terminal",
    CircuitOpen => "circuit_open",
    Escalated => "escalated",
    Cancelled => "cancelled",
});

/// Specific failure kind, used as the `error_kind` metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Write exceeded its deadline
    Timeout,
    /// Connection dropped or refused
    ConnectionReset,
    /// Store or worker pool out of capacity
    ResourceExhausted,
    /// 5xx-class failure on the store side
    ServerError,
    /// Batch could not be encoded for the store
    MalformedPayload,
    /// Records rejected by the store schema
    SchemaViolation,
    /// Credentials rejected
    Authentication,
    /// 4xx-class failure other than authentication
    ClientError,
    /// Short-circuited by an open breaker
    CircuitOpen,
    /// Recovery ceiling reached
    Escalated,
    /// Operation withdrawn
    Cancelled,
}

impl_domain_status_conversions!(ErrorKind {
    Timeout => "timeout",
    ConnectionReset => "connection_reset",
    ResourceExhausted => "resource_exhausted",
    ServerError => "server_error",
    MalformedPayload => "malformed_payload",
    SchemaViolation => "schema_violation",
    Authentication => "authentication",
    ClientError => "client_error",
    CircuitOpen => "circuit_open",
    Escalated => "escalated",
    Cancelled => "cancelled",
});

impl ErrorKind {
    /// Retryable or terminal
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::Timeout | Self::ConnectionReset | Self::ResourceExhausted | Self::ServerError => {
                ErrorClass::Transient
            }
            Self::MalformedPayload
            | Self::SchemaViolation
            | Self::Authentication
            | Self::ClientError => ErrorClass::Terminal,
            Self::CircuitOpen => ErrorClass::CircuitOpen,
            Self::Escalated => ErrorClass::Escalated,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }
}

/// Last error recorded on an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    /// Classified kind
    pub kind: ErrorKind,
    /// Truncated error message
    pub message: String,
    /// When the failure happened
    pub occurred_at: DateTime<Utc>,
}

impl SyncFailure {
    /// Build a failure, truncating very long store messages
    pub fn new(kind: ErrorKind, message: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        let mut message: String = message.into();
        if message.chars().count() > MAX_ERROR_MESSAGE_LENGTH {
            message = message.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect();
        }
        Self { kind, message, occurred_at }
    }
}

/// One batch bound for one target
///
/// The batch is shared read-only between sibling operations of the same
/// ingestion run and released once the operation no longer needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique operation id
    pub operation_id: OperationId,
    /// Operation this one re-attempts on behalf of recovery
    pub parent_operation_id: Option<OperationId>,
    /// Batch this operation carries
    pub batch_id: BatchId,
    /// Where the batch came from
    pub source_type: SourceType,
    /// Target the batch is written to
    pub target_id: TargetId,
    /// Shared batch; `None` once released
    pub batch: Option<Arc<Batch>>,
    /// Current status
    pub status: SyncStatus,
    /// Store writes made so far
    pub attempt_count: u32,
    /// Records in the batch, kept after release
    pub record_count: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last write
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Most recent failure
    pub last_error: Option<SyncFailure>,
}

impl SyncOperation {
    /// New pending operation for `target_id`
    pub fn new(batch: Arc<Batch>, target_id: impl Into<TargetId>, created_at: DateTime<Utc>) -> Self {
        Self {
            operation_id: OperationId::new(),
            parent_operation_id: None,
            batch_id: batch.batch_id,
            source_type: batch.source_type,
            target_id: target_id.into(),
            record_count: batch.len(),
            batch: Some(batch),
            status: SyncStatus::Pending,
            attempt_count: 0,
            created_at,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Fresh operation re-attempting `parent` with a payload restored from
    /// durable storage
    pub fn retry_of(
        parent_id: OperationId,
        batch: Arc<Batch>,
        target_id: TargetId,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut op = Self::new(batch, target_id, created_at);
        op.parent_operation_id = Some(parent_id);
        op
    }

    /// Drop the payload reference
    pub fn release_batch(&mut self) -> Option<Arc<Batch>> {
        self.batch.take()
    }

    /// Store `failure` as the most recent error
    pub fn record_failure(&mut self, failure: SyncFailure) {
        self.last_error = Some(failure);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn batch() -> Arc<Batch> {
        Arc::new(Batch::new(SourceType::Api, vec![json!({"id": 1}), json!({"id": 2})]))
    }

    #[test]
    fn test_new_operation_is_pending() {
        let batch = batch();
        let op = SyncOperation::new(Arc::clone(&batch), "pg", Utc::now());
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.attempt_count, 0);
        assert_eq!(op.record_count, 2);
        assert_eq!(op.batch_id, batch.batch_id);
        assert!(op.parent_operation_id.is_none());
    }

    #[test]
    fn test_retry_of_links_parent() {
        let parent = SyncOperation::new(batch(), "ch", Utc::now());
        let retry = SyncOperation::retry_of(
            parent.operation_id,
            batch(),
            parent.target_id.clone(),
            Utc::now(),
        );
        assert_eq!(retry.parent_operation_id, Some(parent.operation_id));
        assert_ne!(retry.operation_id, parent.operation_id);
    }

    #[test]
    fn test_error_kind_classes() {
        assert_eq!(ErrorKind::Timeout.class(), ErrorClass::Transient);
        assert_eq!(ErrorKind::ServerError.class(), ErrorClass::Transient);
        assert_eq!(ErrorKind::SchemaViolation.class(), ErrorClass::Terminal);
        assert_eq!(ErrorKind::ClientError.class(), ErrorClass::Terminal);
        assert_eq!(ErrorKind::CircuitOpen.class(), ErrorClass::CircuitOpen);
    }

    #[test]
    fn test_failure_message_truncated() {
        let failure = SyncFailure::new(ErrorKind::ServerError, "x".repeat(2_000), Utc::now());
        assert_eq!(failure.message.len(), MAX_ERROR_MESSAGE_LENGTH);
    }

    #[test]
    fn test_final_statuses() {
        assert!(SyncStatus::Succeeded.is_final());
        assert!(SyncStatus::Cancelled.is_final());
        assert!(!SyncStatus::FailedRetryable.is_final());
        assert_eq!(SyncStatus::FailedRetryable.to_string(), "failed_retryable");
    }
}
