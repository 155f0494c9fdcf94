//! Core domain types

pub mod operation;
pub mod recovery;
pub mod target;

pub use operation::{
    Batch, BatchId, ErrorClass, ErrorKind, OperationId, SourceType, SyncFailure, SyncOperation,
    SyncStatus,
};
pub use recovery::{
    PayloadHandle, RecoveryJob, RecoveryOutcome, RecoveryRecord, RecoverySnapshot, RecoveryStats,
    RecoveryStatus,
};
pub use target::{Target, TargetHealth, TargetId, TargetKind};
