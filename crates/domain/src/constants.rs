//! Application constants
//!
//! Defaults for retry, breaker, recovery and pool settings. Durations are in
//! milliseconds to match the serialized configuration.

// Local retry (per operation)
/// Local attempts for relational targets
pub const DEFAULT_RELATIONAL_MAX_ATTEMPTS: u32 = 3;
/// Local attempts for every other kind
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Delay after the first failed write
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
/// Cap for the local backoff delay
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
/// Local backoff growth factor
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Deadline for one store write
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;

// Circuit breaker
/// Consecutive failures that open a breaker
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Half-open successes that close a breaker
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
/// Window for counting consecutive failures
pub const DEFAULT_FAILURE_WINDOW_MS: u64 = 60_000;
/// Initial open duration
pub const DEFAULT_OPEN_DURATION_MS: u64 = 30_000;
/// Cap for the doubled open duration
pub const DEFAULT_MAX_OPEN_DURATION_MS: u64 = 300_000;

// Recovery
/// Recovery scheduler cadence
pub const DEFAULT_RECOVERY_TICK_MS: u64 = 10_000;
/// Delay before the first recovery attempt
pub const DEFAULT_RECOVERY_BASE_DELAY_MS: u64 = 60_000;
/// Cap for the recovery delay
pub const DEFAULT_RECOVERY_MAX_DELAY_MS: u64 = 1_800_000;
/// Recovery attempts before escalation
pub const DEFAULT_RECOVERY_MAX_ATTEMPTS: u32 = 5;
/// Retention for finished recovery records
pub const DEFAULT_RECOVERY_RETENTION_MS: u64 = 86_400_000;
/// Jobs re-attempted per tick
pub const DEFAULT_RECOVERY_MAX_DUE_PER_TICK: usize = 256;

// Worker pools
/// Worker slots for relational targets
pub const DEFAULT_RELATIONAL_POOL_SIZE: usize = 8;
/// Worker slots for every other kind
pub const DEFAULT_POOL_SIZE: usize = 4;

// Error messages stored on operations are truncated to this many characters
/// Stored error messages are truncated to this many characters
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 512;
