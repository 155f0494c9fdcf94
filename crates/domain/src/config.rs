//! Configuration management
//!
//! Durations are stored as milliseconds so the same structs load from TOML,
//! JSON and environment overrides without a custom serde format.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::{Result, StratasyncError};
use crate::types::{Target, TargetKind};

/// Top-level synchronization configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Targets to register
    pub targets: Vec<Target>,
    /// Local retry settings
    pub retry: RetryPolicies,
    /// Circuit breaker settings
    pub breaker: BreakerPolicies,
    /// Worker pool bounds
    pub pools: PoolPolicies,
    /// Recovery schedule
    pub recovery: RecoverySettings,
    /// Log output
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Validate every section and the target list
    pub fn validate(&self) -> Result<()> {
        for kind in TargetKind::ALL {
            self.retry.for_kind(kind).validate(kind)?;
            self.breaker.for_kind(kind).validate(kind)?;
            self.pools.for_kind(kind).validate(kind)?;
        }
        self.recovery.validate()?;

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.target_id.as_str().trim().is_empty() {
                return Err(StratasyncError::Config("target id must not be empty".into()));
            }
            if target.endpoint.trim().is_empty() {
                return Err(StratasyncError::Config(format!(
                    "target '{}' has an empty endpoint",
                    target.target_id
                )));
            }
            if !seen.insert(target.target_id.clone()) {
                return Err(StratasyncError::Config(format!(
                    "duplicate target id '{}'",
                    target.target_id
                )));
            }
        }
        Ok(())
    }
}

/// Local retry settings for one target kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Store writes per operation, including the first
    pub max_attempts: u32,
    /// Delay after the first failed write
    pub base_delay_ms: u64,
    /// Cap for the backoff delay
    pub max_delay_ms: u64,
    /// Backoff growth factor
    pub multiplier: f64,
    /// Deadline for a single store write
    pub attempt_timeout_ms: u64,
}

impl RetrySettings {
    /// Defaults with a different attempt count
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// `base_delay_ms` as a duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// `max_delay_ms` as a duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// `attempt_timeout_ms` as a duration
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    fn validate(&self, kind: TargetKind) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(config_err(kind, "retry.max_attempts must be greater than 0"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(config_err(kind, "retry.base_delay_ms cannot exceed retry.max_delay_ms"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(config_err(kind, "retry.multiplier must be a finite value >= 1.0"));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(config_err(kind, "retry.attempt_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
        }
    }
}

/// Circuit breaker settings for one target kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Half-open successes that close the circuit
    pub success_threshold: u32,
    /// Window in which consecutive failures must accumulate
    pub failure_window_ms: u64,
    /// Initial time spent open
    pub open_duration_ms: u64,
    /// Cap for the doubled open duration after repeated re-opens
    pub max_open_duration_ms: u64,
}

impl BreakerSettings {
    /// `failure_window_ms` as a duration
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    /// `open_duration_ms` as a duration
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    /// `max_open_duration_ms` as a duration
    pub fn max_open_duration(&self) -> Duration {
        Duration::from_millis(self.max_open_duration_ms)
    }

    fn validate(&self, kind: TargetKind) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(config_err(kind, "breaker.failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(config_err(kind, "breaker.success_threshold must be greater than 0"));
        }
        if self.open_duration_ms == 0 {
            return Err(config_err(kind, "breaker.open_duration_ms must be greater than 0"));
        }
        if self.open_duration_ms > self.max_open_duration_ms {
            return Err(config_err(
                kind,
                "breaker.open_duration_ms cannot exceed breaker.max_open_duration_ms",
            ));
        }
        Ok(())
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            failure_window_ms: DEFAULT_FAILURE_WINDOW_MS,
            open_duration_ms: DEFAULT_OPEN_DURATION_MS,
            max_open_duration_ms: DEFAULT_MAX_OPEN_DURATION_MS,
        }
    }
}

/// Worker pool bounds for one target kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Concurrent writes allowed
    pub max_concurrent: usize,
    /// Wait limit for a worker slot; `None` waits indefinitely
    pub acquire_timeout_ms: Option<u64>,
}

impl PoolSettings {
    /// Pool of `max_concurrent` slots without an acquire timeout
    pub fn sized(max_concurrent: usize) -> Self {
        Self { max_concurrent, acquire_timeout_ms: None }
    }

    /// `acquire_timeout_ms` as a duration
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self, kind: TargetKind) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(config_err(kind, "pools.max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::sized(DEFAULT_POOL_SIZE)
    }
}

/// Longer-horizon recovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Scheduler cadence
    pub tick_interval_ms: u64,
    /// Delay before the first recovery attempt
    pub base_delay_ms: u64,
    /// Cap for the recovery delay
    pub max_delay_ms: u64,
    /// Recovery backoff growth factor
    pub multiplier: f64,
    /// Recovery attempts before a job is escalated
    pub max_attempts: u32,
    /// How long terminal records are kept for audit
    pub retention_ms: u64,
    /// Upper bound on jobs re-attempted in one tick
    pub max_due_per_tick: usize,
}

impl RecoverySettings {
    /// `tick_interval_ms` as a duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// `base_delay_ms` as a duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// `max_delay_ms` as a duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// `retention_ms` as a duration
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(StratasyncError::Config(
                "recovery.tick_interval_ms must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(StratasyncError::Config(
                "recovery.max_attempts must be greater than 0".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(StratasyncError::Config(
                "recovery.base_delay_ms cannot exceed recovery.max_delay_ms".into(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(StratasyncError::Config(
                "recovery.multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.max_due_per_tick == 0 {
            return Err(StratasyncError::Config(
                "recovery.max_due_per_tick must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_RECOVERY_TICK_MS,
            base_delay_ms: DEFAULT_RECOVERY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RECOVERY_MAX_DELAY_MS,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            max_attempts: DEFAULT_RECOVERY_MAX_ATTEMPTS,
            retention_ms: DEFAULT_RECOVERY_RETENTION_MS,
            max_due_per_tick: DEFAULT_RECOVERY_MAX_DUE_PER_TICK,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// Retry settings keyed by target kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    /// Relational stores
    pub relational: RetrySettings,
    /// Analytical stores
    pub analytical: RetrySettings,
    /// Time-series stores
    pub time_series: RetrySettings,
    /// Other stores
    pub custom: RetrySettings,
}

impl RetryPolicies {
    /// Settings for `kind`
    pub fn for_kind(&self, kind: TargetKind) -> &RetrySettings {
        match kind {
            TargetKind::Relational => &self.relational,
            TargetKind::Analytical => &self.analytical,
            TargetKind::TimeSeries => &self.time_series,
            TargetKind::Custom => &self.custom,
        }
    }

    /// Mutable settings for `kind`
    pub fn for_kind_mut(&mut self, kind: TargetKind) -> &mut RetrySettings {
        match kind {
            TargetKind::Relational => &mut self.relational,
            TargetKind::Analytical => &mut self.analytical,
            TargetKind::TimeSeries => &mut self.time_series,
            TargetKind::Custom => &mut self.custom,
        }
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            relational: RetrySettings::with_max_attempts(DEFAULT_RELATIONAL_MAX_ATTEMPTS),
            analytical: RetrySettings::default(),
            time_series: RetrySettings::default(),
            custom: RetrySettings::default(),
        }
    }
}

/// Breaker settings keyed by target kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerPolicies {
    /// Relational stores
    pub relational: BreakerSettings,
    /// Analytical stores
    pub analytical: BreakerSettings,
    /// Time-series stores
    pub time_series: BreakerSettings,
    /// Other stores
    pub custom: BreakerSettings,
}

impl BreakerPolicies {
    /// Settings for `kind`
    pub fn for_kind(&self, kind: TargetKind) -> &BreakerSettings {
        match kind {
            TargetKind::Relational => &self.relational,
            TargetKind::Analytical => &self.analytical,
            TargetKind::TimeSeries => &self.time_series,
            TargetKind::Custom => &self.custom,
        }
    }

    /// Mutable settings for `kind`
    pub fn for_kind_mut(&mut self, kind: TargetKind) -> &mut BreakerSettings {
        match kind {
            TargetKind::Relational => &mut self.relational,
            TargetKind::Analytical => &mut self.analytical,
            TargetKind::TimeSeries => &mut self.time_series,
            TargetKind::Custom => &mut self.custom,
        }
    }
}

/// Worker pool sizes keyed by target kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolPolicies {
    /// Relational stores
    pub relational: PoolSettings,
    /// Analytical stores
    pub analytical: PoolSettings,
    /// Time-series stores
    pub time_series: PoolSettings,
    /// Other stores
    pub custom: PoolSettings,
}

impl PoolPolicies {
    /// Settings for `kind`
    pub fn for_kind(&self, kind: TargetKind) -> &PoolSettings {
        match kind {
            TargetKind::Relational => &self.relational,
            TargetKind::Analytical => &self.analytical,
            TargetKind::TimeSeries => &self.time_series,
            TargetKind::Custom => &self.custom,
        }
    }

    /// Mutable settings for `kind`
    pub fn for_kind_mut(&mut self, kind: TargetKind) -> &mut PoolSettings {
        match kind {
            TargetKind::Relational => &mut self.relational,
            TargetKind::Analytical => &mut self.analytical,
            TargetKind::TimeSeries => &mut self.time_series,
            TargetKind::Custom => &mut self.custom,
        }
    }
}

impl Default for PoolPolicies {
    fn default() -> Self {
        Self {
            relational: PoolSettings::sized(DEFAULT_RELATIONAL_POOL_SIZE),
            analytical: PoolSettings::default(),
            time_series: PoolSettings::default(),
            custom: PoolSettings::default(),
        }
    }
}

fn config_err(kind: TargetKind, message: &str) -> StratasyncError {
    StratasyncError::Config(format!("{kind}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.for_kind(TargetKind::Relational).max_attempts, 3);
        assert_eq!(config.retry.for_kind(TargetKind::Analytical).max_attempts, 5);
        assert_eq!(config.retry.for_kind(TargetKind::TimeSeries).max_attempts, 5);
        assert_eq!(config.recovery.tick_interval(), Duration::from_secs(10));
        assert_eq!(config.recovery.max_delay(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let mut config = SyncConfig::default();
        config.targets.push(Target::new("pg", TargetKind::Relational, "postgres://a"));
        config.targets.push(Target::new("pg", TargetKind::Relational, "postgres://b"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate target id 'pg'"));
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let mut config = SyncConfig::default();
        config.targets.push(Target::new("ch", TargetKind::Analytical, "  "));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = SyncConfig::default();
        config.breaker.for_kind_mut(TargetKind::TimeSeries).failure_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("time_series"));
    }

    #[test]
    fn test_base_above_max_rejected() {
        let mut config = SyncConfig::default();
        config.retry.relational.base_delay_ms = 60_000;
        config.retry.relational.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [[targets]]
            target_id = "influx"
            kind = "time_series"
            endpoint = "http://influx:8086"

            [retry.time_series]
            max_attempts = 7

            [recovery]
            max_attempts = 3
        "#;
        let config: SyncConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.retry.time_series.max_attempts, 7);
        assert_eq!(config.retry.time_series.base_delay_ms, DEFAULT_RETRY_BASE_DELAY_MS);
        assert_eq!(config.retry.relational.max_attempts, 3);
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.recovery.base_delay_ms, DEFAULT_RECOVERY_BASE_DELAY_MS);
        assert!(config.validate().is_ok());
    }
}
