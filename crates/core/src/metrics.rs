//! Metric names and the recording facade used by the executor, registry and
//! recovery manager
//!
//! Every metric carries a `target` label except the recovery queue depth.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stratasync_common::CircuitState;
use stratasync_domain::{ErrorKind, SyncStatus, TargetId};

use crate::ports::MetricsSink;

/// Operations by target and final status
pub const SYNC_OPERATIONS_TOTAL: &str = "sync_operations_total";
/// Failed writes by target and error kind
pub const SYNC_ERRORS_TOTAL: &str = "sync_errors_total";
/// Records written by target
pub const SYNC_RECORDS_PROCESSED_TOTAL: &str = "sync_records_processed_total";
/// Operations that used up their local attempts
pub const SYNC_RETRY_EXHAUSTIONS_TOTAL: &str = "sync_retry_exhaustions_total";
/// Recovery attempts by target
pub const SYNC_RECOVERY_ATTEMPTS_TOTAL: &str = "sync_recovery_attempts_total";
/// Recovered jobs by target
pub const SYNC_RECOVERY_SUCCESS_TOTAL: &str = "sync_recovery_success_total";
/// Jobs escalated after the recovery ceiling
pub const SYNC_ESCALATIONS_TOTAL: &str = "sync_escalations_total";
/// Operation wall time
pub const SYNC_DURATION_SECONDS: &str = "sync_duration_seconds";
/// Recovery attempt wall time
pub const SYNC_RECOVERY_DURATION_SECONDS: &str = "sync_recovery_duration_seconds";
/// Escalated jobs awaiting acknowledgement
pub const SYNC_ESCALATED_JOBS: &str = "sync_escalated_jobs";
/// Scheduled recovery jobs
pub const SYNC_RECOVERY_QUEUE_DEPTH: &str = "sync_recovery_queue_depth";
/// Breaker state: 0 closed, 1 half-open, 2 open
pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";
/// Breaker transitions by target and edge
pub const CIRCUIT_BREAKER_TRANSITIONS_TOTAL: &str = "circuit_breaker_transitions_total";

/// Typed recording helpers over a [`MetricsSink`]
#[derive(Clone)]
pub struct SyncMetrics {
    sink: Arc<dyn MetricsSink>,
}

impl fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncMetrics").finish_non_exhaustive()
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new(Arc::new(NoopMetricsSink))
    }
}

impl SyncMetrics {
    /// Wrap `sink`
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// Count a finished operation
    pub fn operation(&self, target: &TargetId, status: SyncStatus) {
        self.sink.increment_counter(
            SYNC_OPERATIONS_TOTAL,
            &[("target", target.as_str()), ("status", status.as_str())],
            1,
        );
    }

    /// Count a failed write
    pub fn error(&self, target: &TargetId, kind: ErrorKind) {
        self.sink.increment_counter(
            SYNC_ERRORS_TOTAL,
            &[("target", target.as_str()), ("error_kind", kind.as_str())],
            1,
        );
    }

    /// Add written records
    pub fn records_processed(&self, target: &TargetId, records: usize) {
        let records = u64::try_from(records).unwrap_or(u64::MAX);
        self.sink.increment_counter(
            SYNC_RECORDS_PROCESSED_TOTAL,
            &[("target", target.as_str())],
            records,
        );
    }

    /// Observe operation wall time
    pub fn duration(&self, target: &TargetId, elapsed: Duration) {
        self.sink.observe_histogram(
            SYNC_DURATION_SECONDS,
            &[("target", target.as_str())],
            elapsed.as_secs_f64(),
        );
    }

    /// Count an operation that ran out of local attempts
    pub fn retry_exhausted(&self, target: &TargetId) {
        self.sink.increment_counter(SYNC_RETRY_EXHAUSTIONS_TOTAL, &[("target", target.as_str())], 1);
    }

    /// Count a recovery attempt
    pub fn recovery_attempt(&self, target: &TargetId) {
        self.sink.increment_counter(SYNC_RECOVERY_ATTEMPTS_TOTAL, &[("target", target.as_str())], 1);
    }

    /// Count a recovered job
    pub fn recovery_success(&self, target: &TargetId) {
        self.sink.increment_counter(SYNC_RECOVERY_SUCCESS_TOTAL, &[("target", target.as_str())], 1);
    }

    /// Observe recovery attempt wall time
    pub fn recovery_duration(&self, target: &TargetId, elapsed: Duration) {
        self.sink.observe_histogram(
            SYNC_RECOVERY_DURATION_SECONDS,
            &[("target", target.as_str())],
            elapsed.as_secs_f64(),
        );
    }

    /// Count an escalation
    pub fn escalation(&self, target: &TargetId) {
        self.sink.increment_counter(SYNC_ESCALATIONS_TOTAL, &[("target", target.as_str())], 1);
    }

    /// Set the escalated job gauge for `target`
    #[allow(clippy::cast_precision_loss)]
    pub fn escalated_jobs(&self, target: &TargetId, count: usize) {
        self.sink.set_gauge(SYNC_ESCALATED_JOBS, &[("target", target.as_str())], count as f64);
    }

    /// Set the recovery queue depth gauge
    #[allow(clippy::cast_precision_loss)]
    pub fn recovery_queue_depth(&self, depth: usize) {
        self.sink.set_gauge(SYNC_RECOVERY_QUEUE_DEPTH, &[], depth as f64);
    }

    /// Set the breaker state gauge
    pub fn breaker_state(&self, target: &str, state: CircuitState) {
        self.sink.set_gauge(CIRCUIT_BREAKER_STATE, &[("target", target)], state.gauge_value());
    }

    /// Count a breaker transition
    pub fn breaker_transition(&self, target: &str, from: CircuitState, to: CircuitState) {
        self.sink.increment_counter(
            CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
            &[("target", target), ("from", from.label()), ("to", to.label())],
            1,
        );
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)], _value: u64) {}

    fn observe_histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}

    fn set_gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// Sink that keeps every value in memory, keyed by name and sorted labels
///
/// Used by tests and local diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    counters: Mutex<HashMap<String, u64>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl InMemoryMetricsSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value, zero when never incremented
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters.lock().get(&series_key(name, labels)).copied().unwrap_or(0)
    }

    /// Sum of a counter across every label set
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(key, _)| series_name(key) == name)
            .map(|(_, value)| *value)
            .sum()
    }

    /// Last gauge value, if ever set
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges.lock().get(&series_key(name, labels)).copied()
    }

    /// Observed histogram samples in order
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
        self.histograms.lock().get(&series_key(name, labels)).cloned().unwrap_or_default()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        *self.counters.lock().entry(series_key(name, labels)).or_insert(0) += value;
    }

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.histograms.lock().entry(series_key(name, labels)).or_default().push(value);
    }

    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges.lock().insert(series_key(name, labels), value);
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

fn series_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_order_does_not_matter() {
        let sink = InMemoryMetricsSink::new();
        sink.increment_counter("c", &[("target", "pg"), ("status", "succeeded")], 1);
        sink.increment_counter("c", &[("status", "succeeded"), ("target", "pg")], 2);
        assert_eq!(sink.counter("c", &[("target", "pg"), ("status", "succeeded")]), 3);
        assert_eq!(sink.counter_total("c"), 3);
    }

    #[test]
    fn test_facade_emits_breaker_gauge_values() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let metrics = SyncMetrics::new(sink.clone());

        metrics.breaker_state("pg", CircuitState::HalfOpen);
        assert_eq!(sink.gauge(CIRCUIT_BREAKER_STATE, &[("target", "pg")]), Some(1.0));

        metrics.breaker_state("pg", CircuitState::Open);
        assert_eq!(sink.gauge(CIRCUIT_BREAKER_STATE, &[("target", "pg")]), Some(2.0));

        metrics.breaker_transition("pg", CircuitState::Closed, CircuitState::Open);
        assert_eq!(
            sink.counter(
                CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
                &[("target", "pg"), ("from", "closed"), ("to", "open")]
            ),
            1
        );
    }

    #[test]
    fn test_records_and_durations() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let metrics = SyncMetrics::new(sink.clone());
        let target = TargetId::new("influx");

        metrics.records_processed(&target, 250);
        metrics.duration(&target, Duration::from_millis(1500));
        metrics.recovery_queue_depth(4);

        assert_eq!(sink.counter(SYNC_RECORDS_PROCESSED_TOTAL, &[("target", "influx")]), 250);
        assert_eq!(sink.histogram(SYNC_DURATION_SECONDS, &[("target", "influx")]), vec![1.5]);
        assert_eq!(sink.gauge(SYNC_RECOVERY_QUEUE_DEPTH, &[]), Some(4.0));
    }
}
