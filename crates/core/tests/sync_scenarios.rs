//! End-to-end sync scenarios
//!
//! Each test wires a full engine (registry, executor, recovery manager) to
//! scripted store clients and a mock clock, then drives it through breaker
//! transitions, local retries, recovery and escalation.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use stratasync_core::metrics::{
    CIRCUIT_BREAKER_STATE, CIRCUIT_BREAKER_TRANSITIONS_TOTAL, SYNC_ERRORS_TOTAL,
    SYNC_ESCALATED_JOBS, SYNC_ESCALATIONS_TOTAL, SYNC_OPERATIONS_TOTAL,
    SYNC_RECOVERY_ATTEMPTS_TOTAL, SYNC_RECOVERY_QUEUE_DEPTH, SYNC_RECOVERY_SUCCESS_TOTAL,
};
use stratasync_core::{RecoveryHook, SubmitOutcome};
use stratasync_domain::{
    ErrorKind, RecoveryOutcome, RecoveryStatus, SyncOperation, SyncStatus, TargetHealth, TargetId,
    TargetKind,
};
use support::{
    batch, harness, harness_with_hooks, schema_violation, unavailable, ReconnectHook,
    ScriptedClient,
};

const OPEN_DURATION: Duration = Duration::from_secs(30);
const RECOVERY_BASE: Duration = Duration::from_secs(60);
const PAST_RECOVERY_MAX: Duration = Duration::from_secs(31 * 60);

fn operation(target: &str) -> SyncOperation {
    SyncOperation::new(Arc::new(batch()), target, chrono::Utc::now())
}

/// Validates `SyncOperationExecutor::execute` behavior for the breaker
/// opening scenario (threshold 5).
///
/// Assertions:
/// - Ensures five consecutive failures open the breaker.
/// - Ensures the sixth operation is short-circuited without reaching the store.
/// - Confirms the short-circuited operation is handed to recovery.
#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_a_breaker_opens_after_threshold() {
    let client = Arc::new(ScriptedClient::failing(unavailable));
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |config| {
        config.retry.relational.max_attempts = 1;
    });
    let executor = h.engine.executor();
    let pg = TargetId::new("pg");

    for _ in 0..5 {
        let report = executor.execute(operation("pg")).await.unwrap();
        assert_eq!(report.status, SyncStatus::FailedRetryable);
    }
    assert_eq!(client.calls(), 5);
    assert_eq!(h.engine.registry().health(&pg).unwrap(), TargetHealth::Unavailable);

    let report = executor.execute(operation("pg")).await.unwrap();

    assert_eq!(client.calls(), 5, "open breaker must not contact the store");
    assert_eq!(report.status, SyncStatus::FailedRetryable);
    assert_eq!(report.attempts, 0);
    assert_eq!(report.error_kind(), Some(ErrorKind::CircuitOpen));
    assert!(matches!(report.recovery, Some(SubmitOutcome::Scheduled { .. })));
    assert_eq!(
        h.sink.counter(SYNC_ERRORS_TOTAL, &[("target", "pg"), ("error_kind", "circuit_open")]),
        1
    );
    assert_eq!(h.sink.gauge(CIRCUIT_BREAKER_STATE, &[("target", "pg")]), Some(2.0));
    assert_eq!(h.engine.recovery().queue_depth(), 6);
}

/// Validates `CircuitBreaker` behavior through the executor for the half-open
/// recovery scenario (open 30s, success threshold 2).
///
/// Assertions:
/// - Ensures the breaker stays open before 30s and probes after.
/// - Ensures two successful probes close the breaker.
/// - Confirms exactly the four permitted transitions were recorded.
#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_b_half_open_probes_close_breaker() {
    let client = Arc::new(ScriptedClient::failing(unavailable));
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |config| {
        config.retry.relational.max_attempts = 1;
    });
    let executor = h.engine.executor();
    let pg = TargetId::new("pg");

    for _ in 0..5 {
        executor.execute(operation("pg")).await.unwrap();
    }
    client.set_failing(false);

    h.clock.advance(OPEN_DURATION - Duration::from_secs(1));
    let report = executor.execute(operation("pg")).await.unwrap();
    assert_eq!(report.error_kind(), Some(ErrorKind::CircuitOpen));
    assert_eq!(client.calls(), 5);

    h.clock.advance(Duration::from_secs(1));
    let first = executor.execute(operation("pg")).await.unwrap();
    assert_eq!(first.status, SyncStatus::Succeeded);
    assert_eq!(h.engine.registry().health(&pg).unwrap(), TargetHealth::Recovering);

    let second = executor.execute(operation("pg")).await.unwrap();
    assert_eq!(second.status, SyncStatus::Succeeded);
    assert_eq!(h.engine.registry().health(&pg).unwrap(), TargetHealth::Healthy);
    assert_eq!(h.sink.gauge(CIRCUIT_BREAKER_STATE, &[("target", "pg")]), Some(0.0));

    for (from, to) in [("closed", "open"), ("open", "half_open"), ("half_open", "closed")] {
        assert_eq!(
            h.sink.counter(
                CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
                &[("target", "pg"), ("from", from), ("to", to)]
            ),
            1,
            "{from} -> {to}"
        );
    }
    assert_eq!(h.sink.counter_total(CIRCUIT_BREAKER_TRANSITIONS_TOTAL), 3);
}

/// Validates `CircuitBreaker` behavior for the failed probe scenario.
///
/// Assertions:
/// - Ensures a failed probe reopens the breaker immediately.
/// - Ensures the next open window is doubled (60s instead of 30s).
#[tokio::test(flavor = "multi_thread")]
async fn test_failed_probe_reopens_with_longer_window() {
    let client = Arc::new(ScriptedClient::failing(unavailable));
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |config| {
        config.retry.relational.max_attempts = 1;
    });
    let executor = h.engine.executor();
    let pg = TargetId::new("pg");

    for _ in 0..5 {
        executor.execute(operation("pg")).await.unwrap();
    }

    h.clock.advance(OPEN_DURATION);
    let probe = executor.execute(operation("pg")).await.unwrap();
    assert_eq!(probe.attempts, 1);
    assert_eq!(client.calls(), 6);
    assert_eq!(h.engine.registry().health(&pg).unwrap(), TargetHealth::Unavailable);

    h.clock.advance(OPEN_DURATION);
    executor.execute(operation("pg")).await.unwrap();
    assert_eq!(client.calls(), 6, "doubled window should still be open");

    h.clock.advance(OPEN_DURATION);
    client.set_failing(false);
    let probe = executor.execute(operation("pg")).await.unwrap();
    assert_eq!(probe.status, SyncStatus::Succeeded);
    assert_eq!(
        h.sink.counter(
            CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
            &[("target", "pg"), ("from", "half_open"), ("to", "open")]
        ),
        1
    );
}

/// Validates the single-probe rule under concurrent load.
///
/// Assertions:
/// - Ensures only one of many concurrent operations reaches a half-open store.
#[tokio::test(flavor = "multi_thread")]
async fn test_half_open_admits_single_probe() {
    let client = Arc::new(ScriptedClient::failing(unavailable).with_latency(Duration::from_millis(50)));
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |config| {
        config.retry.relational.max_attempts = 1;
    });
    let executor = h.engine.executor();

    for _ in 0..5 {
        executor.execute(operation("pg")).await.unwrap();
    }
    client.set_failing(false);
    h.clock.advance(OPEN_DURATION);

    let reports = join_all((0..10).map(|_| executor.execute(operation("pg")))).await;

    assert_eq!(client.calls(), 6);
    let succeeded = reports.iter().filter(|r| r.as_ref().unwrap().succeeded()).count();
    let short_circuited = reports
        .iter()
        .filter(|r| r.as_ref().unwrap().error_kind() == Some(ErrorKind::CircuitOpen))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(short_circuited, 9);
}

/// Validates `RecoveryManager` behavior for the exhaustion and escalation
/// scenario (3 local attempts, 5 recovery attempts).
///
/// Assertions:
/// - Ensures the job is first due 60s after handoff.
/// - Ensures `next_attempt_at` never moves backwards.
/// - Ensures the fifth failed recovery escalates the job and raises metrics.
#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_c_recovery_escalates_after_ceiling() {
    let client = Arc::new(ScriptedClient::failing(unavailable));
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |config| {
        config.breaker.relational.failure_threshold = 1_000;
    });
    let executor = h.engine.executor();
    let recovery = h.engine.recovery();

    let report = executor.execute(operation("pg")).await.unwrap();
    assert_eq!(report.status, SyncStatus::FailedRetryable);
    assert_eq!(report.attempts, 3);
    assert_eq!(client.calls(), 3);

    let Some(RecoveryStatus::Scheduled { job }) = recovery.status(&report.operation_id) else {
        panic!("operation should be scheduled for recovery");
    };
    let handed_off_at = chrono::DateTime::<chrono::Utc>::from(
        stratasync_common::Clock::system_time(&h.clock),
    );
    assert_eq!(job.next_attempt_at - handed_off_at, chrono::Duration::seconds(60));

    let early = h.engine.tick().await;
    assert_eq!(early.due, 0);

    let mut last_next = job.next_attempt_at;
    h.clock.advance(RECOVERY_BASE);
    for attempt in 1..=4u32 {
        let summary = h.engine.tick().await;
        assert_eq!(summary.due, 1);
        assert_eq!(summary.rescheduled, 1);

        let Some(RecoveryStatus::Scheduled { job }) = recovery.status(&report.operation_id) else {
            panic!("job should still be scheduled after attempt {attempt}");
        };
        assert_eq!(job.recovery_attempt_count, attempt);
        assert!(job.next_attempt_at >= last_next);
        last_next = job.next_attempt_at;
        h.clock.advance(PAST_RECOVERY_MAX);
    }

    let summary = h.engine.tick().await;
    assert_eq!(summary.escalated, 1);
    assert_eq!(recovery.queue_depth(), 0);

    let escalated = recovery.escalated();
    assert_eq!(escalated.len(), 1);
    assert_eq!(escalated[0].outcome, RecoveryOutcome::Escalated);
    assert!(escalated[0].job.escalated);
    assert_eq!(escalated[0].job.recovery_attempt_count, 5);

    assert_eq!(client.calls(), 3 + 5 * 3);
    let stats = recovery.stats_for(&TargetId::new("pg"));
    assert_eq!((stats.attempts, stats.failures, stats.escalations), (5, 5, 1));
    assert_eq!(stats.successes, 0);
    assert_eq!(h.sink.counter(SYNC_RECOVERY_ATTEMPTS_TOTAL, &[("target", "pg")]), 5);
    assert_eq!(h.sink.counter(SYNC_ESCALATIONS_TOTAL, &[("target", "pg")]), 1);
    assert_eq!(h.sink.gauge(SYNC_ESCALATED_JOBS, &[("target", "pg")]), Some(1.0));
    assert_eq!(h.sink.gauge(SYNC_RECOVERY_QUEUE_DEPTH, &[]), Some(0.0));

    // Escalated jobs are never picked up again
    h.clock.advance(PAST_RECOVERY_MAX);
    assert_eq!(h.engine.tick().await.due, 0);
    assert!(recovery.acknowledge(&report.operation_id).await);
    assert_eq!(h.sink.gauge(SYNC_ESCALATED_JOBS, &[("target", "pg")]), Some(0.0));
}

/// Validates `RecoveryManager::tick` behavior for the target-recovers
/// scenario.
///
/// Assertions:
/// - Ensures a recovered job leaves the schedule with a `recovered` record.
/// - Ensures resubmitting the original operation is a no-op.
#[tokio::test(flavor = "multi_thread")]
async fn test_recovery_succeeds_once_target_heals() {
    let client = Arc::new(ScriptedClient::failing(unavailable));
    let h = harness(vec![("ch", TargetKind::Analytical, client.clone())], |_| {});
    let recovery = h.engine.recovery();

    let report = h.engine.executor().execute(operation("ch")).await.unwrap();
    assert_eq!(report.attempts, 5);

    client.set_failing(false);
    h.clock.advance(RECOVERY_BASE);
    let summary = h.engine.tick().await;

    assert_eq!(summary.recovered, 1);
    assert_eq!(recovery.queue_depth(), 0);
    let Some(RecoveryStatus::Finished { record }) = recovery.status(&report.operation_id) else {
        panic!("recovered job should leave a record");
    };
    assert_eq!(record.outcome, RecoveryOutcome::Recovered);
    assert_eq!(h.sink.counter(SYNC_RECOVERY_SUCCESS_TOTAL, &[("target", "ch")]), 1);

    let mut resubmitted = operation("ch");
    resubmitted.operation_id = report.operation_id;
    resubmitted.status = SyncStatus::FailedRetryable;
    assert_eq!(recovery.submit(&resubmitted).await.unwrap(), SubmitOutcome::AlreadySucceeded);
    assert_eq!(recovery.queue_depth(), 0);
}

/// Validates `RecoveryManager::submit` behavior for an operation the executor
/// already delivered.
///
/// Assertions:
/// - Ensures a copy of the operation succeeds while the original stays pending.
/// - Ensures submitting the original afterwards schedules nothing.
#[tokio::test(flavor = "multi_thread")]
async fn test_delivered_operation_is_not_resubmitted() {
    let client = Arc::new(ScriptedClient::healthy());
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |_| {});
    let recovery = h.engine.recovery();

    let original = operation("pg");
    let report = h.engine.executor().execute(original.clone()).await.unwrap();
    assert_eq!(report.status, SyncStatus::Succeeded);
    assert_eq!(original.status, SyncStatus::Pending);

    assert_eq!(recovery.submit(&original).await.unwrap(), SubmitOutcome::AlreadySucceeded);
    assert_eq!(recovery.queue_depth(), 0);
    assert!(recovery.status(&original.operation_id).is_none());

    h.clock.advance(PAST_RECOVERY_MAX);
    assert_eq!(h.engine.tick().await.due, 0);
    assert_eq!(client.calls(), 1);
}

/// Validates `RecoveryHook` behavior for a target whose reconnect fails once.
///
/// Assertions:
/// - Ensures a failed hook skips the store write but counts as an attempt.
/// - Ensures the hook runs again before the next attempt and the job recovers.
/// - Confirms per-target statistics track attempts, failures and successes.
#[tokio::test(flavor = "multi_thread")]
async fn test_recovery_hook_runs_before_each_attempt() {
    let client = Arc::new(ScriptedClient::failing(unavailable));
    let hook = Arc::new(ReconnectHook::failing_first(1));
    let h = harness_with_hooks(
        vec![("pg", TargetKind::Relational, client.clone())],
        |_| {},
        vec![(TargetKind::Relational, hook.clone() as Arc<dyn RecoveryHook>)],
    );
    let recovery = h.engine.recovery();
    let pg = TargetId::new("pg");

    let report = h.engine.executor().execute(operation("pg")).await.unwrap();
    assert_eq!(client.calls(), 3);
    assert_eq!(hook.calls(), 0);

    client.set_failing(false);
    h.clock.advance(RECOVERY_BASE);
    let summary = h.engine.tick().await;
    assert_eq!(summary.rescheduled, 1);
    assert_eq!(client.calls(), 3);
    assert_eq!(hook.calls(), 1);

    let Some(RecoveryStatus::Scheduled { job }) = recovery.status(&report.operation_id) else {
        panic!("job should stay scheduled after a failed hook");
    };
    assert_eq!(job.recovery_attempt_count, 1);
    assert_eq!(job.last_error.map(|e| e.kind), Some(ErrorKind::ConnectionReset));
    assert_eq!(
        h.sink.counter(SYNC_ERRORS_TOTAL, &[("target", "pg"), ("error_kind", "connection_reset")]),
        1
    );
    let stats = recovery.stats_for(&pg);
    assert_eq!((stats.attempts, stats.failures, stats.successes), (1, 1, 0));

    h.clock.advance(PAST_RECOVERY_MAX);
    let summary = h.engine.tick().await;
    assert_eq!(summary.recovered, 1);
    assert_eq!(client.calls(), 4);
    assert_eq!(hook.calls(), 2);

    let stats = recovery.stats_for(&pg);
    assert_eq!((stats.attempts, stats.failures, stats.successes), (2, 1, 1));
    assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);
    assert_eq!(recovery.stats(), vec![(pg, stats)]);
}

/// Validates `SyncOperationExecutor::execute` behavior for the terminal error
/// scenario.
///
/// Assertions:
/// - Ensures a schema violation fails immediately after one attempt.
/// - Ensures no recovery job is created.
/// - Ensures the breaker failure count is unchanged.
#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_d_terminal_error_skips_recovery() {
    let client = Arc::new(ScriptedClient::failing(schema_violation));
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |_| {});
    let entry = h.engine.registry().get(&TargetId::new("pg")).unwrap();
    entry.breaker().try_acquire().unwrap().failure();
    entry.breaker().try_acquire().unwrap().failure();
    assert_eq!(entry.breaker().consecutive_failures(), 2);

    let report = h.engine.executor().execute(operation("pg")).await.unwrap();

    assert_eq!(report.status, SyncStatus::FailedTerminal);
    assert_eq!(report.attempts, 1);
    assert_eq!(client.calls(), 1);
    assert_eq!(report.error_kind(), Some(ErrorKind::SchemaViolation));
    assert!(report.recovery.is_none());
    assert_eq!(h.engine.recovery().queue_depth(), 0);

    assert_eq!(entry.breaker().consecutive_failures(), 2);
    assert_eq!(
        h.sink.counter(SYNC_OPERATIONS_TOTAL, &[("target", "pg"), ("status", "failed_terminal")]),
        1
    );
}

/// Validates `SyncDispatcher::dispatch` behavior for the independent targets
/// scenario.
///
/// Assertions:
/// - Ensures the healthy target succeeds while its sibling exhausts retries.
/// - Ensures the healthy target is not held back by the failing one.
/// - Ensures only the failing target's breaker opens.
#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_e_targets_are_independent() {
    let pg = Arc::new(ScriptedClient::healthy());
    let influx =
        Arc::new(ScriptedClient::failing(unavailable).with_latency(Duration::from_millis(20)));
    let h = harness(
        vec![
            ("pg", TargetKind::Relational, pg.clone()),
            ("influx", TargetKind::TimeSeries, influx.clone()),
        ],
        |_| {},
    );

    let report = h
        .engine
        .dispatch(batch(), &[TargetId::new("pg"), TargetId::new("influx")])
        .await;

    let pg_report = report.report(&TargetId::new("pg")).unwrap().as_ref().unwrap();
    let influx_report = report.report(&TargetId::new("influx")).unwrap().as_ref().unwrap();

    assert_eq!(pg_report.status, SyncStatus::Succeeded);
    assert_eq!(influx_report.status, SyncStatus::FailedRetryable);
    assert_eq!(influx_report.attempts, 5);
    assert!(pg_report.elapsed < influx_report.elapsed);
    assert_eq!(pg.calls(), 1);
    assert_eq!(influx.calls(), 5);

    let summary = report.summary();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed_retryable, 1);
    assert!(!report.all_succeeded());

    assert_eq!(
        h.engine.health(),
        vec![
            (TargetId::new("influx"), TargetHealth::Unavailable),
            (TargetId::new("pg"), TargetHealth::Healthy),
        ]
    );
    assert_eq!(h.engine.recovery().pending().len(), 1);
    assert_eq!(h.engine.recovery().pending()[0].target_id, TargetId::new("influx"));
}

/// Validates `RecoveryManager::cancel_batch` behavior for the withdrawn
/// source scenario.
///
/// Assertions:
/// - Ensures withdrawn jobs are never attempted again.
/// - Confirms a `cancelled` status distinct from `failed_terminal` is reported.
#[tokio::test(flavor = "multi_thread")]
async fn test_withdrawn_batch_is_cancelled() {
    let client = Arc::new(ScriptedClient::failing(unavailable));
    let h = harness(vec![("pg", TargetKind::Relational, client.clone())], |_| {});

    let report = h.engine.dispatch(batch(), &[TargetId::new("pg")]).await;
    let op = report.report(&TargetId::new("pg")).unwrap().as_ref().unwrap();
    assert_eq!(client.calls(), 3);

    assert_eq!(h.engine.recovery().cancel_batch(report.batch_id).await, 1);

    h.clock.advance(RECOVERY_BASE);
    assert_eq!(h.engine.tick().await.due, 0);
    assert_eq!(client.calls(), 3);

    let Some(RecoveryStatus::Finished { record }) = h.engine.recovery().status(&op.operation_id)
    else {
        panic!("cancelled job should leave a record");
    };
    assert_eq!(record.outcome, RecoveryOutcome::Cancelled);
    assert_eq!(
        h.sink.counter(SYNC_OPERATIONS_TOTAL, &[("target", "pg"), ("status", "cancelled")]),
        1
    );
}

/// Validates `SyncOperationExecutor::execute` behavior for the local retry
/// bound across target kinds.
///
/// Assertions:
/// - Ensures relational targets stop at 3 attempts and time-series at 5.
#[tokio::test(flavor = "multi_thread")]
async fn test_attempts_bounded_per_kind() {
    let pg = Arc::new(ScriptedClient::failing(unavailable));
    let influx = Arc::new(ScriptedClient::failing(unavailable));
    let h = harness(
        vec![
            ("pg", TargetKind::Relational, pg.clone()),
            ("influx", TargetKind::TimeSeries, influx.clone()),
        ],
        |_| {},
    );

    let report = h.engine.dispatcher().dispatch_all(batch()).await;

    assert_eq!(report.summary().failed_retryable, 2);
    assert_eq!(pg.calls(), 3);
    assert_eq!(influx.calls(), 5);
}

/// Validates flaky targets recover inside the local retry loop.
#[tokio::test(flavor = "multi_thread")]
async fn test_flaky_target_succeeds_locally() {
    let client = Arc::new(ScriptedClient::flaky(2, unavailable));
    let h = harness(vec![("ch", TargetKind::Analytical, client.clone())], |_| {});

    let report = h.engine.executor().execute(operation("ch")).await.unwrap();

    assert_eq!(report.status, SyncStatus::Succeeded);
    assert_eq!(report.attempts, 3);
    assert_eq!(h.engine.recovery().queue_depth(), 0);
}
