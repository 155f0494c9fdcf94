//! Per-target circuit breaker
//!
//! The breaker isolates a failing downstream store. It counts consecutive
//! retryable failures while closed, rejects every call while open, and lets
//! exactly one probe through at a time while half-open.
//!
//! Admission is explicit: [`CircuitBreaker::try_acquire`] hands out a
//! [`BreakerPermit`] that the caller settles with `success()`, `failure()` or
//! `neutral()`. Dropping an unsettled permit releases the probe slot without
//! recording anything.
//!
//! Only four transitions exist: closed→open, open→half_open,
//! half_open→closed and half_open→open. The open→half_open transition is
//! evaluated lazily when a call asks for admission.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{CommonError, CommonResult};
use crate::time::{SharedClock, SystemClock};

/// Default consecutive failures before the circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default probe successes needed to close a half-open circuit
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Default time the circuit stays open before probing
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

/// Default ceiling for the doubled open duration
pub const DEFAULT_MAX_OPEN_DURATION: Duration = Duration::from_secs(300);

/// Default window in which consecutive failures are counted
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting a single probe
    HalfOpen,
}

impl CircuitState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::HalfOpen,
            _ => Self::Open,
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open
    pub fn gauge_value(self) -> f64 {
        f64::from(self.as_u8())
    }

    /// Lowercase label used in metrics
    pub const fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Whether `self → next` is one of the four permitted transitions
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Closed, Self::Open)
                | (Self::Open, Self::HalfOpen)
                | (Self::HalfOpen, Self::Closed)
                | (Self::HalfOpen, Self::Open)
        )
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive retryable failures before opening
    pub failure_threshold: u32,
    /// Probe successes needed to close from half-open
    pub success_threshold: u32,
    /// A failure streak older than this restarts from zero
    pub failure_window: Duration,
    /// Initial time spent open before probing
    pub open_duration: Duration,
    /// Upper bound for the doubled open duration
    pub max_open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            open_duration: DEFAULT_OPEN_DURATION,
            max_open_duration: DEFAULT_MAX_OPEN_DURATION,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.failure_threshold == 0 {
            return Err(CommonError::config_field(
                "failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.success_threshold == 0 {
            return Err(CommonError::config_field(
                "success_threshold",
                "must be greater than 0",
            ));
        }
        if self.failure_window.is_zero() {
            return Err(CommonError::config_field("failure_window", "must be greater than 0"));
        }
        if self.open_duration > self.max_open_duration {
            return Err(CommonError::config_field(
                "open_duration",
                "must not exceed max_open_duration",
            ));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Start from the default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Consecutive half-open successes that close the circuit
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Window in which failures must accumulate
    pub fn failure_window(mut self, window: Duration) -> Self {
        self.config.failure_window = window;
        self
    }

    /// Initial time spent open before a probe is allowed
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    /// Cap for the doubled open duration
    pub fn max_open_duration(mut self, duration: Duration) -> Self {
        self.config.max_open_duration = duration;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> CommonResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Rejection returned while the circuit is open or a probe is in flight
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circuit breaker '{breaker}' is {state}, call short-circuited")]
pub struct CircuitOpen {
    /// Name of the breaker that rejected the call
    pub breaker: String,
    /// State at the time of rejection
    pub state: CircuitState,
    /// Time left until the next probe may be admitted, when known
    pub retry_after: Option<Duration>,
}

impl From<CircuitOpen> for CommonError {
    fn from(err: CircuitOpen) -> Self {
        CommonError::circuit_breaker(err.breaker, err.retry_after)
    }
}

/// Callback invoked after every state transition, outside the breaker lock
pub type TransitionListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Point-in-time view of a breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Half-open successes so far
    pub consecutive_successes: u32,
    /// When the circuit last opened
    pub opened_at: Option<Instant>,
    /// Whether the half-open probe is outstanding
    pub half_open_probe_in_flight: bool,
    /// Open duration applied on the next open
    pub current_open_duration: Duration,
    /// Permits requested
    pub total_calls: u64,
    /// Permits refused while open
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    consecutive_failures: u32,
    consecutive_successes: u32,
    streak_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    current_open_duration: Duration,
}

/// Circuit breaker for a single downstream target
///
/// The state byte is read lock-free on the fast path. Transitions and the
/// counters behind them are serialized by an internal mutex that is never
/// held across an await point.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    probe_in_flight: AtomicBool,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    clock: SharedClock,
    listener: Option<TransitionListener>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("probe_in_flight", &self.probe_in_flight.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a breaker driven by the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> CommonResult<Self> {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> CommonResult<Self> {
        config.validate()?;
        let current_open_duration = config.open_duration;

        Ok(Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            probe_in_flight: AtomicBool::new(false),
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                consecutive_successes: 0,
                streak_started_at: None,
                opened_at: None,
                current_open_duration,
            }),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            clock,
            listener: None,
        })
    }

    /// Attach a transition listener
    #[must_use]
    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Breaker name, usually the target id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current stored state (lock-free)
    ///
    /// An open circuit whose timer has expired still reports `Open` until the
    /// next admission request moves it to half-open.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask for admission
    ///
    /// Closed circuits always admit. Open circuits reject until the open
    /// duration has elapsed, then move to half-open. Half-open circuits admit
    /// one probe at a time and reject everything else.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitOpen> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state();
        if state == CircuitState::Open {
            state = self.try_half_open()?;
        }

        match state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    debug!(breaker = %self.name, "Admitting half-open probe");
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(self.reject(CircuitState::HalfOpen, None))
                }
            }
            CircuitState::Open => Err(self.reject(CircuitState::Open, None)),
        }
    }

    /// Snapshot of counters and state
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock_inner();
        CircuitBreakerMetrics {
            state: self.state(),
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_at: inner.opened_at,
            half_open_probe_in_flight: self.probe_in_flight.load(Ordering::Acquire),
            current_open_duration: inner.current_open_duration,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Consecutive retryable failures in the current streak
    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    fn try_half_open(&self) -> Result<CircuitState, CircuitOpen> {
        let mut inner = self.lock_inner();
        let state = self.state();
        if state != CircuitState::Open {
            return Ok(state);
        }

        let now = self.clock.now();
        let opened_at = inner.opened_at.unwrap_or(now);
        let elapsed = now.saturating_duration_since(opened_at);
        if elapsed < inner.current_open_duration {
            let remaining = inner.current_open_duration - elapsed;
            drop(inner);
            return Err(self.reject(CircuitState::Open, Some(remaining)));
        }

        inner.opened_at = None;
        inner.consecutive_successes = 0;
        self.probe_in_flight.store(false, Ordering::Release);
        self.store_state(CircuitState::HalfOpen);
        drop(inner);

        self.notify(CircuitState::Open, CircuitState::HalfOpen);
        Ok(CircuitState::HalfOpen)
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock_inner();
        let transition = match self.state() {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.streak_started_at = None;
                None
            }
            CircuitState::HalfOpen if probe => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.streak_started_at = None;
                    inner.current_open_duration = self.config.open_duration;
                    self.store_state(CircuitState::Closed);
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            }
            // Stale permit from an earlier state
            _ => None,
        };
        if probe {
            self.probe_in_flight.store(false, Ordering::Release);
        }
        drop(inner);

        if let Some((from, to)) = transition {
            info!(breaker = %self.name, "Circuit breaker closed after successful probes");
            self.notify(from, to);
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock_inner();
        let now = self.clock.now();
        let transition = match self.state() {
            CircuitState::Closed => {
                let streak_expired = inner.streak_started_at.map_or(true, |started| {
                    now.saturating_duration_since(started) > self.config.failure_window
                });
                if streak_expired {
                    inner.streak_started_at = Some(now);
                    inner.consecutive_failures = 0;
                }
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.opened_at = Some(now);
                    inner.consecutive_successes = 0;
                    self.store_state(CircuitState::Open);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        open_ms = inner.current_open_duration.as_millis(),
                        "Circuit breaker opened"
                    );
                    Some((CircuitState::Closed, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if probe => {
                let doubled = inner.current_open_duration.saturating_mul(2);
                inner.current_open_duration = doubled.min(self.config.max_open_duration);
                inner.opened_at = Some(now);
                inner.consecutive_successes = 0;
                self.store_state(CircuitState::Open);
                warn!(
                    breaker = %self.name,
                    open_ms = inner.current_open_duration.as_millis(),
                    "Half-open probe failed, circuit re-opened"
                );
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            _ => None,
        };
        if probe {
            self.probe_in_flight.store(false, Ordering::Release);
        }
        drop(inner);

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    fn release_probe(&self) {
        self.probe_in_flight.store(false, Ordering::Release);
    }

    fn reject(&self, state: CircuitState, retry_after: Option<Duration>) -> CircuitOpen {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        debug!(breaker = %self.name, state = %state, "Circuit breaker rejecting call");
        CircuitOpen { breaker: self.name.clone(), state, retry_after }
    }

    fn store_state(&self, state: CircuitState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        debug_assert!(from.can_transition_to(to));
        if let Some(listener) = &self.listener {
            listener(&self.name, from, to);
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!(breaker = %self.name, "Circuit breaker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
#[must_use = "a permit should be settled with success(), failure() or neutral()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self { breaker, probe, settled: false }
    }

    /// Whether this permit is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a successful call
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    /// Record a retryable failure
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }

    /// Settle without touching the counters (terminal errors, cancellation)
    pub fn neutral(self) {}
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
