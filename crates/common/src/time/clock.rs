//! Time abstraction for testability
//!
//! Breakers measure open windows with the monotonic [`Clock::now`], recovery
//! schedules use the wall clock from [`Clock::system_time`]. Both come from the
//! same clock so a [`MockClock`] moves them together.
//!
//! ```
//! use std::time::Duration;
//!
//! use stratasync_common::time::{Clock, MockClock};
//!
//! let mock = MockClock::new();
//! let start = mock.now();
//! mock.advance(Duration::from_secs(30));
//! assert_eq!(mock.now().duration_since(start), Duration::from_secs(30));
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Trait for time operations to enable deterministic testing
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        u64::try_from(self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis())
            .unwrap_or(u64::MAX)
    }
}

/// Clock shared between the breaker registry, executor and recovery manager
pub type SharedClock = Arc<dyn Clock>;

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed offset, so a test can keep one handle and
/// pass another into the component under test.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    start_system: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            start_system: SystemTime::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed = duration;
        }
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.start_system + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `MockClock::advance` behavior for the shared clones
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a clone observes time advanced through the original.
    /// - Confirms wall and monotonic time move together.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new();
        let observer = clock.clone();
        let start = observer.now();
        let start_wall = observer.system_time();

        clock.advance(Duration::from_secs(60));
        clock.advance_millis(500);

        assert_eq!(observer.now().duration_since(start), Duration::from_millis(60_500));
        assert_eq!(
            observer.system_time().duration_since(start_wall).unwrap_or_default(),
            Duration::from_millis(60_500)
        );
    }

    /// Validates `MockClock::set_elapsed` behavior for the rewind scenario.
    ///
    /// Assertions:
    /// - Confirms `elapsed()` reflects the explicit value.
    #[test]
    fn test_mock_clock_set_elapsed() {
        let clock = MockClock::new();
        clock.advance(Duration::from_secs(10));
        clock.set_elapsed(Duration::from_secs(2));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    /// Validates `SystemClock` behavior for the monotonic scenario.
    ///
    /// Assertions:
    /// - Ensures successive readings never go backwards.
    #[test]
    fn test_system_clock_monotonic() {
        let clock: SharedClock = Arc::new(SystemClock);
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
        assert!(clock.millis_since_epoch() > 0);
    }
}
