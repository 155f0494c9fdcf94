//! Exponential backoff with optional full jitter
//!
//! `ceiling(n) = min(max_delay, base_delay * multiplier^(n-1))` for the n-th
//! attempt (1-based). With [`Jitter::Full`] the actual delay is drawn
//! uniformly from `[0, ceiling(n)]`.

use std::time::Duration;

use rand::Rng;

use crate::error::{CommonError, CommonResult};

/// Exponent clamp that keeps `multiplier^n` finite for any sane multiplier
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Jitter applied on top of the exponential ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the ceiling as-is
    None,
    /// Uniform in `[0, ceiling]`
    #[default]
    Full,
}

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: Jitter,
}

impl ExponentialBackoff {
    /// Create a schedule with full jitter
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> CommonResult<Self> {
        if base_delay > max_delay {
            return Err(CommonError::config_field("base_delay", "must not exceed max_delay"));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(CommonError::validation_with_value(
                "multiplier",
                "must be a finite value >= 1.0",
                multiplier.to_string(),
            ));
        }
        Ok(Self { base_delay, max_delay, multiplier, jitter: Jitter::Full })
    }

    /// Replace the jitter mode
    #[must_use]
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the first failed attempt
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound for any computed delay
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor applied per attempt
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Un-jittered delay bound for a 1-based attempt number
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        #[allow(clippy::cast_possible_wrap)]
        let factor = self.multiplier.powi(exponent as i32);
        let secs = self.base_delay.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay to sleep before the next attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`delay`](Self::delay) with a caller-supplied RNG
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                if ceiling.is_zero() {
                    return Duration::ZERO;
                }
                ceiling.mul_f64(rng.gen_range(0.0..=1.0))
            }
        }
    }
}
