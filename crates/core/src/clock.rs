//! Wall-clock helpers over the shared clock

use std::time::Duration;

use chrono::{DateTime, Utc};
use stratasync_common::Clock;

/// Current wall-clock time as a UTC timestamp
pub(crate) fn utc_now(clock: &dyn Clock) -> DateTime<Utc> {
    DateTime::<Utc>::from(clock.system_time())
}

/// Convert a std duration, saturating on overflow
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
