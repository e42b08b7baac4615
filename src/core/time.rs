//! Tick arithmetic helpers
//!
//! Every state machine receives `now` from the caller instead of reading a
//! clock, so the same code runs against the RTC on target and against
//! synthetic instants in tests.

use embassy_time::{Duration, Instant};

/// True once at least `window` has passed since `since`
pub fn elapsed(now: Instant, since: Instant, window: Duration) -> bool {
    now.saturating_duration_since(since) >= window
}

/// Whole milliseconds between two instants, saturating at zero
pub fn millis_between(now: Instant, since: Instant) -> u32 {
    now.saturating_duration_since(since)
        .as_millis()
        .min(u32::MAX as u64) as u32
}
