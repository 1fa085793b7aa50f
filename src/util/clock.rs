//! Monotonic and wall-clock time helpers.
//!
//! Worker-pool timing is measured with [`std::time::Instant`] (monotonic,
//! panic-free, immune to clock adjustments) and only converted to
//! milliseconds at the read boundary — snapshots, logs, and stats. Wall-clock
//! timestamps (e.g. for audit-style logging) use `now_ms`.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Saturates to zero if the system clock is set before the epoch rather than
/// panicking; a task engine should not crash over a misconfigured clock.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// A monotonic stopwatch used to time one micro-job from enqueue to completion.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Start the stopwatch now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
