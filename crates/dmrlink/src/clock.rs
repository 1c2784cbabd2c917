//! A snapshot of "now" passed explicitly through the core, so timer and
//! stream logic can be driven deterministically in tests.

use std::time::{Duration, Instant};

/// Monotonic and wall-clock time captured together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    /// Monotonic time used for every timer and stream comparison.
    pub mono: Instant,
    /// Wall-clock Unix time in nanoseconds.
    pub unix_ns: u64,
}

impl Clock {
    /// Reads both clocks.
    #[must_use]
    pub fn system() -> Self {
        Self {
            mono: Instant::now(),
            unix_ns: dmr_common::crypto::unix_now_ns(),
        }
    }

    /// Unix time in whole seconds.
    #[must_use]
    pub fn unix_secs(&self) -> u64 {
        self.unix_ns / 1_000_000_000
    }

    /// The same snapshot moved forward by `d`.
    #[must_use]
    pub fn advance(&self, d: Duration) -> Self {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        Self {
            mono: self.mono + d,
            unix_ns: self.unix_ns.saturating_add(nanos),
        }
    }

    /// Seconds elapsed since `earlier`, zero if `earlier` is in the future.
    #[must_use]
    pub fn secs_since(&self, earlier: Instant) -> f64 {
        self.mono.saturating_duration_since(earlier).as_secs_f64()
    }
}
