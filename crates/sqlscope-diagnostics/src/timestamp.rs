//! Monotonic emission timestamps.
//!
//! Payload timestamps are raw counter samples, not wall-clock time. Convert
//! differences with [`TICKS_PER_SECOND`] before comparing them to durations.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counter resolution: one tick per nanosecond.
pub const TICKS_PER_SECOND: u64 = 1_000_000_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// A monotonic counter sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Samples the counter.
    pub fn now() -> Self {
        let ticks = epoch().elapsed().as_nanos();
        Self(u64::try_from(ticks).unwrap_or(u64::MAX))
    }

    /// Builds a timestamp from a raw tick count.
    pub fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Returns the raw tick count.
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Time elapsed between `earlier` and `self`, saturating at zero.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        let ticks = self.0.saturating_sub(earlier.0);
        Duration::from_secs(ticks / TICKS_PER_SECOND)
            + Duration::from_nanos((ticks % TICKS_PER_SECOND) * 1_000_000_000 / TICKS_PER_SECOND)
    }

    /// Time elapsed since this sample was taken.
    pub fn elapsed(self) -> Duration {
        Timestamp::now().duration_since(self)
    }
}
