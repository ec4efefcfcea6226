//! Timestamp sources.
//!
//! Events carry their own timestamps; the engine only asks a `Clock` when it
//! has to make one up, which is the synthesized exit of post-processing.
//! Units are opaque to the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Nanoseconds since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        // u64 nanoseconds cover ~584 years; saturate instead of truncating.
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to. Trace replay drives it from event
/// timestamps so synthesized exits line up with the recorded timeline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock to `timestamp`. The clock never goes backwards.
    pub fn set(&self, timestamp: u64) {
        self.now.fetch_max(timestamp, Ordering::Relaxed);
    }

    pub fn advance(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}
