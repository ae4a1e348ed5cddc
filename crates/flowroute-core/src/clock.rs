//! Time sources for telemetry timestamps.
//!
//! The monitor stamps every load sample with [`Clock::now_ms`]. Production
//! runs use the [`WallClock`]; tests drive a [`ManualClock`] so history keys
//! are deterministic regardless of host machine speed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A millisecond time source shared between threads.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Monotonic milliseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    started: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    current_ms: AtomicU64,
}

impl ManualClock {
    /// Create a new clock starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at a specific time in milliseconds.
    pub fn starting_at_ms(ms: u64) -> Self {
        Self {
            current_ms: AtomicU64::new(ms),
        }
    }

    /// Advance the clock by a duration in milliseconds.
    pub fn advance_by_ms(&self, delta_ms: u64) {
        self.current_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Advance the clock to a specific time in milliseconds.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `ms` is in the past.
    pub fn advance_to_ms(&self, ms: u64) {
        let previous = self.current_ms.swap(ms, Ordering::SeqCst);
        debug_assert!(
            ms >= previous,
            "Cannot move clock backwards: current={}ms, target={}ms",
            previous,
            ms,
        );
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}
