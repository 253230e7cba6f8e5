//! Monotonic Millisecond Clock
//!
//! The countdown runs on a fixed-width `u32` millisecond counter that wraps
//! roughly every 49.7 days. Differences are taken modulo 2^32, the same way
//! sequence numbers are compared on a wrapping counter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Half the counter range. A forward step larger than this is read as a step back.
const HALF_RANGE: u32 = u32::MAX / 2;

/// Source of wrapping millisecond ticks.
pub trait Clock: Send + Sync {
    /// Current tick count in milliseconds. Wraps at `u32::MAX`.
    fn ticks_ms(&self) -> u32;
}

/// Wrapping difference `newer - older`.
#[inline]
pub fn ticks_diff(newer: u32, older: u32) -> u32 {
    newer.wrapping_sub(older)
}

/// Whether `a` is later than `b` on the wrapping counter.
#[inline]
pub fn ticks_after(a: u32, b: u32) -> bool {
    let d = ticks_diff(a, b);
    d != 0 && d <= HALF_RANGE
}

/// Elapsed milliseconds from `then` to `now`, zero if `now` is not after `then`.
#[inline]
pub fn ticks_elapsed(now: u32, then: u32) -> u32 {
    if ticks_after(now, then) {
        ticks_diff(now, then)
    } else {
        0
    }
}

/// Wall clock backed by [`Instant`], truncated to a wrapping u32.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Start counting from now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn ticks_ms(&self) -> u32 {
        // Truncation is the wrap
        self.origin.elapsed().as_millis() as u32
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Start at the given tick value.
    pub fn starting_at(ticks: u32) -> Self {
        Self {
            now: AtomicU32::new(ticks),
        }
    }

    /// Move forward by `ms`, wrapping.
    pub fn advance(&self, ms: u32) {
        let now = self.now.load(Ordering::SeqCst);
        self.now.store(now.wrapping_add(ms), Ordering::SeqCst);
    }

    /// Jump to an absolute tick value.
    pub fn set(&self, ticks: u32) {
        self.now.store(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn ticks_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
