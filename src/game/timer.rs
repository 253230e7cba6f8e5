//! Countdown Timer
//!
//! The countdown is advanced from a wrapping millisecond counter. Each
//! update subtracts `elapsed * timescale`; the first update after a restart
//! only captures the reference timestamp.

use crate::core::clock::{ticks_diff, ticks_elapsed};

/// Timescale per strike count. Counts past the end use the last entry.
pub const STRIKE_TO_TIMESCALE: [f32; 5] = [1.0, 1.25, 1.5, 3.0, 6.0];

/// Timescale for `strikes`.
pub fn timescale_for_strikes(strikes: u8) -> f32 {
    let idx = (strikes as usize).min(STRIKE_TO_TIMESCALE.len() - 1);
    STRIKE_TO_TIMESCALE[idx]
}

/// What an update produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerUpdate {
    /// Whole-second value changed; carries remaining milliseconds.
    pub tick: Option<u32>,
    /// Remaining time reached zero for the first time since restart.
    pub expired: bool,
}

/// Drift-free countdown over a wrapping millisecond clock.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining_ms: f64,
    scale: f32,
    last_update: Option<u32>,
    last_whole_secs: u32,
    expired: bool,
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Countdown {
    /// Stopped countdown holding `remaining_ms`.
    pub fn new(remaining_ms: u32) -> Self {
        Self {
            remaining_ms: remaining_ms as f64,
            scale: 1.0,
            last_update: None,
            last_whole_secs: remaining_ms / 1000,
            expired: false,
        }
    }

    /// Set a new remaining time and forget the reference timestamp.
    pub fn restart(&mut self, remaining_ms: u32) {
        *self = Self {
            scale: self.scale,
            ..Self::new(remaining_ms)
        };
    }

    /// Remaining milliseconds at the last update.
    pub fn remaining_ms(&self) -> u32 {
        self.remaining_ms as u32
    }

    /// Remaining milliseconds projected to `now` without advancing.
    pub fn real_remaining_ms(&self, now: u32) -> u32 {
        match self.last_update {
            Some(last) if !self.expired => {
                let pending = ticks_elapsed(now, last) as f64 * self.scale as f64;
                (self.remaining_ms - pending).max(0.0) as u32
            }
            _ => self.remaining_ms(),
        }
    }

    /// Current timescale.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Change the timescale for future updates.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    /// Whether the countdown has hit zero since the last restart.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Advance to `now`.
    pub fn update(&mut self, now: u32) -> TimerUpdate {
        let Some(last) = self.last_update else {
            self.last_update = Some(now);
            return TimerUpdate::default();
        };
        let elapsed = ticks_elapsed(now, last);
        if elapsed == 0 {
            return TimerUpdate::default();
        }
        self.last_update = Some(now);

        self.remaining_ms = (self.remaining_ms - elapsed as f64 * self.scale as f64).max(0.0);

        let mut update = TimerUpdate::default();
        let whole = self.remaining_ms() / 1000;
        if whole != self.last_whole_secs {
            self.last_whole_secs = whole;
            update.tick = Some(self.remaining_ms());
        }
        if self.remaining_ms <= 0.0 && !self.expired {
            self.expired = true;
            update.expired = true;
        }
        update
    }
}

/// Fires at most once per interval on a wrapping clock.
#[derive(Debug, Clone, Copy)]
pub struct SyncSchedule {
    interval_ms: u32,
    last: Option<u32>,
}

impl SyncSchedule {
    /// Schedule with the given interval.
    pub fn new(interval_ms: u32) -> Self {
        Self { interval_ms, last: None }
    }

    /// Whether a sync is due at `now`. Due on first call.
    pub fn due(&mut self, now: u32) -> bool {
        match self.last {
            Some(last) if ticks_diff(now, last) < self.interval_ms => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Count the next interval from `now`.
    pub fn mark(&mut self, now: u32) {
        self.last = Some(now);
    }
}
