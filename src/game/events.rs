//! Game Events
//!
//! Event ids broadcast to components, and their parameter encodings.
//! Components subscribe by setting bit `id` in their handshake event mask.

use serde::{Deserialize, Serialize};

use crate::core::codec::DataOutput;

/// Event broadcast to subscribed components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BombEvent {
    /// Back to idle.
    Reset = 0,
    /// New configuration available; fetch it and acknowledge.
    Configure = 1,
    /// Game started.
    Arm = 2,
    /// Strike recorded. Params: `u8 strikes`.
    Strike = 3,
    /// Bomb exploded.
    Explosion = 4,
    /// All modules defused.
    Defusal = 5,
    /// Room lights off.
    LightsOut = 6,
    /// Room lights on.
    LightsOn = 7,
    /// Whole second changed. Params: `u32 remaining_ms`.
    TimerTick = 8,
    /// Periodic timer snapshot. Params: `u32 remaining_ms, f32 timescale`.
    TimerSync = 9,
    /// Identify-light toggle during setup. Params: `u8 on`.
    ConfigLight = 10,
}

impl BombEvent {
    /// Every event, in id order.
    pub const ALL: [BombEvent; 11] = [
        Self::Reset,
        Self::Configure,
        Self::Arm,
        Self::Strike,
        Self::Explosion,
        Self::Defusal,
        Self::LightsOut,
        Self::LightsOn,
        Self::TimerTick,
        Self::TimerSync,
        Self::ConfigLight,
    ];

    /// Wire id.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Subscription mask bit.
    #[inline]
    pub fn mask(self) -> u32 {
        1 << self.id()
    }

    /// Look up an event by wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// Subscription mask covering `events`.
pub fn event_mask(events: &[BombEvent]) -> u32 {
    events.iter().fold(0, |mask, e| mask | e.mask())
}

/// Whether `mask` subscribes to `event`.
#[inline]
pub fn subscribes(mask: u32, event: BombEvent) -> bool {
    mask & event.mask() != 0
}

/// STRIKE parameters.
pub fn strike_params(strikes: u8) -> Vec<u8> {
    vec![strikes]
}

/// TIMER_TICK parameters.
pub fn timer_tick_params(remaining_ms: u32) -> Vec<u8> {
    remaining_ms.to_le_bytes().to_vec()
}

/// TIMER_SYNC parameters.
pub fn timer_sync_params(remaining_ms: u32, timescale: f32) -> Vec<u8> {
    let mut out = DataOutput::with_capacity(8);
    out.write_u32(remaining_ms).write_f32(timescale);
    out.into_bytes()
}

/// CONFIG_LIGHT parameters.
pub fn config_light_params(on: bool) -> Vec<u8> {
    vec![on as u8]
}

/// One dispatched event, kept for status and diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event sent.
    pub event: BombEvent,
    /// Encoded parameters.
    pub params: Vec<u8>,
    /// Successful deliveries.
    pub delivered: usize,
    /// Clock tick at dispatch.
    pub at_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::DataInput;

    #[test]
    fn test_ids_are_stable() {
        for (i, event) in BombEvent::ALL.iter().enumerate() {
            assert_eq!(event.id() as usize, i);
            assert_eq!(BombEvent::from_id(i as u8), Some(*event));
        }
        assert_eq!(BombEvent::from_id(11), None);
    }

    #[test]
    fn test_mask() {
        let mask = event_mask(&[BombEvent::Arm, BombEvent::TimerSync]);
        assert_eq!(mask, 0b10_0000_0100);
        assert!(subscribes(mask, BombEvent::Arm));
        assert!(!subscribes(mask, BombEvent::Reset));
    }

    #[test]
    fn test_sync_params() {
        let params = timer_sync_params(299_500, 1.25);
        let mut input = DataInput::new(&params);
        assert_eq!(input.read_u32().unwrap(), 299_500);
        assert_eq!(input.read_f32().unwrap(), 1.25);
    }
}
