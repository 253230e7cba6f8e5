//! Controller Settings
//!
//! Tunables for the main cycle and game timing. Defaults match the stock
//! controller; every field can be overridden from a `BOMBUH_*` environment
//! variable.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Sleep between main cycle iterations.
    pub poll_interval_ms: u64,
    /// Maximum gap between TIMER_SYNC events.
    pub sync_interval_ms: u32,
    /// Extra time added to the limit on arm.
    pub arm_grace_ms: u32,
    /// Period of unforced status reports.
    pub status_interval_ms: u32,
    /// Buffered status reports per subscriber.
    pub status_channel_capacity: usize,
    /// Attach the stand-in label and battery on startup.
    pub attach_dummy_devices: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            sync_interval_ms: 5000,
            arm_grace_ms: 200,
            status_interval_ms: 1000,
            status_channel_capacity: 16,
            attach_dummy_devices: true,
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden from the environment.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_ms: env_or("BOMBUH_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            sync_interval_ms: env_or("BOMBUH_SYNC_INTERVAL_MS", defaults.sync_interval_ms),
            arm_grace_ms: env_or("BOMBUH_ARM_GRACE_MS", defaults.arm_grace_ms),
            status_interval_ms: env_or("BOMBUH_STATUS_INTERVAL_MS", defaults.status_interval_ms),
            status_channel_capacity: env_or("BOMBUH_STATUS_CAPACITY", defaults.status_channel_capacity),
            attach_dummy_devices: std::env::var("BOMBUH_DUMMY_DEVICES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.attach_dummy_devices),
        }
    }

    /// Main cycle sleep.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = raw, "ignoring unparsable setting");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.sync_interval_ms, 5000);
        assert_eq!(config.arm_grace_ms, 200);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_parse_or_falls_back() {
        assert_eq!(parse_or("K", " 75 ", 10u64), 75);
        assert_eq!(parse_or("K", "soon", 10u64), 10);
    }
}
