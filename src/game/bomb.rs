//! Bomb Aggregate
//!
//! The authoritative game: component registry, lifecycle state, strikes,
//! countdown and the pending acknowledgement and defusal sets. Created once
//! at startup and handed to every collaborator; request handlers reach it
//! through the dispatch engine.
//!
//! ## Lifecycle
//!
//! ```text
//!            arm()                explode() / defuse()
//!   IDLE ───────────► INGAME ─────────────────────────► SUMMARY
//!    ▲                                                     │
//!    └──────────────────── reset() / arm() ────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::bus::handshake::HandshakeError;
use crate::bus::protocol::{Command, DeviceId};
use crate::bus::registry::Bus;
use crate::bus::transport::TransportError;
use crate::bus::virtual_device::VirtualComponent;
use crate::core::clock::Clock;
use crate::core::codec::CodecError;
use crate::core::hash::str_hash;
use crate::core::rng::DeterministicRng;
use crate::dispatch::engine::{broadcast_event, BusContext};
use crate::game::blob::{build_bomb_config, build_component_config, package, BombHeader};
use crate::game::component::{ComponentHandle, ComponentKind, ComponentRegistry, VariableValue};
use crate::game::events::{strike_params, timer_sync_params, timer_tick_params, BombEvent, EventRecord};
use crate::game::serial::{calc_serial_flags, generate_serial, is_valid_serial};
use crate::game::timer::{timescale_for_strikes, Countdown, SyncSchedule};
use crate::settings::ControllerConfig;

/// Cause recorded when the countdown runs out.
pub const CAUSE_TIME_RAN_OUT: &str = "Time ran out";

/// Serial used before the first configuration.
pub const DEFAULT_SERIAL: &str = "000000";

const RECENT_EVENT_CAPACITY: usize = 32;

// =============================================================================
// STATE AND ERRORS
// =============================================================================

/// Lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BombState {
    /// Waiting for configuration and arming.
    #[default]
    Idle,
    /// Countdown running.
    InGame,
    /// Game over until reset.
    Summary,
}

/// Configuration rejected before anything was applied.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invalid configuration fields: {}", .fields.join(", "))]
pub struct ConfigError {
    /// Offending field names.
    pub fields: Vec<String>,
}

/// Game operation errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// Operation needs a running game.
    #[error("no game in progress")]
    NotInGame,

    /// Device has no component.
    #[error("unknown component {0:#010x}")]
    UnknownComponent(DeviceId),

    /// Acknowledgement from a device that was not asked to configure.
    #[error("device {0:#010x} is not pending configuration")]
    NotPendingReady(DeviceId),

    /// Defusal of a component that is not pending defusal.
    #[error("component {0:#010x} is not pending defusal")]
    NotPendingDefusal(DeviceId),

    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Blob construction failed.
    #[error("config blob error: {0}")]
    Blob(#[from] CodecError),

    /// Newly attached device failed its handshake.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Bus transfer failed.
    #[error("bus error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration request. Consumed by [`Bomb::configure`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BombConfig {
    /// Countdown length in milliseconds.
    pub time_limit_ms: u32,
    /// Strikes until explosion.
    pub strikes: u8,
    /// Serial number; generated when absent.
    #[serde(default)]
    pub serial: Option<String>,
    /// Raw values per component and variable name.
    #[serde(default)]
    pub components: BTreeMap<DeviceId, BTreeMap<String, Value>>,
}

// =============================================================================
// BOMB
// =============================================================================

/// The game aggregate.
pub struct Bomb {
    bus: Arc<Bus>,
    clock: Arc<dyn Clock>,
    arm_grace_ms: u32,

    state: BombState,
    components: ComponentRegistry,

    serial: String,
    random_seed: u32,
    strikes: u8,
    strike_limit: u8,
    timer_limit_ms: u32,
    timer: Countdown,
    sync: SyncSchedule,

    cause_of_explosion: Option<String>,
    pending_ready: BTreeSet<DeviceId>,
    pending_defusal: BTreeSet<DeviceId>,

    bomb_config_cache: Option<Vec<u8>>,
    force_status_report: bool,
    exit_requested: bool,
    recent_events: VecDeque<EventRecord>,
}

impl BusContext for Bomb {
    fn bus(&self) -> Arc<Bus> {
        Arc::clone(&self.bus)
    }
}

impl Bomb {
    /// Idle bomb with no components.
    pub fn new(bus: Arc<Bus>, clock: Arc<dyn Clock>, config: &ControllerConfig) -> Self {
        Self {
            bus,
            clock,
            arm_grace_ms: config.arm_grace_ms,
            state: BombState::Idle,
            components: ComponentRegistry::new(),
            serial: DEFAULT_SERIAL.to_owned(),
            random_seed: 0,
            strikes: 0,
            strike_limit: 0,
            timer_limit_ms: 0,
            timer: Countdown::default(),
            sync: SyncSchedule::new(config.sync_interval_ms),
            cause_of_explosion: None,
            pending_ready: BTreeSet::new(),
            pending_defusal: BTreeSet::new(),
            bomb_config_cache: None,
            force_status_report: false,
            exit_requested: false,
            recent_events: VecDeque::with_capacity(RECENT_EVENT_CAPACITY),
        }
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Broadcast `event` to subscribed components. Returns deliveries.
    pub fn dispatch(&mut self, event: BombEvent, params: Vec<u8>) -> usize {
        let delivered = broadcast_event(&self.bus, &self.components.subscriptions(), event.id(), &params);
        debug!(?event, delivered, "event dispatched");
        self.record(event, params, delivered);
        delivered
    }

    /// Send `event` to one device regardless of its subscription mask.
    pub fn device_event(&mut self, id: DeviceId, event: BombEvent, params: Vec<u8>) -> Result<(), GameError> {
        let mut payload = Vec::with_capacity(params.len() + 1);
        payload.push(event.id());
        payload.extend_from_slice(&params);
        self.bus.send_command(id, Command::Event, &payload)?;
        self.record(event, params, 1);
        Ok(())
    }

    fn record(&mut self, event: BombEvent, params: Vec<u8>, delivered: usize) {
        if self.recent_events.len() == RECENT_EVENT_CAPACITY {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(EventRecord {
            event,
            params,
            delivered,
            at_ms: self.clock.ticks_ms(),
        });
    }

    fn dispatch_timer_sync(&mut self) {
        let now = self.clock.ticks_ms();
        self.sync.mark(now);
        let params = timer_sync_params(self.real_remaining_ms(), self.timer.scale());
        self.dispatch(BombEvent::TimerSync, params);
    }

    // -------------------------------------------------------------------------
    // Devices
    // -------------------------------------------------------------------------

    /// Rescan the bus, handshake every device and return to IDLE.
    ///
    /// Returns the number of components found.
    #[instrument(skip(self))]
    pub fn discover_modules(&mut self) -> usize {
        self.components.clear();
        self.pending_ready.clear();
        self.pending_defusal.clear();
        self.bomb_config_cache = None;

        if let Err(e) = self.bus.discover() {
            warn!("physical bus scan failed: {}", e);
        }
        for (id, handshake) in self.bus.shake_hands() {
            self.components.insert(ComponentHandle::from_handshake(id, handshake));
        }
        info!(components = self.components.len(), "component discovery complete");

        self.reset();
        self.components.len()
    }

    /// Attach a virtual device and register its component.
    ///
    /// A device attached while configuration is pending is not added to the
    /// pending set; its blob is built on request.
    pub fn add_virtual_device(&mut self, component: Box<dyn VirtualComponent>) -> Result<DeviceId, GameError> {
        let id = self.bus.add_virtual_device(component);
        match self.bus.shake_hand(id) {
            Ok(handshake) => {
                self.components.insert(ComponentHandle::from_handshake(id, handshake));
                Ok(id)
            }
            Err(e) => {
                self.bus.remove_virtual_device(id);
                Err(e.into())
            }
        }
    }

    /// Detach a virtual device and forget its component.
    pub fn remove_virtual_device(&mut self, id: DeviceId) -> bool {
        let removed = self.bus.remove_virtual_device(id);
        self.components.remove(id);
        self.pending_defusal.remove(&id);
        if self.pending_ready.remove(&id) {
            self.release_if_configured();
        }
        removed
    }

    /// Components by device id.
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// One component.
    pub fn component(&self, id: DeviceId) -> Option<&ComponentHandle> {
        self.components.get(id)
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Check a configuration without applying it.
    pub fn validate(&self, config: &BombConfig) -> Result<Vec<(DeviceId, String, VariableValue)>, ConfigError> {
        let mut fields = Vec::new();
        let mut values = Vec::new();

        if config.strikes == 0 {
            fields.push("bomb.strikes".to_owned());
        }
        if config.time_limit_ms == 0 {
            fields.push("bomb.timer".to_owned());
        }
        if let Some(serial) = &config.serial {
            if !is_valid_serial(serial) {
                fields.push("bomb.serial".to_owned());
            }
        }
        for (&id, vars) in &config.components {
            let Some(component) = self.components.get(id) else {
                fields.push(format!("module.{id}"));
                continue;
            };
            for (key, raw) in vars {
                match component.coerce(key, raw) {
                    Some(value) => values.push((id, key.clone(), value)),
                    None => fields.push(format!("module.{id}.{key}")),
                }
            }
        }

        if fields.is_empty() {
            Ok(values)
        } else {
            Err(ConfigError { fields })
        }
    }

    /// Apply a configuration, rebuild every blob and dispatch CONFIGURE.
    ///
    /// Values and blobs are staged first; nothing changes unless validation
    /// and every blob build succeed.
    #[instrument(skip_all)]
    pub fn configure(&mut self, config: BombConfig) -> Result<(), GameError> {
        let values = self.validate(&config)?;
        let serial = match config.serial {
            Some(serial) => serial,
            None => generate_serial(&mut DeterministicRng::from_entropy()),
        };

        let mut staged = self.components.clone();
        for (id, key, value) in values {
            if let Some(component) = staged.get_mut(id) {
                component.apply(&key, value);
            }
        }
        let header = BombHeader {
            seed: str_hash(&serial),
            serial: &serial,
            serial_flags: calc_serial_flags(&serial),
            strike_limit: config.strikes,
            timer_limit_ms: config.time_limit_ms,
        };
        let bomb_blob = package(&build_bomb_config(&header, &staged)?)?;
        for component in staged.iter_mut() {
            let blob = build_component_config(component)?;
            component.config_cache = Some(package(&blob)?);
        }

        self.components = staged;
        self.bomb_config_cache = Some(bomb_blob);
        self.timer_limit_ms = config.time_limit_ms;
        self.timer.restart(config.time_limit_ms);
        self.timer.set_scale(timescale_for_strikes(0));
        self.strike_limit = config.strikes;
        self.strikes = 0;
        self.set_serial(serial);

        self.pending_ready = self
            .components
            .iter()
            .filter(|c| c.subscribes(BombEvent::Configure))
            .map(|c| c.id)
            .collect();
        info!(
            serial = %self.serial,
            pending = self.pending_ready.len(),
            "configuration built, notifying components"
        );
        self.dispatch(BombEvent::Configure, Vec::new());
        Ok(())
    }

    fn set_serial(&mut self, serial: String) {
        self.random_seed = str_hash(&serial);
        self.serial = serial;
    }

    fn header(&self) -> BombHeader<'_> {
        BombHeader {
            seed: self.random_seed,
            serial: &self.serial,
            serial_flags: calc_serial_flags(&self.serial),
            strike_limit: self.strike_limit,
            timer_limit_ms: self.timer_limit_ms,
        }
    }

    /// Packaged bomb blob, rebuilt if the cache was released.
    pub fn bomb_config(&self) -> Result<Vec<u8>, CodecError> {
        match &self.bomb_config_cache {
            Some(cached) => Ok(cached.clone()),
            None => package(&build_bomb_config(&self.header(), &self.components)?),
        }
    }

    /// Packaged blob of one component, rebuilt if the cache was released.
    pub fn component_config(&self, id: DeviceId) -> Result<Vec<u8>, GameError> {
        let component = self.components.get(id).ok_or(GameError::UnknownComponent(id))?;
        match &component.config_cache {
            Some(cached) => Ok(cached.clone()),
            None => Ok(package(&build_component_config(component)?)?),
        }
    }

    /// Acknowledgement that `id` has loaded its configuration.
    pub fn device_ready(&mut self, id: DeviceId) -> Result<(), GameError> {
        if !self.pending_ready.remove(&id) {
            return Err(GameError::NotPendingReady(id));
        }
        debug!(id = format_args!("{id:#010x}"), remaining = self.pending_ready.len(), "device ready");
        self.release_if_configured();
        Ok(())
    }

    fn release_if_configured(&mut self) {
        if !self.pending_ready.is_empty() {
            return;
        }
        self.bomb_config_cache = None;
        for component in self.components.iter_mut() {
            component.config_cache = None;
        }
        info!("all components configured");
    }

    /// Every component asked to configure has acknowledged.
    pub fn configuration_done(&self) -> bool {
        self.pending_ready.is_empty()
    }

    /// Acknowledgements still outstanding.
    pub fn configuration_in_progress(&self) -> bool {
        !self.configuration_done()
    }

    // -------------------------------------------------------------------------
    // Game
    // -------------------------------------------------------------------------

    /// Start a game from any state.
    #[instrument(skip(self))]
    pub fn arm(&mut self) {
        self.timer.restart(self.timer_limit_ms.saturating_add(self.arm_grace_ms));
        self.timer.set_scale(timescale_for_strikes(0));
        self.strikes = 0;
        self.cause_of_explosion = None;
        self.pending_defusal = self
            .components
            .of_kind(ComponentKind::Module)
            .filter(|c| c.is_defusable())
            .map(|c| c.id)
            .collect();

        self.dispatch(BombEvent::Arm, Vec::new());
        self.state = BombState::InGame;
        info!(
            limit_ms = self.timer_limit_ms,
            defusable = self.pending_defusal.len(),
            "bomb armed"
        );

        // Capture the reference timestamp only
        let now = self.clock.ticks_ms();
        self.timer.update(now);
        self.sync.mark(now);
    }

    /// Record a strike. Explodes when the limit is reached.
    pub fn add_strike(&mut self, cause: &str) -> Result<(), GameError> {
        if self.state != BombState::InGame {
            return Err(GameError::NotInGame);
        }
        self.strikes = self.strikes.saturating_add(1);
        info!(strikes = self.strikes, limit = self.strike_limit, cause, "strike");

        if self.strikes >= self.strike_limit {
            self.explode(cause);
            return Ok(());
        }
        self.timer.set_scale(timescale_for_strikes(self.strikes));
        self.dispatch(BombEvent::Strike, strike_params(self.strikes));
        self.dispatch_timer_sync();
        self.force_status_report = true;
        Ok(())
    }

    /// Mark one module defused. Defuses the bomb once none remain.
    pub fn defuse_component(&mut self, id: DeviceId) -> Result<(), GameError> {
        if self.state != BombState::InGame {
            return Err(GameError::NotInGame);
        }
        if !self.pending_defusal.remove(&id) {
            return Err(GameError::NotPendingDefusal(id));
        }
        debug!(id = format_args!("{id:#010x}"), remaining = self.pending_defusal.len(), "component defused");
        if self.pending_defusal.is_empty() {
            self.defuse();
        }
        Ok(())
    }

    /// End the game in an explosion.
    pub fn explode(&mut self, cause: &str) {
        warn!(cause, "bomb exploded");
        self.state = BombState::Summary;
        self.cause_of_explosion = Some(cause.to_owned());
        self.dispatch(BombEvent::Explosion, Vec::new());
        self.force_status_report = true;
    }

    /// End the game defused.
    pub fn defuse(&mut self) {
        info!(remaining_ms = self.timer.remaining_ms(), "bomb defused");
        self.state = BombState::Summary;
        self.cause_of_explosion = None;
        self.dispatch(BombEvent::Defusal, Vec::new());
        self.force_status_report = true;
    }

    /// Back to IDLE.
    pub fn reset(&mut self) {
        self.dispatch(BombEvent::Reset, Vec::new());
        self.state = BombState::Idle;
    }

    /// Back to IDLE and ask the main cycle to stop.
    pub fn exit(&mut self) {
        self.reset();
        self.exit_requested = true;
    }

    /// One scheduler tick: advance the countdown and keep observers in sync.
    pub fn update(&mut self) {
        let now = self.clock.ticks_ms();
        if self.state == BombState::InGame {
            let update = self.timer.update(now);
            if let Some(remaining) = update.tick {
                self.dispatch(BombEvent::TimerTick, timer_tick_params(remaining));
            }
            if update.expired {
                self.explode(CAUSE_TIME_RAN_OUT);
            }
        }
        let running = self.state == BombState::InGame || self.configuration_in_progress();
        if running && self.sync.due(now) {
            self.dispatch_timer_sync();
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Lifecycle state.
    pub fn state(&self) -> BombState {
        self.state
    }

    /// Strikes so far.
    pub fn strikes(&self) -> u8 {
        self.strikes
    }

    /// Strikes until explosion.
    pub fn strike_limit(&self) -> u8 {
        self.strike_limit
    }

    /// Serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Seed derived from the serial.
    pub fn random_seed(&self) -> u32 {
        self.random_seed
    }

    /// Countdown length.
    pub fn timer_limit_ms(&self) -> u32 {
        self.timer_limit_ms
    }

    /// Remaining milliseconds at the last timer update.
    pub fn timer_int(&self) -> u32 {
        self.timer.remaining_ms()
    }

    /// Remaining milliseconds projected to now.
    pub fn real_remaining_ms(&self) -> u32 {
        if self.state == BombState::InGame {
            self.timer.real_remaining_ms(self.clock.ticks_ms())
        } else {
            self.timer.remaining_ms()
        }
    }

    /// Current timescale.
    pub fn timescale(&self) -> f32 {
        self.timer.scale()
    }

    /// Explosion cause, if the bomb exploded.
    pub fn cause_of_explosion(&self) -> Option<&str> {
        self.cause_of_explosion.as_deref()
    }

    /// Whether the last game ended in an explosion.
    pub fn has_exploded(&self) -> bool {
        self.cause_of_explosion.is_some()
    }

    /// Whether the game is in SUMMARY.
    pub fn has_game_ended(&self) -> bool {
        self.state == BombState::Summary
    }

    /// Modules still to defuse.
    pub fn pending_defusal(&self) -> &BTreeSet<DeviceId> {
        &self.pending_defusal
    }

    /// Devices yet to acknowledge configuration.
    pub fn pending_ready(&self) -> &BTreeSet<DeviceId> {
        &self.pending_ready
    }

    /// Read and clear the forced status report flag.
    pub fn take_force_status_report(&mut self) -> bool {
        std::mem::take(&mut self.force_status_report)
    }

    /// Whether exit was requested.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Most recent dispatched events, oldest first.
    pub fn recent_events(&self) -> impl Iterator<Item = &EventRecord> {
        self.recent_events.iter()
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::{basic_config, rig};
    use super::*;
    use crate::game::component::KindState;

    #[test]
    fn test_discover_resets_to_idle() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 60_000)).unwrap();
        r.bomb.arm();

        assert_eq!(r.bomb.discover_modules(), 3);
        assert_eq!(r.bomb.state(), BombState::Idle);
        assert!(r.bomb.configuration_done());
        assert_eq!(r.wires.1.event_ids().last(), Some(&BombEvent::Reset.id()));
        assert_eq!(r.label.1.event_ids().last(), Some(&BombEvent::Reset.id()));
    }

    #[test]
    fn test_configure_applies_values() {
        let mut r = rig();
        let (wires, label) = (r.wires.0, r.label.0);
        let mut config = basic_config(3, 300_000);
        config
            .components
            .insert(wires, BTreeMap::from([("Color".to_string(), json!("blue")), ("Count".to_string(), json!(4))]));
        config.components.insert(
            label,
            BTreeMap::from([("Text".to_string(), json!("CAR")), ("IsLit".to_string(), json!(true))]),
        );
        r.bomb.configure(config).unwrap();

        assert_eq!(r.bomb.serial(), "AB1234");
        assert_eq!(r.bomb.random_seed(), str_hash("AB1234"));
        assert_eq!(r.bomb.timer_int(), 300_000);
        let w = r.bomb.component(wires).unwrap();
        assert_eq!(w.variables[0].value, Some(VariableValue::Text("Blue".into())));
        assert_eq!(w.variables[1].value, Some(VariableValue::Int(4)));
        assert!(matches!(
            &r.bomb.component(label).unwrap().state,
            KindState::Label { chosen: Some(t), lit: true, .. } if t == "CAR"
        ));
        assert!(r.wires.1.event_ids().contains(&BombEvent::Configure.id()));
    }

    #[test]
    fn test_invalid_config_changes_nothing() {
        let mut r = rig();
        let wires = r.wires.0;
        let mut config = basic_config(0, 1_000);
        config.serial = Some("ab12".into());
        config
            .components
            .insert(wires, BTreeMap::from([("Color".to_string(), json!("green"))]));
        config.components.insert(0x7F, BTreeMap::new());

        let err = r.bomb.configure(config).unwrap_err();
        let GameError::Config(ConfigError { fields }) = err else {
            panic!("expected config error");
        };
        assert_eq!(
            fields,
            vec![
                "bomb.strikes".to_string(),
                "bomb.serial".to_string(),
                "module.127".to_string(),
                format!("module.{wires}.Color"),
            ]
        );
        assert_eq!(r.bomb.serial(), DEFAULT_SERIAL);
        assert!(r.bomb.component(wires).unwrap().variables[0].value.is_none());
        assert!(!r.wires.1.event_ids().contains(&BombEvent::Configure.id()));
    }

    #[test]
    fn test_oversized_blob_changes_nothing() {
        use crate::bus::handshake::{Handshake, KindDescriptor, ModuleFlags};
        use crate::bus::virtual_device::testing::RecordingComponent;

        let mut r = rig();
        for name in ["BigA", "BigB"] {
            let bulky = RecordingComponent::new(Handshake::new(
                BombEvent::Configure.mask(),
                KindDescriptor::Module {
                    name: name.into(),
                    flags: ModuleFlags::DEFUSABLE,
                    extra: Some(vec![0xAB; 40_000]),
                },
            ));
            r.bomb.add_virtual_device(Box::new(bulky)).unwrap();
        }
        let (limit, strikes) = (r.bomb.timer_limit_ms(), r.bomb.strike_limit());
        let wires = r.wires.0;
        let mut config = basic_config(5, 123_000);
        config
            .components
            .insert(wires, BTreeMap::from([("Color".to_string(), json!("blue"))]));

        let err = r.bomb.configure(config).unwrap_err();
        assert!(matches!(err, GameError::Blob(CodecError::Overflow16(_))));
        assert_eq!(r.bomb.serial(), DEFAULT_SERIAL);
        assert_eq!(r.bomb.timer_limit_ms(), limit);
        assert_eq!(r.bomb.strike_limit(), strikes);
        assert!(r.bomb.component(wires).unwrap().variables[0].value.is_none());
        assert!(r.bomb.components().iter().all(|c| c.config_cache.is_none()));
        assert!(r.bomb.pending_ready().is_empty());
        assert!(!r.wires.1.event_ids().contains(&BombEvent::Configure.id()));
    }

    #[test]
    fn test_generated_serial_seeds() {
        let mut r = rig();
        let mut config = basic_config(3, 1_000);
        config.serial = None;
        r.bomb.configure(config).unwrap();
        assert!(is_valid_serial(r.bomb.serial()));
        assert_eq!(r.bomb.random_seed(), str_hash(r.bomb.serial()));
    }

    #[test]
    fn test_acknowledgements_release_blobs() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 300_000)).unwrap();
        assert!(r.bomb.configuration_in_progress());
        assert_eq!(r.bomb.pending_ready().len(), 3);
        assert!(r.bomb.component(r.wires.0).unwrap().config_cache.is_some());

        for id in [r.wires.0, r.simon.0, r.label.0] {
            r.bomb.device_ready(id).unwrap();
        }
        assert!(r.bomb.configuration_done());
        assert!(r.bomb.components().iter().all(|c| c.config_cache.is_none()));

        // Rebuilt on demand after release
        let blob = r.bomb.component_config(r.wires.0).unwrap();
        assert_eq!(u16::from_le_bytes([blob[0], blob[1]]) as usize, blob.len() - 2);
        assert!(matches!(r.bomb.device_ready(r.wires.0), Err(GameError::NotPendingReady(_))));
    }

    #[test]
    fn test_three_strikes_explode() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 300_000)).unwrap();
        r.bomb.arm();

        r.bomb.add_strike("Wires").unwrap();
        assert_eq!(r.bomb.timescale(), 1.25);
        assert!(r.bomb.take_force_status_report());
        assert!(!r.bomb.take_force_status_report());
        r.bomb.add_strike("Wires").unwrap();
        assert_eq!(r.bomb.state(), BombState::InGame);
        r.bomb.add_strike("Simon").unwrap();

        assert_eq!(r.bomb.state(), BombState::Summary);
        assert!(r.bomb.has_exploded());
        assert!(r.bomb.has_game_ended());
        assert_eq!(r.bomb.cause_of_explosion(), Some("Simon"));

        let log = r.wires.1.log.lock();
        let strikes: Vec<&Vec<u8>> = log
            .events
            .iter()
            .filter(|(id, _)| *id == BombEvent::Strike.id())
            .map(|(_, p)| p)
            .collect();
        assert_eq!(strikes, vec![&vec![1], &vec![2]]);
        assert_eq!(log.events.last().map(|e| e.0), Some(BombEvent::Explosion.id()));
        drop(log);

        assert!(matches!(r.bomb.add_strike("late"), Err(GameError::NotInGame)));
    }

    #[test]
    fn test_arm_from_any_state() {
        let mut r = rig();
        r.bomb.configure(basic_config(2, 60_000)).unwrap();
        r.bomb.arm();
        r.bomb.add_strike("x").unwrap();
        r.bomb.add_strike("x").unwrap();
        assert_eq!(r.bomb.state(), BombState::Summary);

        r.bomb.arm();
        assert_eq!(r.bomb.state(), BombState::InGame);
        assert_eq!(r.bomb.strikes(), 0);
        assert_eq!(r.bomb.timescale(), 1.0);
        assert!(!r.bomb.has_exploded());
        assert_eq!(r.bomb.timer_int(), 60_200);
    }

    #[test]
    fn test_defusing_last_module() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 60_000)).unwrap();
        r.bomb.arm();
        assert_eq!(r.bomb.pending_defusal().len(), 2);

        r.bomb.defuse_component(r.wires.0).unwrap();
        assert!(matches!(
            r.bomb.defuse_component(r.wires.0),
            Err(GameError::NotPendingDefusal(_))
        ));
        // Labels are never pending
        assert!(r.bomb.defuse_component(r.label.0).is_err());
        r.bomb.defuse_component(r.simon.0).unwrap();

        assert_eq!(r.bomb.state(), BombState::Summary);
        assert!(!r.bomb.has_exploded());
        assert!(r.simon.1.event_ids().contains(&BombEvent::Defusal.id()));
    }

    #[test]
    fn test_timer_runs_out_once() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 1_000)).unwrap();
        r.bomb.arm();

        r.clock.advance(700);
        r.bomb.update();
        assert_eq!(r.bomb.timer_int(), 500);
        assert_eq!(r.bomb.state(), BombState::InGame);

        r.clock.advance(600);
        r.bomb.update();
        assert_eq!(r.bomb.state(), BombState::Summary);
        assert_eq!(r.bomb.cause_of_explosion(), Some(CAUSE_TIME_RAN_OUT));

        r.clock.advance(600);
        r.bomb.update();
        let explosions = r
            .wires
            .1
            .event_ids()
            .into_iter()
            .filter(|&id| id == BombEvent::Explosion.id())
            .count();
        assert_eq!(explosions, 1);
    }

    #[test]
    fn test_ticks_and_periodic_sync() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 10_000)).unwrap();
        for id in [r.wires.0, r.simon.0, r.label.0] {
            r.bomb.device_ready(id).unwrap();
        }
        r.bomb.arm();

        r.clock.advance(1_000);
        r.bomb.update();
        let last = r.wires.1.log.lock().events.last().cloned();
        assert_eq!(last, Some((BombEvent::TimerTick.id(), 9_200u32.to_le_bytes().to_vec())));

        r.clock.advance(4_000);
        r.bomb.update();
        let syncs = r
            .wires
            .1
            .event_ids()
            .into_iter()
            .filter(|&id| id == BombEvent::TimerSync.id())
            .count();
        assert_eq!(syncs, 1);
    }

    #[test]
    fn test_idle_and_configured_sends_no_sync() {
        let mut r = rig();
        r.clock.advance(20_000);
        r.bomb.update();
        assert!(!r.wires.1.event_ids().contains(&BombEvent::TimerSync.id()));
    }

    #[test]
    fn test_remove_virtual_device_purges() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 60_000)).unwrap();
        r.bomb.device_ready(r.wires.0).unwrap();
        r.bomb.device_ready(r.simon.0).unwrap();

        assert!(r.bomb.remove_virtual_device(r.label.0));
        assert!(r.bomb.component(r.label.0).is_none());
        assert_eq!(r.bomb.components().count(ComponentKind::Label), 0);
        assert!(r.bomb.configuration_done());
        assert!(r.bomb.bomb_config().is_ok());
    }

    #[test]
    fn test_device_event_ignores_mask() {
        let mut r = rig();
        let label = r.label.0;
        r.bomb.device_event(label, BombEvent::ConfigLight, vec![1]).unwrap();
        assert_eq!(r.label.1.log.lock().events, vec![(BombEvent::ConfigLight.id(), vec![1])]);
        assert!(r.bomb.device_event(0x55, BombEvent::ConfigLight, vec![0]).is_err());
    }
}
