//! Built-in Request Handlers
//!
//! Requests every peripheral firmware can make of the bomb. Names are hashed
//! at compile time so firmware and controller agree on the ids.

use anyhow::Context;
use tracing::warn;

use crate::bus::protocol::DeviceId;
use crate::core::codec::{CodecError, DataInput};
use crate::core::hash::{str_hash, IdHash};
use crate::dispatch::engine::Dispatcher;
use crate::dispatch::handler::RequestHandler;
use crate::game::bomb::Bomb;

/// `GetStrikes`: `[u8 strikes]`.
pub const GET_STRIKES: IdHash = str_hash("GetStrikes");
/// `GetClock`: `u32` remaining milliseconds.
pub const GET_CLOCK: IdHash = str_hash("GetClock");
/// `AckReadyToArm`: caller finished loading its configuration.
pub const ACK_READY_TO_ARM: IdHash = str_hash("AckReadyToArm");
/// `GetBombConfig`: packaged bomb blob.
pub const GET_BOMB_CONFIG: IdHash = str_hash("GetBombConfig");
/// `GetComponentConfigByBusAddress`: caller's packaged component blob.
pub const GET_COMPONENT_CONFIG: IdHash = str_hash("GetComponentConfigByBusAddress");
/// `AddStrike`: caller made a mistake.
pub const ADD_STRIKE: IdHash = str_hash("AddStrike");
/// `DefuseComponent`: caller was solved.
pub const DEFUSE_COMPONENT: IdHash = str_hash("DefuseComponent");

/// Request carrying only the calling device.
#[derive(Debug, Default, Clone, Copy)]
pub struct FromDevice {
    /// Calling device.
    pub device: DeviceId,
}

fn caller(device: DeviceId) -> Result<FromDevice, CodecError> {
    Ok(FromDevice { device })
}

struct GetStrikes;

impl RequestHandler<Bomb> for GetStrikes {
    type Request = ();

    fn respond(&self, bomb: &Bomb, _request: &()) -> Vec<u8> {
        vec![bomb.strikes()]
    }
}

struct GetClock;

impl RequestHandler<Bomb> for GetClock {
    type Request = ();

    fn respond(&self, bomb: &Bomb, _request: &()) -> Vec<u8> {
        bomb.timer_int().to_le_bytes().to_vec()
    }
}

struct AckReadyToArm;

impl RequestHandler<Bomb> for AckReadyToArm {
    type Request = FromDevice;

    fn decode(&self, _bomb: &Bomb, device: DeviceId, _input: &mut DataInput<'_>) -> Result<FromDevice, CodecError> {
        caller(device)
    }

    fn execute(&self, bomb: &mut Bomb, request: &mut FromDevice) -> anyhow::Result<()> {
        bomb.device_ready(request.device)?;
        Ok(())
    }
}

struct GetBombConfig;

impl RequestHandler<Bomb> for GetBombConfig {
    type Request = ();

    fn respond(&self, bomb: &Bomb, _request: &()) -> Vec<u8> {
        bomb.bomb_config().unwrap_or_else(|e| {
            warn!("bomb config unavailable: {}", e);
            Vec::new()
        })
    }
}

struct GetComponentConfig;

impl RequestHandler<Bomb> for GetComponentConfig {
    type Request = FromDevice;

    fn decode(&self, _bomb: &Bomb, device: DeviceId, _input: &mut DataInput<'_>) -> Result<FromDevice, CodecError> {
        caller(device)
    }

    fn respond(&self, bomb: &Bomb, request: &FromDevice) -> Vec<u8> {
        bomb.component_config(request.device).unwrap_or_else(|e| {
            warn!(device = format_args!("{:#010x}", request.device), "component config unavailable: {}", e);
            Vec::new()
        })
    }
}

struct AddStrike;

impl RequestHandler<Bomb> for AddStrike {
    type Request = FromDevice;

    fn decode(&self, _bomb: &Bomb, device: DeviceId, _input: &mut DataInput<'_>) -> Result<FromDevice, CodecError> {
        caller(device)
    }

    fn execute(&self, bomb: &mut Bomb, request: &mut FromDevice) -> anyhow::Result<()> {
        let cause = bomb
            .component(request.device)
            .map(|c| c.name())
            .unwrap_or_else(|| format!("{:#010x}", request.device));
        bomb.add_strike(&cause)
            .with_context(|| format!("strike from {cause}"))
    }
}

struct DefuseComponent;

impl RequestHandler<Bomb> for DefuseComponent {
    type Request = FromDevice;

    fn decode(&self, _bomb: &Bomb, device: DeviceId, _input: &mut DataInput<'_>) -> Result<FromDevice, CodecError> {
        caller(device)
    }

    fn execute(&self, bomb: &mut Bomb, request: &mut FromDevice) -> anyhow::Result<()> {
        bomb.defuse_component(request.device)?;
        Ok(())
    }
}

/// Register every built-in handler.
pub fn register_builtin_handlers(dispatcher: &mut Dispatcher<Bomb>) {
    dispatcher.register("GetStrikes", GetStrikes);
    dispatcher.register("GetClock", GetClock);
    dispatcher.register("AckReadyToArm", AckReadyToArm);
    dispatcher.register("GetBombConfig", GetBombConfig);
    dispatcher.register("GetComponentConfigByBusAddress", GetComponentConfig);
    dispatcher.register("AddStrike", AddStrike);
    dispatcher.register("DefuseComponent", DefuseComponent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::virtual_device::QueuedRequest;
    use crate::game::bomb::testing::{basic_config, rig};
    use crate::game::bomb::BombState;
    use crate::game::events::BombEvent;

    fn dispatcher() -> Dispatcher<Bomb> {
        let mut dispatcher = Dispatcher::new();
        register_builtin_handlers(&mut dispatcher);
        dispatcher
    }

    fn call(channel: u8, command: IdHash) -> QueuedRequest {
        QueuedRequest {
            channel,
            command,
            params: Vec::new(),
        }
    }

    #[test]
    fn test_ids_match_names() {
        let d = dispatcher();
        assert_eq!(d.handlers().len(), 7);
        for id in [
            GET_STRIKES,
            GET_CLOCK,
            ACK_READY_TO_ARM,
            GET_BOMB_CONFIG,
            GET_COMPONENT_CONFIG,
            ADD_STRIKE,
            DEFUSE_COMPONENT,
        ] {
            assert!(d.handlers().get(id).is_some());
        }
    }

    #[test]
    fn test_configuration_round() {
        let mut r = rig();
        let d = dispatcher();
        r.bomb.configure(basic_config(3, 300_000)).unwrap();

        r.wires.1.queue(vec![call(1, GET_BOMB_CONFIG), call(2, GET_COMPONENT_CONFIG), call(3, ACK_READY_TO_ARM)]);
        let report = d.sync(&mut r.bomb);
        assert_eq!(report.executed, 3);
        assert!(!r.bomb.pending_ready().contains(&r.wires.0));

        let responses = r.wires.1.log.lock().responses.clone();
        assert_eq!(responses.len(), 3);
        let bomb_blob = &responses[0].1;
        assert_eq!(u16::from_le_bytes([bomb_blob[0], bomb_blob[1]]) as usize, bomb_blob.len() - 2);
        let mut input = DataInput::new(&bomb_blob[2..]);
        assert_eq!(input.read_u32().unwrap(), str_hash("AB1234"));
        assert_eq!(input.read_bytes(6).unwrap(), b"AB1234");

        // Module blob starts with its variable count
        let own = &responses[1].1;
        assert_eq!(&own[2..4], &[2, 0]);
    }

    #[test]
    fn test_strike_from_handler_reenters_bus() {
        let mut r = rig();
        let d = dispatcher();
        r.bomb.configure(basic_config(3, 300_000)).unwrap();
        r.bomb.arm();

        r.simon.1.queue(vec![call(7, ADD_STRIKE), call(8, GET_STRIKES)]);
        let report = d.sync(&mut r.bomb);
        assert_eq!(report.executed, 2);
        assert_eq!(r.bomb.strikes(), 1);

        // STRIKE went out during the cycle; GetStrikes answered after execute
        assert!(r.wires.1.event_ids().contains(&BombEvent::Strike.id()));
        let responses = r.simon.1.log.lock().responses.clone();
        assert_eq!(responses, vec![(7, vec![]), (8, vec![1])]);
    }

    #[test]
    fn test_defuse_all_through_handlers() {
        let mut r = rig();
        let d = dispatcher();
        r.bomb.configure(basic_config(3, 300_000)).unwrap();
        r.bomb.arm();

        r.wires.1.queue(vec![call(1, DEFUSE_COMPONENT)]);
        r.simon.1.queue(vec![call(1, DEFUSE_COMPONENT), call(2, GET_CLOCK)]);
        let report = d.sync(&mut r.bomb);
        assert_eq!(report.execute_failures, 0);
        assert_eq!(r.bomb.state(), BombState::Summary);
        assert!(!r.bomb.has_exploded());

        let clock = r.simon.1.log.lock().responses[1].1.clone();
        assert_eq!(clock, r.bomb.timer_int().to_le_bytes().to_vec());
    }

    #[test]
    fn test_failed_execute_still_answered() {
        let mut r = rig();
        let d = dispatcher();
        // Not in game
        r.wires.1.queue(vec![call(4, ADD_STRIKE)]);
        let report = d.sync(&mut r.bomb);
        assert_eq!(report.execute_failures, 1);
        assert_eq!(r.wires.1.log.lock().responses, vec![(4, vec![])]);
    }
}
