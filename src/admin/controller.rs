//! Admin Controller
//!
//! Command interface and status queries for the admin layer. Every command
//! locks the bomb for its whole duration; the bus lock is taken inside the
//! bomb's own operations, so the lock order is always bomb then bus.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::protocol::{
    AdminCommand, AdminResponse, AutoconfRequest, ComponentInfo, DebugEventKind, PairRequest, StatusReport, SummaryInfo,
};
use super::services::{ServiceError, ServiceRegistry};
use crate::bus::handshake::VariableType;
use crate::bus::protocol::DeviceId;
use crate::core::hash::str_hash;
use crate::core::rng::DeterministicRng;
use crate::game::bomb::{Bomb, BombConfig, ConfigError, GameError};
use crate::game::component::ComponentHandle;
use crate::game::events::{config_light_params, BombEvent};
use crate::game::serial::{generate_serial, SERIAL_CHARS};

/// Cause recorded for injected strikes and explosions.
pub const DEBUG_CAUSE: &str = "Debug event";
/// Default autoconf countdown.
pub const DEFAULT_TIME_LIMIT_MS: u32 = 300_000;
/// Default autoconf strike limit.
pub const DEFAULT_STRIKES: u8 = 3;

const AUTOCONF_INT_RANGE: (i32, i32) = (0, 9);
const AUTOCONF_STR_LEN: usize = 5;

/// Admin command errors.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Game operation failed.
    #[error(transparent)]
    Game(#[from] GameError),

    /// Pairing failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<ConfigError> for AdminError {
    fn from(e: ConfigError) -> Self {
        Self::Game(GameError::Config(e))
    }
}

// =============================================================================
// FORM AND AUTOCONF
// =============================================================================

/// Turn the flat configure form into a [`BombConfig`].
///
/// Every field is checked before anything is returned; a missing or
/// unparsable field is reported by name.
pub fn parse_form(bomb: &Bomb, form: &Map<String, Value>) -> Result<BombConfig, ConfigError> {
    let mut fields = Vec::new();

    let time_limit_ms = form_number(form, "bomb.timer").and_then(|v| u32::try_from(v).ok());
    if time_limit_ms.is_none() {
        fields.push("bomb.timer".to_owned());
    }
    let strikes = form_number(form, "bomb.strikes").and_then(|v| u8::try_from(v).ok());
    if strikes.is_none() {
        fields.push("bomb.strikes".to_owned());
    }
    let serial = match form.get("bomb.serial") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.to_uppercase()),
        _ => None,
    };

    let mut components = BTreeMap::new();
    for component in bomb.components().iter() {
        let mut values = BTreeMap::new();
        for (key, _) in component.config_keys() {
            let field = format!("module.{}.{}", component.id, key);
            match form.get(&field) {
                Some(Value::Null) | None => fields.push(field),
                Some(raw) => {
                    values.insert(key, raw.clone());
                }
            }
        }
        components.insert(component.id, values);
    }

    match (time_limit_ms, strikes) {
        (Some(time_limit_ms), Some(strikes)) if fields.is_empty() => Ok(BombConfig {
            time_limit_ms,
            strikes,
            serial,
            components,
        }),
        _ => Err(ConfigError { fields }),
    }
}

fn form_number(form: &Map<String, Value>, key: &str) -> Option<u64> {
    match form.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Generate a configuration whose random choices all derive from `serial`.
pub fn generate_config(bomb: &Bomb, serial: &str, time_limit_ms: u32, strikes: u8) -> BombConfig {
    let mut rng = DeterministicRng::new(str_hash(serial) as u64);
    let components = bomb
        .components()
        .iter()
        .map(|component| (component.id, autoconf_component(component, &mut rng)))
        .collect();
    BombConfig {
        time_limit_ms,
        strikes,
        serial: Some(serial.to_owned()),
        components,
    }
}

fn autoconf_component(component: &ComponentHandle, rng: &mut DeterministicRng) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    for (key, ty) in component.config_keys() {
        let value = match ty {
            VariableType::Null => continue,
            VariableType::Bool => Value::Bool(rng.next_bool()),
            VariableType::Int | VariableType::Long => {
                Value::from(rng.next_int_range(AUTOCONF_INT_RANGE.0, AUTOCONF_INT_RANGE.1))
            }
            VariableType::Str => {
                let text: String = (0..AUTOCONF_STR_LEN)
                    .filter_map(|_| rng.choose(&SERIAL_CHARS[..25]).copied())
                    .collect();
                Value::String(text)
            }
            VariableType::StrEnum => match component.key_options(&key).and_then(|o| rng.choose(o)) {
                Some(option) => Value::String(option.clone()),
                None => {
                    warn!(id = component.id, key = %key, "string-enum variable without options");
                    continue;
                }
            },
        };
        values.insert(key, value);
    }
    values
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Entry point for the admin layer.
pub struct AdminController {
    bomb: Arc<Mutex<Bomb>>,
    services: ServiceRegistry,
}

impl AdminController {
    /// Controller over the shared bomb.
    pub fn new(bomb: Arc<Mutex<Bomb>>, services: ServiceRegistry) -> Self {
        Self { bomb, services }
    }

    /// Run a command and map failures into a response.
    pub fn handle(&self, command: AdminCommand) -> AdminResponse {
        match self.execute(command) {
            Ok(response) => response,
            Err(AdminError::Game(GameError::Config(ConfigError { fields }))) => AdminResponse::InvalidFields { fields },
            Err(e) => {
                warn!("admin command failed: {}", e);
                AdminResponse::Error { message: e.to_string() }
            }
        }
    }

    /// Run a command.
    #[instrument(skip(self))]
    pub fn execute(&self, command: AdminCommand) -> Result<AdminResponse, AdminError> {
        let mut bomb = self.bomb.lock();
        let response = match command {
            AdminCommand::Discover => {
                let components = bomb.discover_modules();
                AdminResponse::Discovered { components }
            }
            AdminCommand::Configure { form } => {
                let config = parse_form(&bomb, &form)?;
                bomb.configure(config)?;
                AdminResponse::Ok
            }
            AdminCommand::Autoconf(request) => {
                let config = autoconf(&bomb, request);
                bomb.configure(config.clone())?;
                AdminResponse::Configured { config }
            }
            AdminCommand::AutoconfLight { device_id, is_on } => {
                bomb.device_event(device_id, BombEvent::ConfigLight, config_light_params(is_on))?;
                AdminResponse::Ok
            }
            AdminCommand::Arm => {
                bomb.arm();
                AdminResponse::Ok
            }
            AdminCommand::Reset => {
                bomb.reset();
                AdminResponse::Ok
            }
            AdminCommand::Exit => {
                bomb.exit();
                AdminResponse::Ok
            }
            AdminCommand::DebugEvent { event } => {
                match event {
                    DebugEventKind::Strike => bomb.add_strike(DEBUG_CAUSE)?,
                    DebugEventKind::Defuse => bomb.defuse(),
                    DebugEventKind::Explode => bomb.explode(DEBUG_CAUSE),
                }
                AdminResponse::Ok
            }
            AdminCommand::Pair(request) => {
                let devices = self.pair(&mut bomb, request)?;
                AdminResponse::Paired { devices }
            }
            AdminCommand::ListModules => AdminResponse::Modules {
                modules: list_modules(&bomb),
            },
            AdminCommand::State => AdminResponse::State { state: bomb.state() },
            AdminCommand::GameState => AdminResponse::GameState {
                timer: bomb.timer_int(),
                strikes: bomb.strikes(),
            },
            AdminCommand::BombInfo => AdminResponse::BombInfo {
                serial: bomb.serial().to_owned(),
            },
            AdminCommand::Summary => AdminResponse::Summary(SummaryInfo::of(&bomb)),
            AdminCommand::ConfiguredCheck => AdminResponse::ConfiguredCheck {
                configured: bomb.configuration_done(),
            },
        };
        Ok(response)
    }

    fn pair(&self, bomb: &mut Bomb, request: PairRequest) -> Result<Vec<DeviceId>, AdminError> {
        let mut devices = Vec::with_capacity(request.device_capabilities.len());
        for capability in &request.device_capabilities {
            let device = self.services.create(capability, &request.network_address)?;
            let id = bomb.add_virtual_device(device)?;
            info!(capability = %capability, address = %request.network_address, id, "service paired");
            devices.push(id);
        }
        Ok(devices)
    }

    /// Current status snapshot.
    pub fn status_report(&self) -> StatusReport {
        StatusReport::of(&self.bomb.lock())
    }
}

fn autoconf(bomb: &Bomb, request: AutoconfRequest) -> BombConfig {
    let serial = match request.serial.filter(|s| !s.is_empty()) {
        Some(serial) => serial.to_uppercase(),
        None => generate_serial(&mut DeterministicRng::from_entropy()),
    };
    generate_config(
        bomb,
        &serial,
        request.time_limit.unwrap_or(DEFAULT_TIME_LIMIT_MS),
        request.strikes.unwrap_or(DEFAULT_STRIKES),
    )
}

/// Components shown to the admin. Names starting with `$` are hidden.
pub fn list_modules(bomb: &Bomb) -> Vec<ComponentInfo> {
    bomb.components()
        .iter()
        .filter(|c| !c.name().starts_with('$'))
        .map(ComponentInfo::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::game::bomb::testing::rig;
    use crate::game::bomb::BombState;
    use crate::game::component::{KindState, VariableValue};

    fn controller() -> AdminController {
        AdminController::new(Arc::new(Mutex::new(rig().bomb)), ServiceRegistry::new())
    }

    fn full_form(bomb: &Bomb) -> Map<String, Value> {
        let mut form = Map::new();
        form.insert("bomb.timer".into(), json!(120_000));
        form.insert("bomb.strikes".into(), json!("3"));
        form.insert("bomb.serial".into(), json!("xk4q27"));
        for c in bomb.components().iter() {
            for (key, ty) in c.config_keys() {
                let value = match ty {
                    VariableType::Bool => json!(true),
                    VariableType::StrEnum => json!(c.key_options(&key).unwrap()[0].clone()),
                    _ => json!(1),
                };
                form.insert(format!("module.{}.{}", c.id, key), value);
            }
        }
        form
    }

    #[test]
    fn test_parse_form_complete() {
        let r = rig();
        let config = parse_form(&r.bomb, &full_form(&r.bomb)).unwrap();
        assert_eq!(config.time_limit_ms, 120_000);
        assert_eq!(config.strikes, 3);
        assert_eq!(config.serial.as_deref(), Some("XK4Q27"));
        assert_eq!(config.components.len(), 3);
        assert_eq!(config.components[&r.label.0].len(), 2);
    }

    #[test]
    fn test_parse_form_reports_every_missing_field() {
        let r = rig();
        let mut form = full_form(&r.bomb);
        form.remove("bomb.timer");
        form.insert("bomb.strikes".into(), json!("many"));
        form.remove(&format!("module.{}.Count", r.wires.0));

        let err = parse_form(&r.bomb, &form).unwrap_err();
        assert_eq!(
            err.fields,
            vec![
                "bomb.timer".to_string(),
                "bomb.strikes".to_string(),
                format!("module.{}.Count", r.wires.0),
            ]
        );
    }

    #[test]
    fn test_autoconf_is_seeded_by_serial() {
        let r = rig();
        let a = generate_config(&r.bomb, "AB1234", 60_000, 3);
        let b = generate_config(&r.bomb, "AB1234", 60_000, 3);
        assert_eq!(a, b);

        let label = &a.components[&r.label.0];
        let text = label["Text"].as_str().unwrap();
        assert!(text == "FRK" || text == "CAR");
        let count = a.components[&r.wires.0]["Count"].as_i64().unwrap();
        assert!((0..=9).contains(&count));

        // The generated config is always valid
        assert!(r.bomb.validate(&a).is_ok());
    }

    #[test]
    fn test_configure_through_controller() {
        let mut r = rig();
        let form = full_form(&r.bomb);
        let config = parse_form(&r.bomb, &form).unwrap();
        r.bomb.configure(config).unwrap();
        assert!(matches!(
            &r.bomb.component(r.label.0).unwrap().state,
            KindState::Label { chosen: Some(t), lit: true, .. } if t == "FRK"
        ));
        assert_eq!(
            r.bomb.component(r.wires.0).unwrap().variables[1].value,
            Some(VariableValue::Int(1))
        );
    }

    #[test]
    fn test_commands() {
        let admin = controller();

        let response = admin.handle(AdminCommand::Autoconf(AutoconfRequest {
            serial: Some("ab1234".into()),
            time_limit: Some(90_000),
            strikes: None,
        }));
        let AdminResponse::Configured { config } = response else {
            panic!("expected configured, got {response:?}");
        };
        assert_eq!(config.serial.as_deref(), Some("AB1234"));
        assert_eq!(config.strikes, DEFAULT_STRIKES);
        assert_eq!(
            admin.handle(AdminCommand::ConfiguredCheck),
            AdminResponse::ConfiguredCheck { configured: false }
        );

        assert_eq!(admin.handle(AdminCommand::Arm), AdminResponse::Ok);
        assert_eq!(
            admin.handle(AdminCommand::State),
            AdminResponse::State {
                state: BombState::InGame
            }
        );
        admin.handle(AdminCommand::DebugEvent {
            event: DebugEventKind::Explode,
        });
        let AdminResponse::Summary(summary) = admin.handle(AdminCommand::Summary) else {
            panic!("expected summary");
        };
        assert!(summary.exploded);
        assert_eq!(summary.cause_of_explosion.as_deref(), Some(DEBUG_CAUSE));

        let report = admin.status_report();
        assert!(report.ended);
        assert_eq!(report.serial, "AB1234");

        assert_eq!(admin.handle(AdminCommand::Exit), AdminResponse::Ok);
        assert!(admin.bomb.lock().exit_requested());
    }

    #[test]
    fn test_invalid_configure_lists_fields() {
        let admin = controller();
        let response = admin.handle(AdminCommand::Configure { form: Map::new() });
        let AdminResponse::InvalidFields { fields } = response else {
            panic!("expected invalid fields");
        };
        assert!(fields.contains(&"bomb.timer".to_string()));
        assert!(fields.iter().any(|f| f.ends_with(".Color")));
    }

    #[test]
    fn test_pairing_hides_service() {
        let r = rig();
        let bomb = Arc::new(Mutex::new(r.bomb));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut services = ServiceRegistry::new();
        services.register_forwarder("audio", BombEvent::Arm.mask(), tx);
        let admin = AdminController::new(Arc::clone(&bomb), services);

        let response = admin.handle(AdminCommand::Pair(PairRequest {
            device_capabilities: vec!["audio".into()],
            network_address: "10.0.0.7".into(),
        }));
        let AdminResponse::Paired { devices } = response else {
            panic!("expected paired");
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(bomb.lock().components().len(), 4);

        let AdminResponse::Modules { modules } = admin.handle(AdminCommand::ListModules) else {
            panic!("expected modules");
        };
        assert_eq!(modules.len(), 3);
        assert!(modules.iter().all(|m| m.id != devices[0]));

        admin.handle(AdminCommand::Arm);
        assert_eq!(rx.try_recv().unwrap().event_id, BombEvent::Arm.id());

        let response = admin.handle(AdminCommand::Pair(PairRequest {
            device_capabilities: vec!["lasers".into()],
            network_address: "10.0.0.8".into(),
        }));
        assert!(matches!(response, AdminResponse::Error { .. }));
    }

    #[test]
    fn test_config_light_reaches_one_device() {
        let r = rig();
        let label = r.label.0;
        let log = r.label.1.log.clone();
        let admin = AdminController::new(Arc::new(Mutex::new(r.bomb)), ServiceRegistry::new());
        assert_eq!(
            admin.handle(AdminCommand::AutoconfLight {
                device_id: label,
                is_on: true
            }),
            AdminResponse::Ok
        );
        assert_eq!(log.lock().events, vec![(BombEvent::ConfigLight.id(), vec![1])]);
    }
}
