//! Admin Messages
//!
//! JSON messages between the admin layer and the controller. The admin
//! transport itself lives outside this crate; it only has to carry these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bus::handshake::VariableDecl;
use crate::bus::protocol::DeviceId;
use crate::game::bomb::{Bomb, BombConfig, BombState};
use crate::game::component::{ComponentHandle, ComponentKind};

// =============================================================================
// ADMIN -> CONTROLLER
// =============================================================================

/// Commands accepted from the admin layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Rescan the bus and handshake every device.
    Discover,

    /// Configure from form fields (`bomb.timer`, `module.<id>.<var>`, ...).
    Configure {
        /// Raw form fields.
        form: Map<String, Value>,
    },

    /// Generate and apply a configuration.
    Autoconf(AutoconfRequest),

    /// Toggle one device's identify light.
    AutoconfLight {
        /// Target device.
        device_id: DeviceId,
        /// Light state.
        is_on: bool,
    },

    /// Start the game.
    Arm,

    /// Back to idle.
    Reset,

    /// Stop the controller.
    Exit,

    /// Inject a game event.
    DebugEvent {
        /// What to inject.
        event: DebugEventKind,
    },

    /// Attach networked services as virtual devices.
    Pair(PairRequest),

    /// Visible components.
    ListModules,

    /// Lifecycle state.
    State,

    /// Timer and strikes.
    GameState,

    /// Serial number.
    BombInfo,

    /// Result of the last game.
    Summary,

    /// Whether every component acknowledged its configuration.
    ConfiguredCheck,
}

/// Autoconfiguration request. Missing fields use defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoconfRequest {
    /// Serial to derive everything from.
    #[serde(default)]
    pub serial: Option<String>,
    /// Countdown length in milliseconds.
    #[serde(default)]
    pub time_limit: Option<u32>,
    /// Strike limit.
    #[serde(default)]
    pub strikes: Option<u8>,
}

/// Injectable debug events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugEventKind {
    /// One strike.
    Strike,
    /// Defuse immediately.
    Defuse,
    /// Explode immediately.
    Explode,
}

/// Pairing request from a networked service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRequest {
    /// Capability names the service offers.
    pub device_capabilities: Vec<String>,
    /// Where the service can be reached.
    pub network_address: String,
}

// =============================================================================
// CONTROLLER -> ADMIN
// =============================================================================

/// Replies to [`AdminCommand`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminResponse {
    /// Done, nothing to report.
    Ok,

    /// Failed.
    Error {
        /// Human-readable reason.
        message: String,
    },

    /// Configuration rejected.
    InvalidFields {
        /// Offending field names.
        fields: Vec<String>,
    },

    /// Discovery finished.
    Discovered {
        /// Components found.
        components: usize,
    },

    /// Generated configuration that was applied.
    Configured {
        /// The configuration.
        config: BombConfig,
    },

    /// Services attached.
    Paired {
        /// New device ids.
        devices: Vec<DeviceId>,
    },

    /// Component listing.
    Modules {
        /// Visible components.
        modules: Vec<ComponentInfo>,
    },

    /// Lifecycle state.
    State {
        /// Current state.
        state: BombState,
    },

    /// Timer and strikes.
    GameState {
        /// Remaining milliseconds.
        timer: u32,
        /// Strikes so far.
        strikes: u8,
    },

    /// Bomb identity.
    BombInfo {
        /// Serial number.
        serial: String,
    },

    /// Last game result.
    Summary(SummaryInfo),

    /// Configuration acknowledgement state.
    ConfiguredCheck {
        /// All acknowledged.
        configured: bool,
    },
}

impl AdminCommand {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl AdminResponse {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Descriptor of one component for the admin layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Device id.
    pub id: DeviceId,
    /// Kind tag.
    pub kind: ComponentKind,
    /// Display name.
    pub name: String,
    /// Declared variables.
    pub variables: Vec<VariableDecl>,
    /// Enum definitions.
    pub enum_definitions: Vec<Vec<String>>,
}

impl From<&ComponentHandle> for ComponentInfo {
    fn from(c: &ComponentHandle) -> Self {
        Self {
            id: c.id,
            kind: c.kind(),
            name: c.name(),
            variables: c.variables.iter().map(|v| v.decl.clone()).collect(),
            enum_definitions: c.enums.clone(),
        }
    }
}

/// Outcome of the last game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryInfo {
    /// Whether it exploded.
    pub exploded: bool,
    /// Milliseconds left on the clock.
    pub time_remaining: u32,
    /// Why it exploded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cause_of_explosion: Option<String>,
}

impl SummaryInfo {
    /// Summary of the bomb's current result.
    pub fn of(bomb: &Bomb) -> Self {
        Self {
            exploded: bomb.has_exploded(),
            time_remaining: bomb.timer_int(),
            cause_of_explosion: bomb.cause_of_explosion().map(str::to_owned),
        }
    }
}

/// Periodic or forced status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Lifecycle state.
    pub state: BombState,
    /// Remaining milliseconds, projected to now.
    pub timer: u32,
    /// Remaining milliseconds as of the last countdown update.
    pub timer_int: u32,
    /// Current timescale.
    pub timescale: f32,
    /// Strikes so far.
    pub strikes: u8,
    /// Strike limit.
    pub strike_limit: u8,
    /// Serial number.
    pub serial: String,
    /// Acknowledgements still outstanding.
    pub configuring: bool,
    /// Game over.
    pub ended: bool,
    /// Result, once ended.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<SummaryInfo>,
}

impl StatusReport {
    /// Snapshot `bomb` now.
    pub fn of(bomb: &Bomb) -> Self {
        Self {
            timestamp: Utc::now(),
            state: bomb.state(),
            timer: bomb.real_remaining_ms(),
            timer_int: bomb.timer_int(),
            timescale: bomb.timescale(),
            strikes: bomb.strikes(),
            strike_limit: bomb.strike_limit(),
            serial: bomb.serial().to_owned(),
            configuring: bomb.configuration_in_progress(),
            ended: bomb.has_game_ended(),
            summary: bomb.has_game_ended().then(|| SummaryInfo::of(bomb)),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::bomb::testing::{basic_config, rig};

    #[test]
    fn test_command_tags() {
        let cmd = AdminCommand::from_json(r#"{"type":"autoconf_light","device_id":5,"is_on":true}"#).unwrap();
        assert_eq!(cmd, AdminCommand::AutoconfLight { device_id: 5, is_on: true });

        let cmd = AdminCommand::from_json(r#"{"type":"debug_event","event":"explode"}"#).unwrap();
        assert_eq!(
            cmd,
            AdminCommand::DebugEvent {
                event: DebugEventKind::Explode
            }
        );

        let cmd = AdminCommand::from_json(r#"{"type":"autoconf","serial":"AB1234"}"#).unwrap();
        assert_eq!(
            cmd,
            AdminCommand::Autoconf(AutoconfRequest {
                serial: Some("AB1234".into()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_pair_request_fields() {
        let json = r#"{"type":"pair","device_capabilities":["audio"],"network_address":"10.0.0.7"}"#;
        let AdminCommand::Pair(req) = AdminCommand::from_json(json).unwrap() else {
            panic!("expected pair");
        };
        assert_eq!(req.device_capabilities, vec!["audio".to_string()]);
    }

    #[test]
    fn test_status_carries_both_timers() {
        let mut r = rig();
        r.bomb.configure(basic_config(3, 60_000)).unwrap();
        r.bomb.arm();
        r.clock.advance(300);

        let report = StatusReport::of(&r.bomb);
        assert_eq!(report.timer_int, 60_200);
        assert_eq!(report.timer, 59_900);

        let json = report.to_json().unwrap();
        assert!(json.contains(r#""timer_int":60200"#));
    }

    #[test]
    fn test_response_shapes() {
        let json = AdminResponse::State {
            state: BombState::InGame,
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"state","state":"INGAME"}"#);

        let summary = AdminResponse::Summary(SummaryInfo {
            exploded: false,
            time_remaining: 1500,
            cause_of_explosion: None,
        });
        let json = summary.to_json().unwrap();
        assert!(!json.contains("cause_of_explosion"));
        assert_eq!(AdminResponse::from_json(&json).unwrap(), summary);
    }
}
