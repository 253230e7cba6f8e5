//! Components
//!
//! A component is the decoded capability descriptor of one device, plus the
//! state the game assigns to it: variable values, label choice, usage flags
//! and the cached configuration blob. [`ComponentRegistry`] is the arena of
//! components keyed by device id, with per-kind lists kept in step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::handshake::{Handshake, KindDescriptor, ModuleFlags, VariableDecl, VariableType};
use crate::bus::protocol::DeviceId;
use crate::game::events::{subscribes, BombEvent};

/// Reserved key: chosen label text.
pub const KEY_TEXT: &str = "Text";
/// Reserved key: label lit flag.
pub const KEY_IS_LIT: &str = "IsLit";
/// Reserved key: port or battery in use.
pub const KEY_IS_USED: &str = "IsUsed";

/// Component kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Puzzle module.
    Module,
    /// Indicator label.
    Label,
    /// Port.
    Port,
    /// Battery holder.
    Battery,
}

/// Assigned variable value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    /// Boolean.
    Bool(bool),
    /// 16- or 32-bit integer, range-checked against the declared type.
    Int(i32),
    /// Text or chosen enum option.
    Text(String),
}

/// Declared variable and its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    /// Declaration from the handshake.
    pub decl: VariableDecl,
    /// Assigned value; `None` until configured.
    pub value: Option<VariableValue>,
}

/// Kind-specific state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KindState {
    /// Puzzle module.
    Module {
        /// Module name.
        name: String,
        /// Behavior flags.
        flags: ModuleFlags,
        /// Opaque extra data.
        extra: Option<Vec<u8>>,
    },
    /// Indicator label.
    Label {
        /// Texts the label can show.
        options: Vec<String>,
        /// Chosen text.
        chosen: Option<String>,
        /// Whether the indicator is lit.
        lit: bool,
    },
    /// Port.
    Port {
        /// Port name.
        name: String,
        /// In use this game.
        used: bool,
    },
    /// Battery holder.
    Battery {
        /// Number of cells.
        count: u8,
        /// Cell size code.
        size: u8,
        /// In use this game.
        used: bool,
    },
}

/// One component paired with one device.
#[derive(Clone, Debug)]
pub struct ComponentHandle {
    /// Owning device.
    pub id: DeviceId,
    /// Subscribed event bits.
    pub event_mask: u32,
    /// Kind-specific state.
    pub state: KindState,
    /// Declared variables.
    pub variables: Vec<Variable>,
    /// Enum definitions referenced by string-enum variables.
    pub enums: Vec<Vec<String>>,
    /// Packaged configuration blob; released once everyone acknowledged.
    pub config_cache: Option<Vec<u8>>,
}

impl ComponentHandle {
    /// Build from a decoded handshake.
    pub fn from_handshake(id: DeviceId, handshake: Handshake) -> Self {
        let state = match handshake.kind {
            KindDescriptor::Module { name, flags, extra } => KindState::Module { name, flags, extra },
            KindDescriptor::Label { options } => KindState::Label {
                options,
                chosen: None,
                lit: false,
            },
            KindDescriptor::Port { name } => KindState::Port { name, used: false },
            KindDescriptor::Battery { count, size } => KindState::Battery {
                count,
                size,
                used: false,
            },
        };
        Self {
            id,
            event_mask: handshake.event_mask,
            state,
            variables: handshake
                .variables
                .into_iter()
                .map(|decl| Variable { decl, value: None })
                .collect(),
            enums: handshake.enums,
            config_cache: None,
        }
    }

    /// Kind tag.
    pub fn kind(&self) -> ComponentKind {
        match self.state {
            KindState::Module { .. } => ComponentKind::Module,
            KindState::Label { .. } => ComponentKind::Label,
            KindState::Port { .. } => ComponentKind::Port,
            KindState::Battery { .. } => ComponentKind::Battery,
        }
    }

    /// Display name.
    pub fn name(&self) -> String {
        match &self.state {
            KindState::Module { name, .. } | KindState::Port { name, .. } => name.clone(),
            KindState::Label { .. } => "Label".to_owned(),
            KindState::Battery { count, .. } => format!("Battery x{count}"),
        }
    }

    /// Whether the component wants `event`.
    pub fn subscribes(&self, event: BombEvent) -> bool {
        subscribes(self.event_mask, event)
    }

    /// Module flagged defusable.
    pub fn is_defusable(&self) -> bool {
        matches!(&self.state, KindState::Module { flags, .. } if flags.contains(ModuleFlags::DEFUSABLE))
    }

    /// Options of the enum definition a variable refers to.
    pub fn enum_options(&self, decl: &VariableDecl) -> Option<&[String]> {
        decl.enum_index
            .and_then(|i| self.enums.get(i as usize))
            .map(Vec::as_slice)
    }

    /// Allowed texts for a string-enum key, declared or reserved.
    pub fn key_options(&self, key: &str) -> Option<&[String]> {
        if let Some(var) = self.variables.iter().find(|v| v.decl.name == key) {
            return self.enum_options(&var.decl);
        }
        match &self.state {
            KindState::Label { options, .. } if key == KEY_TEXT => Some(options.as_slice()),
            _ => None,
        }
    }

    /// Every configurable key: declared variables, then kind reserved keys.
    pub fn config_keys(&self) -> Vec<(String, VariableType)> {
        let mut keys: Vec<(String, VariableType)> = self
            .variables
            .iter()
            .filter(|v| v.decl.ty != VariableType::Null)
            .map(|v| (v.decl.name.clone(), v.decl.ty))
            .collect();
        match self.state {
            KindState::Label { .. } => {
                keys.push((KEY_TEXT.to_owned(), VariableType::StrEnum));
                keys.push((KEY_IS_LIT.to_owned(), VariableType::Bool));
            }
            KindState::Port { .. } | KindState::Battery { .. } => {
                keys.push((KEY_IS_USED.to_owned(), VariableType::Bool));
            }
            KindState::Module { .. } => {}
        }
        keys
    }

    /// Coerce a raw value for `key` without applying it.
    pub fn coerce(&self, key: &str, raw: &Value) -> Option<VariableValue> {
        if let Some(var) = self.variables.iter().find(|v| v.decl.name == key) {
            return match var.decl.ty {
                VariableType::Null => Some(VariableValue::Text(String::new())),
                VariableType::Bool => coerce_bool(raw).map(VariableValue::Bool),
                VariableType::Int => coerce_int(raw)
                    .filter(|v| i16::try_from(*v).is_ok())
                    .map(VariableValue::Int),
                VariableType::Long => coerce_int(raw).map(VariableValue::Int),
                VariableType::Str => coerce_text(raw).map(VariableValue::Text),
                VariableType::StrEnum => {
                    let options = self.enum_options(&var.decl)?;
                    match_option(options, raw).map(VariableValue::Text)
                }
            };
        }
        match (&self.state, key) {
            (KindState::Label { options, .. }, KEY_TEXT) => match_option(options, raw).map(VariableValue::Text),
            (KindState::Label { .. }, KEY_IS_LIT) => coerce_bool(raw).map(VariableValue::Bool),
            (KindState::Port { .. } | KindState::Battery { .. }, KEY_IS_USED) => {
                coerce_bool(raw).map(VariableValue::Bool)
            }
            _ => None,
        }
    }

    /// Store a coerced value under `key`.
    pub fn apply(&mut self, key: &str, value: VariableValue) {
        if let Some(var) = self.variables.iter_mut().find(|v| v.decl.name == key) {
            var.value = Some(value);
            return;
        }
        match (&mut self.state, key, value) {
            (KindState::Label { chosen, .. }, KEY_TEXT, VariableValue::Text(text)) => *chosen = Some(text),
            (KindState::Label { lit, .. }, KEY_IS_LIT, VariableValue::Bool(b)) => *lit = b,
            (KindState::Port { used, .. } | KindState::Battery { used, .. }, KEY_IS_USED, VariableValue::Bool(b)) => {
                *used = b
            }
            _ => {}
        }
    }
}

fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_int(raw: &Value) -> Option<i32> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(*b as i32),
        _ => None,
    }
}

fn coerce_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Case-insensitive option match, returning the declared spelling.
fn match_option(options: &[String], raw: &Value) -> Option<String> {
    let text = coerce_text(raw)?;
    options.iter().find(|o| o.eq_ignore_ascii_case(&text)).cloned()
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Arena of components keyed by device id.
///
/// Per-kind lists keep attach order, which is the order of the blob tables.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    by_id: BTreeMap<DeviceId, ComponentHandle>,
    order: BTreeMap<ComponentKind, Vec<DeviceId>>,
}

impl ComponentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the component of `handle.id`.
    pub fn insert(&mut self, handle: ComponentHandle) {
        self.remove(handle.id);
        self.order.entry(handle.kind()).or_default().push(handle.id);
        self.by_id.insert(handle.id, handle);
    }

    /// Remove a component from the map and its kind list.
    pub fn remove(&mut self, id: DeviceId) -> Option<ComponentHandle> {
        let handle = self.by_id.remove(&id)?;
        if let Some(list) = self.order.get_mut(&handle.kind()) {
            list.retain(|&d| d != id);
        }
        Some(handle)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.order.clear();
    }

    /// Lookup by device id.
    pub fn get(&self, id: DeviceId) -> Option<&ComponentHandle> {
        self.by_id.get(&id)
    }

    /// Mutable lookup by device id.
    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut ComponentHandle> {
        self.by_id.get_mut(&id)
    }

    /// Whether `id` has a component.
    pub fn contains(&self, id: DeviceId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All components, by id.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentHandle> {
        self.by_id.values()
    }

    /// All components, mutable.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ComponentHandle> {
        self.by_id.values_mut()
    }

    /// Components of one kind in attach order.
    pub fn of_kind(&self, kind: ComponentKind) -> impl Iterator<Item = &ComponentHandle> {
        self.order
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
    }

    /// Count of one kind.
    pub fn count(&self, kind: ComponentKind) -> usize {
        self.order.get(&kind).map_or(0, Vec::len)
    }

    /// `(id, mask)` for every component.
    pub fn subscriptions(&self) -> Vec<(DeviceId, u32)> {
        self.by_id.values().map(|c| (c.id, c.event_mask)).collect()
    }
}
