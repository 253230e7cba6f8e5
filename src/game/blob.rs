//! Configuration Blobs
//!
//! Relocatable binary images read in place by peripheral firmware. Every
//! pointer is a u16 offset from the start of the blob, written as a
//! placeholder first and patched once its target is reached.
//!
//! Bomb blob:
//!
//! ```text
//! u32 seed | 6 serial chars | u16 serial flags | u8 strike limit | u32 timer ms
//! u16 modules   + ptr -> [u32 name hash, u8 flags, u16 extra ptr or 0]...
//! u16 labels    + ptr -> [u32 text hash, u8 lit]...
//! u16 ports     + ptr -> [u32 name hash]...
//! u16 batteries + ptr -> [u8 count, u8 size]...
//! module extra data
//! ```
//!
//! Module blob: `u16 count + ptr -> [u32 name hash, u8 type, 4-byte slot]...`
//! followed by the null-terminated strings the string slots point to.

use crate::bus::handshake::VariableType;
use crate::core::codec::{pack_u16_prefixed, CodecError, DataOutput, DeferredPointer};
use crate::core::hash::str_hash;
use crate::game::component::{ComponentHandle, ComponentKind, ComponentRegistry, KindState, VariableValue};
use crate::game::serial::SerialFlags;

/// Size of a variable's value slot.
pub const VALUE_SLOT_LEN: usize = 4;

/// Game-wide header fields.
#[derive(Debug, Clone)]
pub struct BombHeader<'a> {
    /// Random seed handed to every component.
    pub seed: u32,
    /// Six-character serial.
    pub serial: &'a str,
    /// Flags derived from the serial.
    pub serial_flags: SerialFlags,
    /// Strikes until explosion.
    pub strike_limit: u8,
    /// Countdown length in milliseconds.
    pub timer_limit_ms: u32,
}

/// Build the unpackaged bomb blob.
pub fn build_bomb_config(header: &BombHeader<'_>, components: &ComponentRegistry) -> Result<Vec<u8>, CodecError> {
    let mut out = DataOutput::with_capacity(64);
    out.write_u32(header.seed)
        .write_raw_str(header.serial)
        .write_u16(header.serial_flags.bits())
        .write_u8(header.strike_limit)
        .write_u32(header.timer_limit_ms);

    let mut table_ptrs: Vec<DeferredPointer> = Vec::with_capacity(4);
    for kind in [ComponentKind::Module, ComponentKind::Label, ComponentKind::Port, ComponentKind::Battery] {
        out.write_count16(components.count(kind))?;
        table_ptrs.push(out.alloc_pointer());
    }
    let mut table_ptrs = table_ptrs.into_iter();

    // Modules, then their extra data in a second pass
    resolve_next(&mut out, &mut table_ptrs)?;
    let mut extra_ptrs: Vec<(DeferredPointer, &[u8])> = Vec::new();
    for module in components.of_kind(ComponentKind::Module) {
        if let KindState::Module { name, flags, extra } = &module.state {
            out.write_u32(str_hash(name)).write_u8(flags.bits());
            match extra.as_deref() {
                Some(bytes) if !bytes.is_empty() => extra_ptrs.push((out.alloc_pointer(), bytes)),
                _ => {
                    out.write_u16(0);
                }
            }
        }
    }
    for (ptr, bytes) in extra_ptrs {
        out.resolve_here(ptr)?;
        out.write_bytes(bytes);
    }

    resolve_next(&mut out, &mut table_ptrs)?;
    for label in components.of_kind(ComponentKind::Label) {
        if let KindState::Label { chosen, lit, .. } = &label.state {
            out.write_u32(str_hash(chosen.as_deref().unwrap_or(""))).write_bool(*lit);
        }
    }

    resolve_next(&mut out, &mut table_ptrs)?;
    for port in components.of_kind(ComponentKind::Port) {
        if let KindState::Port { name, .. } = &port.state {
            out.write_u32(str_hash(name));
        }
    }

    resolve_next(&mut out, &mut table_ptrs)?;
    for battery in components.of_kind(ComponentKind::Battery) {
        if let KindState::Battery { count, size, .. } = &battery.state {
            out.write_u8(*count).write_u8(*size);
        }
    }

    Ok(out.into_bytes())
}

fn resolve_next(out: &mut DataOutput, ptrs: &mut impl Iterator<Item = DeferredPointer>) -> Result<(), CodecError> {
    if let Some(ptr) = ptrs.next() {
        out.resolve_here(ptr)?;
    }
    Ok(())
}

/// Build the unpackaged blob of one component.
pub fn build_component_config(component: &ComponentHandle) -> Result<Vec<u8>, CodecError> {
    let mut out = DataOutput::new();
    match &component.state {
        KindState::Module { .. } => write_variables(&mut out, component)?,
        KindState::Label { chosen, lit, .. } => {
            out.write_u32(str_hash(chosen.as_deref().unwrap_or(""))).write_bool(*lit);
        }
        KindState::Port { used, .. } | KindState::Battery { used, .. } => {
            out.write_bool(*used);
        }
    }
    Ok(out.into_bytes())
}

fn write_variables(out: &mut DataOutput, component: &ComponentHandle) -> Result<(), CodecError> {
    out.write_count16(component.variables.len())?;
    let rows_ptr = out.alloc_pointer();
    out.resolve_here(rows_ptr)?;

    let mut strings: Vec<(DeferredPointer, &str)> = Vec::new();
    for var in &component.variables {
        out.write_u32(str_hash(&var.decl.name)).write_u8(var.decl.ty as u8);
        let slot_start = out.position();
        match (var.decl.ty, &var.value) {
            (ty, value) if ty.is_string() => {
                let text = match value {
                    Some(VariableValue::Text(s)) => s.as_str(),
                    _ => "",
                };
                strings.push((out.alloc_pointer(), text));
            }
            (VariableType::Bool, Some(VariableValue::Bool(b))) => {
                out.write_bool(*b);
            }
            (VariableType::Int, Some(VariableValue::Int(v))) => {
                out.write_i16(*v as i16);
            }
            (VariableType::Long, Some(VariableValue::Int(v))) => {
                out.write_i32(*v);
            }
            _ => {}
        }
        while out.position() - slot_start < VALUE_SLOT_LEN {
            out.write_u8(0);
        }
    }

    for (ptr, text) in strings {
        out.resolve_here(ptr)?;
        out.write_cstr(text);
    }
    Ok(())
}

/// Package a blob behind its u16 length.
pub fn package(blob: &[u8]) -> Result<Vec<u8>, CodecError> {
    pack_u16_prefixed(blob)
}
