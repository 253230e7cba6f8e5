//! Capability Handshake
//!
//! A device answers the handshake command with:
//!
//! ```text
//! u32  check value (0x616C754A)
//! u32  event subscription mask
//! u8   kind (0 module, 1 label, 2 port, 3 battery)
//! ...  kind-specific fields
//! u8   entry count
//!      per entry: u8 discriminator
//!        VARIABLE:        str name, u8 type, [u8 enum index if string-enum]
//!        ENUM_DEFINITION: u8 count, str options...
//! ```
//!
//! Strings are 1-byte length prefixed. [`decode_handshake`] and
//! [`encode_handshake`] are exact inverses.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::protocol::HANDSHAKE_CHECK;
use super::transport::TransportError;
use crate::core::codec::{CodecError, DataInput, DataOutput};

/// Handshake errors. The offending device is dropped.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Wrong check value.
    #[error("bad handshake check value {0:#010x}")]
    BadCheck(u32),

    /// Component kind tag out of range.
    #[error("unknown component kind {0}")]
    UnknownKind(u8),

    /// Variable type byte out of range.
    #[error("unknown variable type {0}")]
    UnknownVariableType(u8),

    /// Section entry discriminator out of range.
    #[error("unknown section entry {0}")]
    UnknownEntry(u8),

    /// Truncated or malformed payload.
    #[error("malformed handshake: {0}")]
    Codec(#[from] CodecError),

    /// Exchange failed.
    #[error("handshake transport failure: {0}")]
    Transport(#[from] TransportError),
}

bitflags! {
    /// Module behavior flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ModuleFlags: u8 {
        /// Runs continuously and cannot be solved.
        const NEEDY = 1;
        /// Decoration only.
        const DECORATIVE = 2;
        /// Must be defused to win.
        const DEFUSABLE = 4;
    }
}

/// Declared variable type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VariableType {
    /// No value.
    Null = 0,
    /// Free text.
    Str = 1,
    /// 16-bit integer.
    Int = 2,
    /// 32-bit integer.
    Long = 3,
    /// Boolean.
    Bool = 4,
    /// One option of an enum definition.
    StrEnum = 5,
}

impl VariableType {
    /// Decode a type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Null),
            1 => Some(Self::Str),
            2 => Some(Self::Int),
            3 => Some(Self::Long),
            4 => Some(Self::Bool),
            5 => Some(Self::StrEnum),
            _ => None,
        }
    }

    /// Whether values of this type are stored out of line as strings.
    pub fn is_string(self) -> bool {
        matches!(self, Self::Str | Self::StrEnum)
    }
}

/// Section entry discriminator: variable declaration.
pub const ENTRY_VARIABLE: u8 = 0;
/// Section entry discriminator: enum definition.
pub const ENTRY_ENUM_DEFINITION: u8 = 1;

/// Variable slot declared by a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    /// Variable name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub ty: VariableType,
    /// Index into the enum definitions for string-enum variables.
    pub enum_index: Option<u8>,
}

/// Kind-specific handshake fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KindDescriptor {
    /// Puzzle module.
    Module {
        /// Module name.
        name: String,
        /// Behavior flags.
        flags: ModuleFlags,
        /// Opaque data forwarded into the bomb blob.
        extra: Option<Vec<u8>>,
    },
    /// Serial/indicator label.
    Label {
        /// Texts the label can show.
        options: Vec<String>,
    },
    /// Port.
    Port {
        /// Port name.
        name: String,
    },
    /// Battery holder.
    Battery {
        /// Number of cells.
        count: u8,
        /// Cell size code.
        size: u8,
    },
}

impl KindDescriptor {
    /// Wire tag.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Module { .. } => 0,
            Self::Label { .. } => 1,
            Self::Port { .. } => 2,
            Self::Battery { .. } => 3,
        }
    }
}

/// Decoded handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// Bit `n` set means event id `n` is wanted.
    pub event_mask: u32,
    /// Kind-specific fields.
    pub kind: KindDescriptor,
    /// Declared variables in declaration order.
    pub variables: Vec<VariableDecl>,
    /// Enum definitions in declaration order.
    pub enums: Vec<Vec<String>>,
}

impl Handshake {
    /// Handshake with no variables.
    pub fn new(event_mask: u32, kind: KindDescriptor) -> Self {
        Self {
            event_mask,
            kind,
            variables: Vec::new(),
            enums: Vec::new(),
        }
    }

    /// Declare a scalar or string variable.
    pub fn with_variable(mut self, name: &str, ty: VariableType) -> Self {
        self.variables.push(VariableDecl {
            name: name.to_owned(),
            ty,
            enum_index: None,
        });
        self
    }

    /// Declare a string-enum variable together with its options.
    pub fn with_enum_variable(mut self, name: &str, options: &[&str]) -> Self {
        let index = self.enums.len() as u8;
        self.enums.push(options.iter().map(|s| (*s).to_owned()).collect());
        self.variables.push(VariableDecl {
            name: name.to_owned(),
            ty: VariableType::StrEnum,
            enum_index: Some(index),
        });
        self
    }
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode a handshake reply.
pub fn decode_handshake(input: &mut DataInput<'_>) -> Result<Handshake, HandshakeError> {
    let check = input.read_u32()?;
    if check != HANDSHAKE_CHECK {
        return Err(HandshakeError::BadCheck(check));
    }
    let event_mask = input.read_u32()?;
    let tag = input.read_u8()?;

    let kind = match tag {
        0 => {
            let name = input.read_str()?;
            let flags = ModuleFlags::from_bits_retain(input.read_u8()?);
            let extra_len = input.read_u16()? as usize;
            let extra = if extra_len > 0 {
                Some(input.read_bytes(extra_len)?.to_vec())
            } else {
                None
            };
            KindDescriptor::Module { name, flags, extra }
        }
        1 => {
            let count = input.read_u8()?;
            let options = (0..count)
                .map(|_| input.read_str())
                .collect::<Result<Vec<_>, _>>()?;
            KindDescriptor::Label { options }
        }
        2 => KindDescriptor::Port {
            name: input.read_str()?,
        },
        3 => KindDescriptor::Battery {
            count: input.read_u8()?,
            size: input.read_u8()?,
        },
        other => return Err(HandshakeError::UnknownKind(other)),
    };

    let mut handshake = Handshake::new(event_mask, kind);
    read_sections(input, &mut handshake)?;
    Ok(handshake)
}

fn read_sections(input: &mut DataInput<'_>, handshake: &mut Handshake) -> Result<(), HandshakeError> {
    let count = input.read_u8()?;
    for _ in 0..count {
        match input.read_u8()? {
            ENTRY_VARIABLE => {
                let name = input.read_str()?;
                let type_byte = input.read_u8()?;
                let ty = VariableType::from_byte(type_byte)
                    .ok_or(HandshakeError::UnknownVariableType(type_byte))?;
                let enum_index = if ty == VariableType::StrEnum {
                    Some(input.read_u8()?)
                } else {
                    None
                };
                handshake.variables.push(VariableDecl { name, ty, enum_index });
            }
            ENTRY_ENUM_DEFINITION => {
                let n = input.read_u8()?;
                let options = (0..n)
                    .map(|_| input.read_str())
                    .collect::<Result<Vec<_>, _>>()?;
                handshake.enums.push(options);
            }
            other => return Err(HandshakeError::UnknownEntry(other)),
        }
    }
    Ok(())
}

// =============================================================================
// ENCODE
// =============================================================================

/// Encode a handshake reply as a device would send it.
///
/// Enum definitions are written before variables so every index refers
/// to an already-declared definition.
pub fn encode_handshake(handshake: &Handshake) -> Result<Vec<u8>, CodecError> {
    let mut out = DataOutput::new();
    out.write_u32(HANDSHAKE_CHECK)
        .write_u32(handshake.event_mask)
        .write_u8(handshake.kind.tag());

    match &handshake.kind {
        KindDescriptor::Module { name, flags, extra } => {
            out.write_str(name)?.write_u8(flags.bits());
            match extra {
                Some(bytes) if !bytes.is_empty() => {
                    out.write_count16(bytes.len())?.write_bytes(bytes);
                }
                _ => {
                    out.write_u16(0);
                }
            }
        }
        KindDescriptor::Label { options } => {
            out.write_u8(count_u8(options.len())?);
            for option in options {
                out.write_str(option)?;
            }
        }
        KindDescriptor::Port { name } => {
            out.write_str(name)?;
        }
        KindDescriptor::Battery { count, size } => {
            out.write_u8(*count).write_u8(*size);
        }
    }

    out.write_u8(count_u8(handshake.enums.len() + handshake.variables.len())?);
    for options in &handshake.enums {
        out.write_u8(ENTRY_ENUM_DEFINITION).write_u8(count_u8(options.len())?);
        for option in options {
            out.write_str(option)?;
        }
    }
    for var in &handshake.variables {
        out.write_u8(ENTRY_VARIABLE).write_str(&var.name)?.write_u8(var.ty as u8);
        if var.ty == VariableType::StrEnum {
            out.write_u8(var.enum_index.unwrap_or(0));
        }
    }
    Ok(out.into_bytes())
}

fn count_u8(count: usize) -> Result<u8, CodecError> {
    u8::try_from(count).map_err(|_| CodecError::Overflow8(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes() -> Vec<u8> {
        let mut out = DataOutput::new();
        out.write_u32(HANDSHAKE_CHECK).write_u32(0b110).write_u8(0);
        out.write_str("Wires").unwrap();
        out.write_u8(ModuleFlags::DEFUSABLE.bits()).write_u16(2).write_bytes(&[9, 8]);
        out.write_u8(3);
        out.write_u8(ENTRY_ENUM_DEFINITION).write_u8(2);
        out.write_str("Red").unwrap();
        out.write_str("Blue").unwrap();
        out.write_u8(ENTRY_VARIABLE);
        out.write_str("Color").unwrap();
        out.write_u8(VariableType::StrEnum as u8).write_u8(0);
        out.write_u8(ENTRY_VARIABLE);
        out.write_str("Count").unwrap();
        out.write_u8(VariableType::Int as u8);
        out.into_bytes()
    }

    #[test]
    fn test_decode_module() {
        let bytes = module_bytes();
        let hs = decode_handshake(&mut DataInput::new(&bytes)).unwrap();

        assert_eq!(hs.event_mask, 0b110);
        assert_eq!(
            hs.kind,
            KindDescriptor::Module {
                name: "Wires".into(),
                flags: ModuleFlags::DEFUSABLE,
                extra: Some(vec![9, 8]),
            }
        );
        assert_eq!(hs.enums, vec![vec!["Red".to_string(), "Blue".to_string()]]);
        assert_eq!(hs.variables.len(), 2);
        assert_eq!(hs.variables[0].enum_index, Some(0));
        assert_eq!(hs.variables[1].ty, VariableType::Int);
    }

    #[test]
    fn test_bad_check() {
        let mut bytes = module_bytes();
        bytes[0] ^= 0xFF;
        let err = decode_handshake(&mut DataInput::new(&bytes)).unwrap_err();
        assert!(matches!(err, HandshakeError::BadCheck(_)));
    }

    #[test]
    fn test_unknown_kind() {
        let mut out = DataOutput::new();
        out.write_u32(HANDSHAKE_CHECK).write_u32(0).write_u8(4);
        let bytes = out.into_bytes();
        let err = decode_handshake(&mut DataInput::new(&bytes)).unwrap_err();
        assert!(matches!(err, HandshakeError::UnknownKind(4)));
    }

    #[test]
    fn test_truncated() {
        let bytes = module_bytes();
        let err = decode_handshake(&mut DataInput::new(&bytes[..12])).unwrap_err();
        assert!(matches!(err, HandshakeError::Codec(CodecError::OutOfData { .. })));
    }

    #[test]
    fn test_zero_extra_is_none() {
        let hs = Handshake::new(
            1,
            KindDescriptor::Module {
                name: "Timer".into(),
                flags: ModuleFlags::DECORATIVE,
                extra: None,
            },
        );
        let bytes = encode_handshake(&hs).unwrap();
        assert_eq!(decode_handshake(&mut DataInput::new(&bytes)).unwrap(), hs);
    }

    #[test]
    fn test_encode_decode_each_kind() {
        let kinds = [
            KindDescriptor::Label {
                options: vec!["FRK".into(), "CAR".into()],
            },
            KindDescriptor::Port { name: "Serial".into() },
            KindDescriptor::Battery { count: 2, size: 1 },
        ];
        for kind in kinds {
            let hs = Handshake::new(0xFFFF, kind)
                .with_variable("Flag", VariableType::Bool)
                .with_enum_variable("Mode", &["A", "B"]);
            let bytes = encode_handshake(&hs).unwrap();
            assert_eq!(decode_handshake(&mut DataInput::new(&bytes)).unwrap(), hs);
        }
    }
}
