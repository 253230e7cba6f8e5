//! Wire Protocol Constants
//!
//! Packet = `[START_MARKER][u16 length][payload]`, moved over the bus in
//! chunks of at most [`MAX_CHUNK`] bytes. The first payload byte of a
//! controller-initiated packet is a [`Command`].

use serde::{Deserialize, Serialize};

/// First byte of every packet.
pub const START_MARKER: u8 = 0xFE;

/// Largest atomic bus transfer.
pub const MAX_CHUNK: usize = 32;

/// Marker byte plus u16 length.
pub const HEADER_LEN: usize = 3;

/// Discovery probe byte.
pub const PING: u8 = 0xEA;

/// Expected reply to [`PING`].
pub const PING_ACK: u8 = 0xAE;

/// Value a device must echo to complete the handshake.
pub const HANDSHAKE_CHECK: u32 = 0x616C754A;

/// Challenge text sent with the handshake command.
pub const HANDSHAKE_CHALLENGE: &str = "BOMBUH";

/// Highest 7-bit bus address.
pub const MAX_BUS_ADDRESS: u8 = 0x77;

/// Device identifier. Physical devices use their bus address, virtual
/// devices a random id with the high bit set.
pub type DeviceId = u32;

/// Bit set on every virtual device id.
pub const VIRTUAL_ID_BIT: DeviceId = 0x8000_0000;

/// Whether an id belongs to a virtual device.
#[inline]
pub fn is_virtual_id(id: DeviceId) -> bool {
    id & VIRTUAL_ID_BIT != 0
}

/// Controller command byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Ask for queued outbound requests.
    Poll = 1,
    /// Answer to a queued request, tagged with its channel.
    Response = 2,
    /// Event broadcast.
    Event = 3,
    /// Capability exchange.
    Handshake = 4,
}

impl Command {
    /// Decode a command byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Poll),
            2 => Some(Self::Response),
            3 => Some(Self::Event),
            4 => Some(Self::Handshake),
            _ => None,
        }
    }

    /// Wire byte.
    #[inline]
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Handshake request payload: challenge text, null-terminated.
pub fn handshake_challenge() -> Vec<u8> {
    let mut params = HANDSHAKE_CHALLENGE.as_bytes().to_vec();
    params.push(0);
    params
}
