//! Transport and Framing
//!
//! [`BusAdapter`] is the raw shared bus: scan for addresses, write bytes to
//! an address, read bytes from an address. [`PacketLink`] is a framed,
//! per-device channel on top of it. [`PhysicalLink`] does the framing and
//! the 32-byte chunking; virtual devices implement [`PacketLink`] directly.

use thiserror::Error;
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use super::protocol::{Command, DeviceId, HEADER_LEN, MAX_CHUNK, START_MARKER};
use crate::core::codec::CodecError;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Packet header did not start with the start marker.
    #[error("bad packet start marker 0x{found:02x}")]
    Framing {
        /// Byte found where the marker was expected.
        found: u8,
    },

    /// Raw bus transfer failed.
    #[error("bus transfer with 0x{address:02x} failed: {reason}")]
    Bus {
        /// Bus address.
        address: u8,
        /// Adapter-specific reason.
        reason: String,
    },

    /// Content longer than a u16 length header allows.
    #[error("packet of {0} bytes exceeds the u16 length header")]
    PacketTooLarge(usize),

    /// No device with this id is attached.
    #[error("unknown device {0:#010x}")]
    UnknownDevice(DeviceId),

    /// Virtual device rejected a packet.
    #[error("virtual device error: {0}")]
    Virtual(String),

    /// Payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// OS-level I/O error from an adapter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// RAW BUS
// =============================================================================

/// Byte-level access to the shared peripheral bus.
pub trait BusAdapter: Send {
    /// Addresses that acknowledge on the bus.
    fn scan(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Write one transfer to `address`.
    fn write_to(&mut self, address: u8, bytes: &[u8]) -> Result<(), TransportError>;

    /// Fill `buf` with one transfer from `address`.
    fn read_from(&mut self, address: u8, buf: &mut [u8]) -> Result<(), TransportError>;
}

/// Adapter for a controller with no physical bus attached.
///
/// Scans find nothing; only virtual devices participate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl BusAdapter for NullBus {
    fn scan(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(Vec::new())
    }

    fn write_to(&mut self, address: u8, _bytes: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Bus {
            address,
            reason: "no bus attached".into(),
        })
    }

    fn read_from(&mut self, address: u8, _buf: &mut [u8]) -> Result<(), TransportError> {
        Err(TransportError::Bus {
            address,
            reason: "no bus attached".into(),
        })
    }
}

// =============================================================================
// PACKETS
// =============================================================================

/// Framed request/response channel to one device.
pub trait PacketLink {
    /// Send one framed packet.
    fn send_packet(&mut self, content: &[u8]) -> Result<(), TransportError>;

    /// Read the next framed packet.
    fn read_packet(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Send `[command] + params` and read the reply packet.
    fn send_command(&mut self, command: Command, params: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut content = Vec::with_capacity(params.len() + 1);
        content.push(command.byte());
        content.extend_from_slice(params);
        self.send_packet(&content)?;
        self.read_packet()
    }

    /// Send `[RESPONSE, channel] + payload`. No reply is read.
    fn send_response(&mut self, channel: u8, payload: &[u8]) -> Result<(), TransportError> {
        let mut content = Vec::with_capacity(payload.len() + 2);
        content.push(Command::Response.byte());
        content.push(channel);
        content.extend_from_slice(payload);
        self.send_packet(&content)
    }
}

/// Prefix `content` with the start marker and its u16 length.
pub fn frame(content: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = u16::try_from(content.len()).map_err(|_| TransportError::PacketTooLarge(content.len()))?;
    let mut out = Vec::with_capacity(content.len() + HEADER_LEN);
    out.push(START_MARKER);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(content);
    Ok(out)
}

/// Parse a packet header, returning the content length.
pub fn parse_header(header: [u8; HEADER_LEN]) -> Result<u16, TransportError> {
    if header[0] != START_MARKER {
        return Err(TransportError::Framing { found: header[0] });
    }
    Ok(u16::from_le_bytes([header[1], header[2]]))
}

/// Framed link to a physical bus address.
pub struct PhysicalLink<'a> {
    adapter: &'a mut dyn BusAdapter,
    address: u8,
}

impl<'a> PhysicalLink<'a> {
    /// Bind a link to `address` for the duration of one exchange.
    pub fn new(adapter: &'a mut dyn BusAdapter, address: u8) -> Self {
        Self { adapter, address }
    }
}

impl PacketLink for PhysicalLink<'_> {
    fn send_packet(&mut self, content: &[u8]) -> Result<(), TransportError> {
        let framed = frame(content)?;
        #[cfg(feature = "debug-tracing")]
        trace!(address = self.address, "tx {}", hex::encode(&framed));
        for chunk in framed.chunks(MAX_CHUNK) {
            self.adapter.write_to(self.address, chunk)?;
        }
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut header = [0u8; HEADER_LEN];
        self.adapter.read_from(self.address, &mut header)?;
        let len = parse_header(header)? as usize;

        let mut content = vec![0u8; len];
        for chunk in content.chunks_mut(MAX_CHUNK) {
            self.adapter.read_from(self.address, chunk)?;
        }
        #[cfg(feature = "debug-tracing")]
        trace!(address = self.address, "rx {}", hex::encode(&content));
        Ok(content)
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================


#[cfg(test)]
mod tests {
    use super::testing::SimBus;
    use super::*;

    #[test]
    fn test_send_packet_chunks() {
        let mut bus = SimBus::healthy(&[0x10]);
        let content: Vec<u8> = (0..70).collect();
        PhysicalLink::new(&mut bus, 0x10).send_packet(&content).unwrap();

        let state = bus.state.lock();
        let transfers = &state[&0x10].transfers;
        let sizes: Vec<usize> = transfers.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![32, 32, 9]);
        assert_eq!(&transfers[0][..3], &[START_MARKER, 70, 0]);
        let joined: Vec<u8> = transfers.concat();
        assert_eq!(&joined[3..], &content[..]);
    }

    #[test]
    fn test_read_packet_chunks() {
        let mut bus = SimBus::healthy(&[0x11]);
        let content: Vec<u8> = (0..40).collect();
        bus.queue_read(0x11, &frame(&content).unwrap());

        let read = PhysicalLink::new(&mut bus, 0x11).read_packet().unwrap();
        assert_eq!(read, content);
        assert_eq!(bus.state.lock()[&0x11].read_sizes, vec![3, 32, 8]);
    }

    #[test]
    fn test_bad_start_marker() {
        let mut bus = SimBus::healthy(&[0x12]);
        bus.queue_read(0x12, &[0x00, 1, 0, 9]);
        let err = PhysicalLink::new(&mut bus, 0x12).read_packet().unwrap_err();
        assert!(matches!(err, TransportError::Framing { found: 0x00 }));
    }

    #[test]
    fn test_send_command_reads_reply() {
        let mut bus = SimBus::healthy(&[0x13]);
        bus.queue_read(0x13, &frame(&[0]).unwrap());
        let reply = PhysicalLink::new(&mut bus, 0x13)
            .send_command(Command::Poll, &[])
            .unwrap();
        assert_eq!(reply, vec![0]);
        assert_eq!(bus.state.lock()[&0x13].transfers[0], vec![START_MARKER, 1, 0, 1]);
    }

    #[test]
    fn test_response_packet_layout() {
        let mut bus = SimBus::healthy(&[0x14]);
        PhysicalLink::new(&mut bus, 0x14)
            .send_response(7, &[0xAA, 0xBB])
            .unwrap();
        assert_eq!(
            bus.state.lock()[&0x14].transfers[0],
            vec![START_MARKER, 4, 0, 2, 7, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_packet_too_large() {
        let content = vec![0u8; 70_000];
        assert!(matches!(frame(&content), Err(TransportError::PacketTooLarge(70_000))));
    }

    #[test]
    fn test_null_bus() {
        let mut bus = NullBus;
        assert!(bus.scan().unwrap().is_empty());
        assert!(PhysicalLink::new(&mut bus, 1).send_packet(&[1]).is_err());
    }
}
