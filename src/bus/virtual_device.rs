//! Virtual Devices
//!
//! Software components that sit on the bus next to physical peripherals.
//! A [`VirtualLink`] answers framed packets by command byte, so the rest of
//! the controller cannot tell a virtual device from a physical one.

use tracing::debug;

use super::handshake::{encode_handshake, Handshake, KindDescriptor};
use super::protocol::Command;
use super::transport::{PacketLink, TransportError};
use crate::core::codec::{CodecError, DataOutput};
use crate::core::hash::IdHash;

/// Request a device queues for the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedRequest {
    /// Channel the response is tagged with.
    pub channel: u8,
    /// Hashed handler name.
    pub command: IdHash,
    /// Encoded parameters.
    pub params: Vec<u8>,
}

/// Encode a poll reply: `u8 count`, then `u8 channel, u32 hash, u16 len, params` per request.
pub fn encode_poll_reply(requests: &[QueuedRequest]) -> Result<Vec<u8>, CodecError> {
    let count = u8::try_from(requests.len()).map_err(|_| CodecError::Overflow8(requests.len()))?;
    let mut out = DataOutput::new();
    out.write_u8(count);
    for req in requests {
        out.write_u8(req.channel)
            .write_u32(req.command)
            .write_count16(req.params.len())?
            .write_bytes(&req.params);
    }
    Ok(out.into_bytes())
}

/// Behavior of a software-emulated peripheral.
///
/// Callbacks run on the bus thread with the bus lock held. They may call
/// back into the [`Bus`](super::registry::Bus), but their own device is
/// detached until the callback returns.
pub trait VirtualComponent: Send {
    /// Capabilities reported during the handshake.
    fn handshake(&self) -> Handshake;

    /// Event delivered by the controller.
    fn on_event(&mut self, _event_id: u8, _params: &[u8]) {}

    /// Requests queued since the last poll.
    fn poll(&mut self) -> Vec<QueuedRequest> {
        Vec::new()
    }

    /// Response to an earlier queued request.
    fn on_response(&mut self, _channel: u8, _payload: &[u8]) {}
}

/// Packet adapter around a [`VirtualComponent`].
pub struct VirtualLink {
    component: Box<dyn VirtualComponent>,
    next_reply: Option<Vec<u8>>,
}

impl VirtualLink {
    /// Wrap a component.
    pub fn new(component: Box<dyn VirtualComponent>) -> Self {
        Self {
            component,
            next_reply: None,
        }
    }

    fn handle(&mut self, command: Command, rest: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        match command {
            Command::Poll => Ok(Some(encode_poll_reply(&self.component.poll())?)),
            Command::Response => {
                let (&channel, payload) = rest
                    .split_first()
                    .ok_or_else(|| TransportError::Virtual("response without channel".into()))?;
                self.component.on_response(channel, payload);
                Ok(None)
            }
            Command::Event => {
                let (&event_id, params) = rest
                    .split_first()
                    .ok_or_else(|| TransportError::Virtual("event without id".into()))?;
                self.component.on_event(event_id, params);
                Ok(Some(Vec::new()))
            }
            Command::Handshake => Ok(Some(encode_handshake(&self.component.handshake())?)),
        }
    }
}

impl PacketLink for VirtualLink {
    fn send_packet(&mut self, content: &[u8]) -> Result<(), TransportError> {
        let (&byte, rest) = content
            .split_first()
            .ok_or_else(|| TransportError::Virtual("empty packet".into()))?;
        let command = Command::from_byte(byte)
            .ok_or_else(|| TransportError::Virtual(format!("unknown command byte {byte}")))?;
        self.next_reply = self.handle(command, rest)?;
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        self.next_reply
            .take()
            .ok_or_else(|| TransportError::Virtual("no reply pending".into()))
    }
}

/// Component with a fixed description and no behavior beyond logging events.
#[derive(Debug, Clone)]
pub struct StaticComponent {
    label: String,
    handshake: Handshake,
}

impl StaticComponent {
    /// Component answering with `handshake`.
    pub fn new(label: &str, handshake: Handshake) -> Self {
        Self {
            label: label.to_owned(),
            handshake,
        }
    }

    /// Stand-in indicator label offering `options`.
    pub fn dummy_label(options: &[&str]) -> Self {
        let kind = KindDescriptor::Label {
            options: options.iter().map(|s| (*s).to_owned()).collect(),
        };
        Self::new("$DummyLabel", Handshake::new(0, kind))
    }

    /// Stand-in battery holder.
    pub fn dummy_battery(count: u8, size: u8) -> Self {
        Self::new("$DummyBattery", Handshake::new(0, KindDescriptor::Battery { count, size }))
    }
}

impl VirtualComponent for StaticComponent {
    fn handshake(&self) -> Handshake {
        self.handshake.clone()
    }

    fn on_event(&mut self, event_id: u8, params: &[u8]) {
        debug!(component = %self.label, event_id, len = params.len(), "virtual event");
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================
