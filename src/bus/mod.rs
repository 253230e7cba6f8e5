//! Peripheral bus.
//!
//! Wire constants, packet framing over a chunk-limited bus, the capability
//! handshake, the device registry and software-emulated devices.

pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod virtual_device;

pub use handshake::{Handshake, HandshakeError, KindDescriptor, ModuleFlags, VariableDecl, VariableType};
pub use protocol::{Command, DeviceId};
pub use registry::Bus;
pub use transport::{BusAdapter, NullBus, PacketLink, TransportError};
pub use virtual_device::{QueuedRequest, StaticComponent, VirtualComponent};
