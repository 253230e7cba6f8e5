//! Device Registry
//!
//! Owns every communication endpoint. Physical devices are rebuilt on each
//! discovery scan; virtual devices are attached and detached explicitly and
//! survive scans. All access goes through the reentrant bus lock.

use tracing::{debug, info, instrument, warn};

use super::handshake::{decode_handshake, Handshake, HandshakeError};
use super::protocol::{handshake_challenge, Command, DeviceId, PING, PING_ACK, VIRTUAL_ID_BIT};
use super::transport::{BusAdapter, PacketLink, PhysicalLink, TransportError};
use super::virtual_device::{VirtualComponent, VirtualLink};
use crate::core::codec::DataInput;
use crate::core::lock::{BusHold, BusLock};

/// Endpoint table behind the bus lock.
pub struct DeviceRegistry {
    adapter: Box<dyn BusAdapter>,
    physical: Vec<u8>,
    virtuals: Vec<(DeviceId, VirtualLink)>,
}

impl DeviceRegistry {
    fn new(adapter: Box<dyn BusAdapter>) -> Self {
        Self {
            adapter,
            physical: Vec::new(),
            virtuals: Vec::new(),
        }
    }

    fn device_ids(&self) -> Vec<DeviceId> {
        self.physical
            .iter()
            .map(|&a| a as DeviceId)
            .chain(self.virtuals.iter().map(|(id, _)| *id))
            .collect()
    }

    fn contains(&self, id: DeviceId) -> bool {
        self.physical_address(id).is_some() || self.virtuals.iter().any(|(v, _)| *v == id)
    }

    fn physical_address(&self, id: DeviceId) -> Option<u8> {
        if id & VIRTUAL_ID_BIT != 0 {
            return None;
        }
        self.physical.iter().copied().find(|&a| a as DeviceId == id)
    }

    /// Run `f` against the framed link of physical device `id`.
    fn exchange_physical<R>(
        &mut self,
        id: DeviceId,
        f: impl FnOnce(&mut dyn PacketLink) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let address = self.physical_address(id).ok_or(TransportError::UnknownDevice(id))?;
        let mut link = PhysicalLink::new(self.adapter.as_mut(), address);
        f(&mut link)
    }

    fn detach_virtual(&mut self, id: DeviceId) -> Option<(usize, VirtualLink)> {
        let index = self.virtuals.iter().position(|(v, _)| *v == id)?;
        Some((index, self.virtuals.remove(index).1))
    }

    fn reattach_virtual(&mut self, index: usize, id: DeviceId, link: VirtualLink) {
        let index = index.min(self.virtuals.len());
        self.virtuals.insert(index, (id, link));
    }

    fn ping(&mut self, address: u8) -> Result<bool, TransportError> {
        self.adapter.write_to(address, &[PING])?;
        let mut reply = [0u8; 1];
        self.adapter.read_from(address, &mut reply)?;
        Ok(reply[0] == PING_ACK)
    }

    fn remove(&mut self, id: DeviceId) -> bool {
        let before = self.physical.len() + self.virtuals.len();
        self.physical.retain(|&a| a as DeviceId != id);
        self.virtuals.retain(|(v, _)| *v != id);
        before != self.physical.len() + self.virtuals.len()
    }
}

/// The shared peripheral bus and its attached devices.
pub struct Bus {
    registry: BusLock<DeviceRegistry>,
}

impl Bus {
    /// Create a bus over a raw adapter. No devices are attached yet.
    pub fn new(adapter: Box<dyn BusAdapter>) -> Self {
        Self {
            registry: BusLock::new(DeviceRegistry::new(adapter)),
        }
    }

    /// Hold the bus lock across several operations.
    pub fn hold(&self) -> BusHold<'_, DeviceRegistry> {
        self.registry.hold()
    }

    /// Rescan the physical bus. Virtual devices are kept.
    ///
    /// Returns the number of physical devices that answered the ping.
    #[instrument(skip(self))]
    pub fn discover(&self) -> Result<usize, TransportError> {
        self.registry.with(|reg| {
            reg.physical.clear();
            let addresses = reg.adapter.scan()?;
            for address in addresses {
                match reg.ping(address) {
                    Ok(true) => {
                        debug!(address, "device ping succeeded");
                        reg.physical.push(address);
                    }
                    Ok(false) => warn!(address, "device ping failed"),
                    Err(e) => warn!(address, "device ping error: {}", e),
                }
            }
            info!(
                physical = reg.physical.len(),
                virtual_devices = reg.virtuals.len(),
                "bus discovery complete"
            );
            Ok(reg.physical.len())
        })
    }

    /// Attach a virtual device and return its new id.
    pub fn add_virtual_device(&self, component: Box<dyn VirtualComponent>) -> DeviceId {
        self.registry.with(|reg| {
            let id = loop {
                let candidate = (uuid::Uuid::new_v4().as_u128() as u32) | VIRTUAL_ID_BIT;
                if !reg.contains(candidate) {
                    break candidate;
                }
            };
            reg.virtuals.push((id, VirtualLink::new(component)));
            info!(id = format_args!("{id:#010x}"), "virtual device attached");
            id
        })
    }

    /// Detach a virtual device. Returns false if `id` is not a virtual device.
    pub fn remove_virtual_device(&self, id: DeviceId) -> bool {
        self.registry.with(|reg| {
            let before = reg.virtuals.len();
            reg.virtuals.retain(|(v, _)| *v != id);
            before != reg.virtuals.len()
        })
    }

    /// Drop any device for the rest of the session.
    pub fn remove_device(&self, id: DeviceId) -> bool {
        self.registry.with(|reg| reg.remove(id))
    }

    /// Ids of all attached devices, physical first.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.registry.with(|reg| reg.device_ids())
    }

    /// Whether `id` is attached.
    pub fn contains(&self, id: DeviceId) -> bool {
        self.registry.with(|reg| reg.contains(id))
    }

    /// Run the handshake with one device.
    pub fn shake_hand(&self, id: DeviceId) -> Result<Handshake, HandshakeError> {
        let reply = self.send_command(id, Command::Handshake, &handshake_challenge())?;
        decode_handshake(&mut DataInput::new(&reply))
    }

    /// Handshake every device. Devices that fail are dropped.
    #[instrument(skip(self))]
    pub fn shake_hands(&self) -> Vec<(DeviceId, Handshake)> {
        let _hold = self.hold();
        let mut accepted = Vec::new();
        for id in self.device_ids() {
            match self.shake_hand(id) {
                Ok(handshake) => accepted.push((id, handshake)),
                Err(e) => {
                    warn!(id = format_args!("{id:#010x}"), "handshake failed, dropping device: {}", e);
                    self.remove_device(id);
                }
            }
        }
        accepted
    }

    /// Send `[command] + params` to a device and read its reply.
    pub fn send_command(&self, id: DeviceId, command: Command, params: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.exchange(id, |link| link.send_command(command, params))
    }

    /// Send a RESPONSE packet on `channel`.
    pub fn send_response(&self, id: DeviceId, channel: u8, payload: &[u8]) -> Result<(), TransportError> {
        self.exchange(id, |link| link.send_response(channel, payload))
    }

    /// Virtual links are detached while their component runs, so component
    /// callbacks may use the bus. The detached device is absent from
    /// [`Bus::device_ids`] until the exchange returns.
    fn exchange<R>(
        &self,
        id: DeviceId,
        f: impl FnOnce(&mut dyn PacketLink) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let _hold = self.hold();
        match self.registry.with(|reg| reg.detach_virtual(id)) {
            Some((index, mut link)) => {
                let result = f(&mut link);
                self.registry.with(|reg| reg.reattach_virtual(index, id, link));
                result
            }
            None => self.registry.with(|reg| reg.exchange_physical(id, f)),
        }
    }

    /// Send one event to each target. Returns how many deliveries succeeded.
    ///
    /// The `[event_id] + params` payload is built once.
    pub fn send_event(&self, targets: &[DeviceId], event_id: u8, params: &[u8]) -> usize {
        let mut payload = Vec::with_capacity(params.len() + 1);
        payload.push(event_id);
        payload.extend_from_slice(params);

        let _hold = self.hold();
        let mut delivered = 0;
        for &id in targets {
            match self.send_command(id, Command::Event, &payload) {
                Ok(_) => delivered += 1,
                Err(e) => warn!(id = format_args!("{id:#010x}"), event_id, "event delivery failed: {}", e),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::handshake::{encode_handshake, KindDescriptor};
    use crate::bus::protocol::is_virtual_id;
    use crate::bus::transport::frame;
    use crate::bus::transport::testing::SimBus;
    use crate::bus::virtual_device::testing::RecordingComponent;
    use crate::bus::virtual_device::StaticComponent;

    #[test]
    fn test_discover_keeps_acking_devices() {
        let sim = SimBus::with_devices(&[(0x10, PING_ACK), (0x11, 0x00), (0x12, PING_ACK)]);
        let bus = Bus::new(Box::new(sim));
        assert_eq!(bus.discover().unwrap(), 2);
        assert_eq!(bus.device_ids(), vec![0x10, 0x12]);
    }

    #[test]
    fn test_virtual_devices_survive_discovery() {
        let bus = Bus::new(Box::new(SimBus::healthy(&[0x20])));
        let vid = bus.add_virtual_device(Box::new(StaticComponent::dummy_battery(2, 1)));
        assert!(is_virtual_id(vid));

        bus.discover().unwrap();
        bus.discover().unwrap();
        assert_eq!(bus.device_ids(), vec![0x20, vid]);

        assert!(bus.remove_virtual_device(vid));
        assert!(!bus.remove_virtual_device(vid));
        // Physical ids are not virtual
        assert!(!bus.remove_virtual_device(0x20));
        assert_eq!(bus.device_ids(), vec![0x20]);
    }

    #[test]
    fn test_bad_handshake_drops_device() {
        let sim = SimBus::healthy(&[0x30, 0x31]);
        let bus = Bus::new(Box::new(sim.clone()));
        bus.discover().unwrap();

        let good = encode_handshake(&Handshake::new(0, KindDescriptor::Port { name: "DVI".into() })).unwrap();
        let mut bad = good.clone();
        bad[0] = 0;
        sim.queue_read(0x30, &frame(&bad).unwrap());
        sim.queue_read(0x31, &frame(&good).unwrap());

        let accepted = bus.shake_hands();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].0, 0x31);
        assert_eq!(bus.device_ids(), vec![0x31]);
    }

    #[test]
    fn test_send_event_to_targets() {
        let bus = Bus::new(Box::new(SimBus::default()));
        let a = RecordingComponent::new(Handshake::new(0, KindDescriptor::Port { name: "A".into() }));
        let b = RecordingComponent::new(Handshake::new(0, KindDescriptor::Port { name: "B".into() }));
        let ida = bus.add_virtual_device(Box::new(a.clone()));
        let _idb = bus.add_virtual_device(Box::new(b.clone()));

        assert_eq!(bus.send_event(&[ida, 0x55], 3, &[2]), 1);
        assert_eq!(a.log.lock().events, vec![(3, vec![2])]);
        assert!(b.log.lock().events.is_empty());
    }

    /// Forwards every event it receives to another device.
    struct Relay {
        bus: Arc<Bus>,
        target: DeviceId,
    }

    impl VirtualComponent for Relay {
        fn handshake(&self) -> Handshake {
            Handshake::new(0, KindDescriptor::Port { name: "Relay".into() })
        }

        fn on_event(&mut self, event_id: u8, params: &[u8]) {
            self.bus.send_event(&[self.target], event_id, params);
        }
    }

    #[test]
    fn test_component_callback_reenters_bus() {
        let bus = Arc::new(Bus::new(Box::new(SimBus::default())));
        let sink = RecordingComponent::new(Handshake::new(0, KindDescriptor::Port { name: "Sink".into() }));
        let sink_id = bus.add_virtual_device(Box::new(sink.clone()));
        let relay_id = bus.add_virtual_device(Box::new(Relay {
            bus: Arc::clone(&bus),
            target: sink_id,
        }));

        assert_eq!(bus.send_event(&[relay_id], 6, &[1]), 1);
        assert_eq!(sink.log.lock().events, vec![(6, vec![1])]);
        // Relay is back in its slot
        assert_eq!(bus.device_ids(), vec![sink_id, relay_id]);
    }

    #[test]
    fn test_unknown_device() {
        let bus = Bus::new(Box::new(SimBus::default()));
        let err = bus.send_command(0x42, Command::Poll, &[]).unwrap_err();
        assert!(matches!(err, TransportError::UnknownDevice(0x42)));
    }
}
