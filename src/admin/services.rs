//! Paired Services
//!
//! Networked helpers (a remote sound box, say) announce capability names and
//! an address. Each capability maps to a factory that builds a virtual
//! device; the device joins the bus as a decorative module and forwards the
//! events it subscribes to onto a channel for whatever drives the service.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::bus::handshake::{Handshake, KindDescriptor, ModuleFlags};
use crate::bus::virtual_device::VirtualComponent;

/// Pairing errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No factory for the capability.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
}

/// Builds a virtual device for a service at the given address.
pub type ServiceFactory = Box<dyn Fn(&str) -> Box<dyn VirtualComponent> + Send + Sync>;

/// Event forwarded from the bus to a paired service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    /// Capability that received it.
    pub capability: String,
    /// Service address.
    pub address: String,
    /// Event id.
    pub event_id: u8,
    /// Event parameters.
    pub params: Vec<u8>,
}

/// Virtual module standing in for a paired service.
pub struct PairedService {
    capability: String,
    address: String,
    event_mask: u32,
    outbox: UnboundedSender<ServiceEvent>,
}

impl PairedService {
    /// Service subscribed to `event_mask`, forwarding into `outbox`.
    pub fn new(capability: &str, address: &str, event_mask: u32, outbox: UnboundedSender<ServiceEvent>) -> Self {
        Self {
            capability: capability.to_owned(),
            address: address.to_owned(),
            event_mask,
            outbox,
        }
    }
}

impl VirtualComponent for PairedService {
    fn handshake(&self) -> Handshake {
        Handshake::new(
            self.event_mask,
            KindDescriptor::Module {
                name: format!("${}", self.capability),
                flags: ModuleFlags::DECORATIVE,
                extra: None,
            },
        )
    }

    fn on_event(&mut self, event_id: u8, params: &[u8]) {
        let event = ServiceEvent {
            capability: self.capability.clone(),
            address: self.address.clone(),
            event_id,
            params: params.to_vec(),
        };
        if self.outbox.send(event).is_err() {
            warn!(capability = %self.capability, event_id, "service outbox closed, event dropped");
        }
    }
}

/// Capability name to factory.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: BTreeMap<String, ServiceFactory>,
}

impl ServiceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Replaces any earlier one for the same capability.
    pub fn register(&mut self, capability: &str, factory: ServiceFactory) {
        if self.factories.insert(capability.to_owned(), factory).is_some() {
            warn!(capability, "service factory replaced");
        }
    }

    /// Register a [`PairedService`] factory forwarding `event_mask` into `outbox`.
    pub fn register_forwarder(&mut self, capability: &str, event_mask: u32, outbox: UnboundedSender<ServiceEvent>) {
        let name = capability.to_owned();
        self.register(
            capability,
            Box::new(move |address| Box::new(PairedService::new(&name, address, event_mask, outbox.clone()))),
        );
    }

    /// Registered capabilities.
    pub fn capabilities(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the virtual device for `capability` at `address`.
    pub fn create(&self, capability: &str, address: &str) -> Result<Box<dyn VirtualComponent>, ServiceError> {
        let factory = self
            .factories
            .get(capability)
            .ok_or_else(|| ServiceError::UnknownCapability(capability.to_owned()))?;
        debug!(capability, address, "creating service device");
        Ok(factory(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::BombEvent;
    use tokio::sync::mpsc;

    #[test]
    fn test_forwarder_round() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = ServiceRegistry::new();
        registry.register_forwarder("audio", BombEvent::Strike.mask(), tx);
        assert_eq!(registry.capabilities(), vec!["audio".to_string()]);

        let mut device = registry.create("audio", "10.0.0.7").unwrap();
        let hs = device.handshake();
        assert_eq!(hs.event_mask, BombEvent::Strike.mask());
        assert!(matches!(
            hs.kind,
            KindDescriptor::Module { ref name, flags, .. } if name == "$audio" && flags == ModuleFlags::DECORATIVE
        ));

        device.on_event(3, &[1]);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.address, "10.0.0.7");
        assert_eq!((event.event_id, event.params), (3, vec![1]));
    }

    #[test]
    fn test_unknown_capability() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.create("lasers", "1.2.3.4"),
            Err(ServiceError::UnknownCapability(_))
        ));
    }
}
