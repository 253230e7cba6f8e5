//! Request Handlers
//!
//! A handler turns one queued device request into behavior in three steps:
//! decode the parameters, execute side effects, build the response bytes.
//! Handlers are registered by name; the name is hashed into the 32-bit id
//! peripherals put on the wire.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::warn;

use crate::bus::protocol::DeviceId;
use crate::core::codec::{CodecError, DataInput};
use crate::core::hash::{str_hash, IdHash};

/// Typed request handler over a shared context `C`.
///
/// All three steps have no-op defaults.
pub trait RequestHandler<C>: Send + Sync {
    /// Decoded request carried from decode to respond.
    type Request: Default + Send + 'static;

    /// Decode parameters sent by `device`.
    fn decode(&self, _ctx: &C, _device: DeviceId, _input: &mut DataInput<'_>) -> Result<Self::Request, CodecError> {
        Ok(Self::Request::default())
    }

    /// Apply side effects.
    fn execute(&self, _ctx: &mut C, _request: &mut Self::Request) -> anyhow::Result<()> {
        Ok(())
    }

    /// Response payload. Empty still acknowledges the request.
    fn respond(&self, _ctx: &C, _request: &Self::Request) -> Vec<u8> {
        Vec::new()
    }
}

/// Decoded request with its concrete type erased.
pub type ErasedRequest = Box<dyn Any + Send>;

/// Object-safe view of a [`RequestHandler`].
pub trait ErasedHandler<C>: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Decode into an erased request.
    fn decode(&self, ctx: &C, device: DeviceId, input: &mut DataInput<'_>) -> Result<ErasedRequest, CodecError>;

    /// Execute an erased request.
    fn execute(&self, ctx: &mut C, request: &mut ErasedRequest) -> anyhow::Result<()>;

    /// Respond to an erased request.
    fn respond(&self, ctx: &C, request: &ErasedRequest) -> Vec<u8>;
}

struct Erased<H> {
    name: String,
    handler: H,
}

impl<C, H> ErasedHandler<C> for Erased<H>
where
    H: RequestHandler<C>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, ctx: &C, device: DeviceId, input: &mut DataInput<'_>) -> Result<ErasedRequest, CodecError> {
        Ok(Box::new(self.handler.decode(ctx, device, input)?))
    }

    fn execute(&self, ctx: &mut C, request: &mut ErasedRequest) -> anyhow::Result<()> {
        let request = request
            .downcast_mut::<H::Request>()
            .ok_or_else(|| anyhow!("request type mismatch in handler {}", self.name))?;
        self.handler.execute(ctx, request)
    }

    fn respond(&self, ctx: &C, request: &ErasedRequest) -> Vec<u8> {
        match request.downcast_ref::<H::Request>() {
            Some(request) => self.handler.respond(ctx, request),
            None => Vec::new(),
        }
    }
}

/// Hash-keyed handler table. Built before polling starts.
pub struct HandlerTable<C> {
    handlers: BTreeMap<IdHash, Arc<dyn ErasedHandler<C>>>,
}

impl<C> Default for HandlerTable<C> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<C: 'static> HandlerTable<C> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, returning its id.
    ///
    /// Collisions are not detected; a second registration with the same
    /// hash replaces the first.
    pub fn register<H>(&mut self, name: &str, handler: H) -> IdHash
    where
        H: RequestHandler<C> + 'static,
    {
        let id = str_hash(name);
        let erased = Arc::new(Erased {
            name: name.to_owned(),
            handler,
        });
        if let Some(previous) = self.handlers.insert(id, erased) {
            warn!(id = format_args!("{id:#010x}"), "handler {} replaced {}", name, previous.name());
        }
        id
    }

    /// Look up a handler by id.
    pub fn get(&self, id: IdHash) -> Option<Arc<dyn ErasedHandler<C>>> {
        self.handlers.get(&id).cloned()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names in id order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.values().map(|h| h.name().to_owned()).collect()
    }
}
