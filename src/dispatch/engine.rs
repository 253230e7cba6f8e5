//! Dispatch Engine
//!
//! One poll cycle asks every device for its queued requests and runs them in
//! three passes: decode everything, execute everything, respond to
//! everything. A handler's side effects are never visible to another
//! handler's decode in the same cycle.
//!
//! Faults stay with the device that caused them:
//! - transport failure or malformed poll header: the rest of that device's
//!   queue is skipped for this cycle
//! - unknown handler id or decode failure: that request is skipped but
//!   still answered with an empty RESPONSE so the device frees the channel

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::handler::{ErasedHandler, ErasedRequest, HandlerTable, RequestHandler};
use crate::bus::protocol::{Command, DeviceId};
use crate::bus::registry::Bus;
use crate::core::codec::{CodecError, DataInput};
use crate::core::hash::IdHash;

/// Context that owns a handle to the bus.
pub trait BusContext {
    /// The shared bus.
    fn bus(&self) -> Arc<Bus>;
}

/// Counters from one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Devices that answered the poll.
    pub devices_polled: usize,
    /// Requests read from poll replies.
    pub requests: usize,
    /// Requests that reached execute.
    pub executed: usize,
    /// Requests with no registered handler.
    pub unknown: usize,
    /// Requests whose parameters failed to decode.
    pub decode_failures: usize,
    /// Handler execute errors.
    pub execute_failures: usize,
    /// Poll or response transfers that failed.
    pub transport_failures: usize,
}

struct Pending<C> {
    device: DeviceId,
    channel: u8,
    command: IdHash,
    work: Option<(Arc<dyn ErasedHandler<C>>, ErasedRequest)>,
}

/// Poll-cycle driver over a handler table.
pub struct Dispatcher<C> {
    handlers: HandlerTable<C>,
}

impl<C: 'static> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> Dispatcher<C> {
    /// Dispatcher with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(),
        }
    }

    /// Register a named handler.
    pub fn register<H>(&mut self, name: &str, handler: H) -> IdHash
    where
        H: RequestHandler<C> + 'static,
    {
        self.handlers.register(name, handler)
    }

    /// Registered handlers.
    pub fn handlers(&self) -> &HandlerTable<C> {
        &self.handlers
    }
}

impl<C: BusContext + 'static> Dispatcher<C> {
    /// Run one poll cycle under the bus lock.
    #[instrument(skip_all)]
    pub fn sync(&self, ctx: &mut C) -> SyncReport {
        let bus = ctx.bus();
        let _hold = bus.hold();
        let mut report = SyncReport::default();
        let mut queue: Vec<Pending<C>> = Vec::new();

        for device in bus.device_ids() {
            let reply = match bus.send_command(device, Command::Poll, &[]) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(device = format_args!("{device:#010x}"), "poll failed: {}", e);
                    report.transport_failures += 1;
                    continue;
                }
            };
            report.devices_polled += 1;
            if let Err(e) = self.decode_poll_reply(ctx, device, &reply, &mut queue, &mut report) {
                warn!(
                    device = format_args!("{device:#010x}"),
                    "malformed poll reply, skipping rest of queue: {}", e
                );
            }
        }

        for entry in queue.iter_mut() {
            if let Some((handler, request)) = entry.work.as_mut() {
                match handler.execute(ctx, request) {
                    Ok(()) => report.executed += 1,
                    Err(e) => {
                        warn!(handler = handler.name(), "handler execute failed: {:#}", e);
                        report.execute_failures += 1;
                    }
                }
            }
        }

        for entry in &queue {
            let payload = match &entry.work {
                Some((handler, request)) => handler.respond(ctx, request),
                None => Vec::new(),
            };
            if let Err(e) = bus.send_response(entry.device, entry.channel, &payload) {
                warn!(
                    device = format_args!("{:#010x}", entry.device),
                    command = format_args!("{:#010x}", entry.command),
                    "response failed: {}",
                    e
                );
                report.transport_failures += 1;
            }
        }

        if report.requests > 0 {
            debug!(?report, "poll cycle done");
        }
        report
    }

    fn decode_poll_reply(
        &self,
        ctx: &C,
        device: DeviceId,
        reply: &[u8],
        queue: &mut Vec<Pending<C>>,
        report: &mut SyncReport,
    ) -> Result<(), CodecError> {
        let mut input = DataInput::new(reply);
        let count = input.read_u8()?;
        for _ in 0..count {
            let channel = input.read_u8()?;
            let command = input.read_u32()?;
            let len = input.read_u16()? as usize;
            let params = input.read_bytes(len)?;
            report.requests += 1;

            let work = match self.handlers.get(command) {
                Some(handler) => match handler.decode(ctx, device, &mut DataInput::new(params)) {
                    Ok(request) => Some((handler, request)),
                    Err(e) => {
                        warn!(handler = handler.name(), "request decode failed: {}", e);
                        report.decode_failures += 1;
                        None
                    }
                },
                None => {
                    warn!(
                        device = format_args!("{device:#010x}"),
                        command = format_args!("{command:#010x}"),
                        "no handler registered"
                    );
                    report.unknown += 1;
                    None
                }
            };
            queue.push(Pending {
                device,
                channel,
                command,
                work,
            });
        }
        Ok(())
    }
}

/// Send an event to every subscriber whose mask has bit `event_id` set.
///
/// Returns the number of successful deliveries.
pub fn broadcast_event(bus: &Bus, subscribers: &[(DeviceId, u32)], event_id: u8, params: &[u8]) -> usize {
    let targets: Vec<DeviceId> = subscribers
        .iter()
        .filter(|(_, mask)| event_id < 32 && mask & (1 << event_id) != 0)
        .map(|(id, _)| *id)
        .collect();
    if targets.is_empty() {
        return 0;
    }
    bus.send_event(&targets, event_id, params)
}
