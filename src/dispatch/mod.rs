//! Request dispatch.
//!
//! Handler registration by hashed name and the per-cycle poll engine.

pub mod engine;
pub mod handler;

pub use engine::{broadcast_event, BusContext, Dispatcher, SyncReport};
pub use handler::{HandlerTable, RequestHandler};
