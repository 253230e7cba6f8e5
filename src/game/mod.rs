//! Game Logic Module
//!
//! Everything that gives the bus meaning: what components are, what they are
//! told, and how a game runs.
//!
//! ## Module Structure
//!
//! - `component`: Component descriptors and the per-kind registry
//! - `events`: Event ids and parameter encodings
//! - `blob`: Relocatable configuration blobs
//! - `serial`: Serial numbers and their flags
//! - `timer`: Scaled countdown over a wrapping clock
//! - `bomb`: The game aggregate and its state machine
//! - `handlers`: Requests peripherals can make of the bomb

pub mod blob;
pub mod bomb;
pub mod component;
pub mod events;
pub mod handlers;
pub mod serial;
pub mod timer;

// Re-export key types
pub use bomb::{Bomb, BombConfig, BombState, ConfigError, GameError};
pub use component::{ComponentHandle, ComponentKind, ComponentRegistry, KindState, VariableValue};
pub use events::{BombEvent, EventRecord};
pub use handlers::register_builtin_handlers;
pub use serial::{calc_serial_flags, generate_serial, SerialFlags};
pub use timer::{Countdown, SyncSchedule};
