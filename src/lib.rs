//! # Bombuh Controller
//!
//! Bus controller for Bombuh, a physical bomb-defusal party game. The
//! controller discovers peripheral modules over a chunk-limited bus, hands
//! each one a binary configuration, answers their requests and runs the
//! countdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BOMBUH CONTROLLER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Primitives                              │
//! │  ├── codec.rs      - Little-endian codec, deferred pointers  │
//! │  ├── hash.rs       - 32-bit FNV-1a identifier hashing        │
//! │  ├── rng.rs        - Seeded Xorshift128+ PRNG                │
//! │  ├── clock.rs      - Wrapping millisecond ticks              │
//! │  └── lock.rs       - Reentrant bus lock                      │
//! │                                                              │
//! │  bus/              - Peripheral bus                          │
//! │  ├── protocol.rs   - Commands, addresses, constants          │
//! │  ├── transport.rs  - Chunked framing over a bus adapter      │
//! │  ├── handshake.rs  - Capability handshake                    │
//! │  ├── registry.rs   - Device registry and bus facade          │
//! │  └── virtual_device.rs - Software-emulated devices           │
//! │                                                              │
//! │  dispatch/         - Request handling                        │
//! │  ├── handler.rs    - Handler trait and table                 │
//! │  └── engine.rs     - Poll cycle and event broadcast          │
//! │                                                              │
//! │  game/             - Bomb rules                              │
//! │  ├── bomb.rs       - Lifecycle state machine                 │
//! │  ├── timer.rs      - Scaled countdown                        │
//! │  ├── blob.rs       - Relocatable configuration blobs         │
//! │  └── handlers.rs   - Built-in device requests                │
//! │                                                              │
//! │  admin/            - Operator commands and status            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! The bomb lives behind one mutex. The bus lock is reentrant so a handler
//! running inside a poll cycle can broadcast events on the same thread.
//! Locks are always taken bomb first, bus second.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod admin;
pub mod bus;
pub mod core;
pub mod dispatch;
pub mod game;
pub mod settings;

// Re-export commonly used types
pub use admin::{AdminCommand, AdminController, AdminResponse, StatusReport};
pub use bus::{Bus, DeviceId, Handshake, VirtualComponent};
pub use core::hash::str_hash;
pub use core::rng::DeterministicRng;
pub use dispatch::{Dispatcher, SyncReport};
pub use game::{Bomb, BombConfig, BombEvent, BombState, GameError};
pub use settings::ControllerConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
