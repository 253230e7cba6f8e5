//! Core primitives.
//!
//! Byte codec, identifier hashing, seeded randomness, the wrapping
//! millisecond clock and the reentrant bus lock. Nothing here knows about
//! devices or game rules.

pub mod clock;
pub mod codec;
pub mod hash;
pub mod lock;
pub mod rng;

// Re-export core types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use codec::{CodecError, DataInput, DataOutput, DeferredPointer};
pub use hash::{str_hash, IdHash};
pub use lock::BusLock;
pub use rng::DeterministicRng;
