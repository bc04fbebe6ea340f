//! DNA Messenger DHT Transport Abstraction
//!
//! The storage plane treats the DHT as an opaque signed key/value transport.
//! This crate defines that boundary: the [`Dht`] trait every higher layer
//! consumes, and [`MemoryDht`], a complete in-process implementation used by
//! tests and single-node deployments.
//!
//! A slot is addressed by `(key, value_id)`: writing the same pair replaces
//! the prior value, a different `value_id` accumulates beside it. Each slot
//! carries a TTL in seconds; `u32::MAX` is permanent.

pub mod memory;
pub mod transport;
pub mod types;

pub use memory::MemoryDht;
pub use transport::Dht;
pub use types::{
    DhtError, DhtKey, ListenCallback, ListenEvent, ListenerId, PutObserver, TTL_PERMANENT,
};
