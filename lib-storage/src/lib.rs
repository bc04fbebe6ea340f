//! DNA Messenger Unified Storage Plane
//!
//! Turns the primitive, size-limited DHT transport into a durable,
//! authenticated value store:
//!
//! - `codec` - bounds-checked big-endian readers and writers for every wire
//!   structure
//! - `keys` - deterministic mapping from logical identifiers to 32-byte DHT
//!   keys via domain-separated SHA3-512 truncation
//! - `chunk` - compress, split, checksum and fan out arbitrarily large
//!   values across many small slots; fetch, verify and reassemble them
//! - `queue` - asynchronous publish queue with bounded depth, retries and
//!   cancellation
//! - `persist` - bootstrap-node mirror of long-lived signed records,
//!   republished across restarts with signatures preserved

pub mod chunk;
pub mod codec;
pub mod keys;
pub mod persist;
pub mod queue;

pub use chunk::{ChunkError, ChunkMetadata, ChunkStore};
pub use codec::{ByteReader, ByteWriter, CodecError};
pub use keys::derive_key;
pub use persist::{PersistentStore, RepublishWorker};
pub use queue::{PublishQueue, PublishStatus};
