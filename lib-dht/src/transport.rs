//! DHT transport trait
//!
//! The trait is defined here so every storage-plane crate can depend on the
//! abstraction without pulling in a networking stack. Real Kademlia
//! implementations live behind this boundary; [`crate::MemoryDht`] is the
//! in-process baseline.

use async_trait::async_trait;

use crate::types::{DhtError, DhtKey, ListenCallback, ListenerId};

/// Primitive signed key/value transport consumed by the storage plane
#[async_trait]
pub trait Dht: Send + Sync {
    /// Publish a signed value at `(key, value_id)` with a TTL in seconds.
    ///
    /// The same `value_id` replaces the prior value; a different one
    /// accumulates beside it.
    async fn put_signed(
        &self,
        key: DhtKey,
        value: Vec<u8>,
        value_id: u64,
        ttl_secs: u32,
    ) -> Result<(), DhtError>;

    /// Fetch the most recently stored live value at a key
    async fn get(&self, key: DhtKey) -> Result<Option<Vec<u8>>, DhtError>;

    /// Fetch every live concurrent slot at a key
    async fn get_all(&self, key: DhtKey) -> Result<Vec<Vec<u8>>, DhtError>;

    /// Fetch many keys in one round trip; results align with the input
    async fn get_batch(&self, keys: &[DhtKey]) -> Result<Vec<Option<Vec<u8>>>, DhtError>;

    /// Register a listener invoked on every update or expiry of a key
    fn listen(&self, key: DhtKey, callback: ListenCallback) -> ListenerId;

    /// Cancel a previously registered listener
    fn cancel_listen(&self, listener: ListenerId);

    /// The stable writer `value_id` of the local identity
    fn owner_value_id(&self) -> u64;

    /// Re-issue a previously serialized signed value unchanged.
    ///
    /// The signature inside `value` is preserved; the transport must not
    /// re-sign. Used by bootstrap nodes restoring records across restarts.
    async fn republish_packed(&self, key_hex: &str, value: Vec<u8>) -> Result<(), DhtError>;

    /// Whether the routing table currently has at least one peer
    fn is_ready(&self) -> bool;
}
