//! DHT boundary types

use std::sync::Arc;
use thiserror::Error;

/// TTL value treated as permanent
pub const TTL_PERMANENT: u32 = u32::MAX;

/// Opaque 32-byte DHT key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DhtKey(pub [u8; 32]);

impl DhtKey {
    /// Hex form of the key, used as the persistence row key
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a key from 64 hex characters
    pub fn from_hex(s: &str) -> Result<Self, DhtError> {
        let bytes = hex::decode(s).map_err(|_| DhtError::InvalidKey(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DhtError::InvalidKey(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Debug for DhtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhtKey({})", &self.to_hex()[..16])
    }
}

/// Transport-level errors
#[derive(Debug, Error, Clone)]
pub enum DhtError {
    #[error("network error: {0}")]
    Network(String),
    #[error("operation timed out")]
    Timeout,
    #[error("invalid DHT key: {0}")]
    InvalidKey(String),
}

/// Identifier for a registered listener
pub type ListenerId = u64;

/// Event delivered to a listener
#[derive(Debug, Clone)]
pub struct ListenEvent {
    /// The new value, or None when the slot disappeared
    pub value: Option<Vec<u8>>,
    /// True when the event is a TTL expiration rather than an update
    pub expired: bool,
}

/// Callback invoked on every listened-key update.
///
/// Receives an owned event; must not block.
pub type ListenCallback = Arc<dyn Fn(ListenEvent) + Send + Sync>;

/// Hook invoked for every local put: `(key, value, value_id, ttl_secs)`.
///
/// Bootstrap nodes mirror observed traffic into their persistent store
/// through this.
pub type PutObserver = Arc<dyn Fn(&DhtKey, &[u8], u64, u32) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hex_round_trip() {
        let key = DhtKey([7u8; 32]);
        let parsed = DhtKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_key_from_bad_hex() {
        assert!(DhtKey::from_hex("zz").is_err());
        assert!(DhtKey::from_hex("aabb").is_err());
    }
}
