//! DHT key derivation
//!
//! Every record family hashes an ASCII preimage embedding the owning
//! fingerprint (or name) and a purpose tag, then truncates SHA3-512 to 32
//! bytes. Key uniqueness is a function of the preimage only; the purpose
//! tags are the domain separators.

use lib_crypto::sha3_512;
use lib_dht::DhtKey;

/// Derive a DHT key from an ASCII preimage
pub fn derive_key(preimage: &str) -> DhtKey {
    let digest = sha3_512(preimage.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest[..32]);
    DhtKey(key)
}

/// Slot key for chunk `index` of the logical value at `base`
pub fn chunk_key(base: &str, index: u32) -> DhtKey {
    derive_key(&format!("{}:chunk:{}", base, index))
}

/// Base key of a direct-message day bucket
pub fn outbox_base(sender: &str, recipient: &str, day: u64) -> String {
    format!("{}:outbox:{}:{}", sender, recipient, day)
}

/// Base key of a recipient's contact-request inbox
pub fn requests_base(recipient: &str) -> String {
    format!("{}:requests", recipient)
}

/// Acknowledgment key for a (recipient, sender) pair
pub fn ack_key(recipient: &str, sender: &str) -> DhtKey {
    derive_key(&format!("{}:ack:{}", recipient, sender))
}

/// Base key of a profile record
pub fn profile_base(fingerprint: &str) -> String {
    format!("{}:profile", fingerprint)
}

/// Base key of a public-key record
pub fn pubkey_base(fingerprint: &str) -> String {
    format!("{}:pubkey", fingerprint)
}

/// Name alias key
pub fn lookup_key(name: &str) -> DhtKey {
    derive_key(&format!("{}:lookup", name))
}

/// Base key of a reverse-mapping record
pub fn reverse_base(fingerprint: &str) -> String {
    format!("{}:reverse", fingerprint)
}

/// Base key of a group metadata record
pub fn group_base(uuid: &str) -> String {
    format!("dht:group:{}", uuid)
}

/// Base key of the Initial Key Packet for one group key version
pub fn gsk_base(uuid: &str, gsk_version: u32) -> String {
    format!("{}:gsk:{}", uuid, gsk_version)
}

/// Heartbeat key of a group member
pub fn heartbeat_key(uuid: &str, fingerprint: &str) -> DhtKey {
    derive_key(&format!("{}:heartbeat:{}", uuid, fingerprint))
}

/// Base key of a feed subscription list
pub fn feeds_base(fingerprint: &str) -> String {
    format!("dna:feeds:subscriptions:{}", fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_deterministic() {
        assert_eq!(derive_key("abc:chunk:0"), derive_key("abc:chunk:0"));
        assert_ne!(derive_key("abc:chunk:0"), derive_key("abc:chunk:1"));
    }

    #[test]
    fn test_purpose_tags_separate() {
        let fp = "aa".repeat(64);
        assert_ne!(
            derive_key(&profile_base(&fp)),
            derive_key(&pubkey_base(&fp))
        );
        assert_ne!(derive_key(&requests_base(&fp)), ack_key(&fp, &fp));
    }

    #[test]
    fn test_outbox_base_shape() {
        assert_eq!(outbox_base("s", "r", 19000), "s:outbox:r:19000");
    }

    #[test]
    fn test_chunk_key_matches_manual_derivation() {
        let manual = derive_key("base:chunk:3");
        assert_eq!(chunk_key("base", 3), manual);
    }
}
