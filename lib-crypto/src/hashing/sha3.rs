//! SHA-3 hashing
//!
//! SHA3-256 for chunk content hashes, SHA3-512 for fingerprints and DHT key
//! derivation. The 128-hex-character fingerprint of an identity is
//! `sha3_512_hex` of its signature public key.

use sha3::{Digest, Sha3_256, Sha3_512};

/// SHA3-256 hash
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-512 hash
pub fn sha3_512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-512 hash as a lowercase 128-character hex string
pub fn sha3_512_hex(data: &[u8]) -> String {
    hex::encode(sha3_512(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha3_256_stable() {
        let a = sha3_256(b"dna");
        let b = sha3_256(b"dna");
        assert_eq!(a, b);
        assert_ne!(a, sha3_256(b"rna"));
    }

    #[test]
    fn test_sha3_512_hex_length() {
        let fp = sha3_512_hex(b"some public key bytes");
        assert_eq!(fp.len(), 128);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
