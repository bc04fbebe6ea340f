//! Random number generation
//!
//! OS-backed CSPRNG helpers for group symmetric keys and nonces.

use rand::rngs::OsRng;
use rand::RngCore;

/// Generate `len` random bytes
pub fn rand_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a random 32-byte key
pub fn rand_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_bytes_length() {
        assert_eq!(rand_bytes(40).len(), 40);
        assert!(rand_bytes(0).is_empty());
    }

    #[test]
    fn test_rand_key_varies() {
        assert_ne!(rand_key(), rand_key());
    }
}
