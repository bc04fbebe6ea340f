//! ChaCha20-Poly1305 AEAD
//!
//! Nonces are explicit. Group key wrapping seals under a KEM shared secret
//! with an all-zero nonce and the group context as associated data; the
//! shared secret is unique per encapsulation so the nonce never repeats
//! under one key.

use anyhow::Result;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

/// AEAD nonce size in bytes (96 bits)
pub const AEAD_NONCE_BYTES: usize = 12;

/// AEAD authentication tag size in bytes (128 bits)
pub const AEAD_TAG_BYTES: usize = 16;

/// Seal plaintext under a 32-byte key; output is ciphertext || tag
pub fn aead_seal(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(nonce);

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    cipher
        .encrypt(nonce, payload)
        .map_err(|_| anyhow::anyhow!("AEAD seal failed"))
}

/// Open ciphertext || tag; fails on MAC mismatch
pub fn aead_open(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < AEAD_TAG_BYTES {
        return Err(anyhow::anyhow!("Sealed data too short"));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(nonce);

    let payload = Payload {
        msg: sealed,
        aad,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|_| anyhow::anyhow!("AEAD MAC mismatch"))
}
