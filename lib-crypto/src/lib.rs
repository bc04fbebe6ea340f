//! DNA Messenger Cryptography Foundation Module
//!
//! Wraps the post-quantum primitives the messenger is built on: Dilithium5
//! signatures, Kyber1024 key encapsulation, SHA3 hashing and
//! ChaCha20-Poly1305 AEAD. Every record published to the DHT is signed and
//! every group key is wrapped through these functions.

pub mod hashing;
pub mod post_quantum;
pub mod random;
pub mod symmetric;

// Re-export the signature scheme used for all DHT records
pub use post_quantum::dilithium::{
    dilithium5_keypair, dilithium5_sign, dilithium5_verify, DILITHIUM5_PUBLICKEY_BYTES,
    DILITHIUM5_SIGNATURE_BYTES,
};

// Re-export the KEM used for group key wrapping
pub use post_quantum::kyber::{
    kyber1024_decapsulate, kyber1024_encapsulate, kyber1024_keypair, KYBER1024_CIPHERTEXT_BYTES,
    KYBER1024_PUBLICKEY_BYTES,
};

// Re-export hashing
pub use hashing::sha3::{sha3_256, sha3_512, sha3_512_hex};

// Re-export AEAD
pub use symmetric::chacha20::{aead_open, aead_seal, AEAD_NONCE_BYTES, AEAD_TAG_BYTES};

// Re-export randomness helpers
pub use random::{rand_bytes, rand_key};
