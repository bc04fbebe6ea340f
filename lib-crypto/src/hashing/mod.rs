//! Hashing module

pub mod sha3;

pub use sha3::{sha3_256, sha3_512, sha3_512_hex};
