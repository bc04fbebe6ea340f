//! DNA Messenger Identity Management
//!
//! A participant is identified by a 128-hex-character fingerprint equal to
//! SHA3-512 of their Dilithium5 signature public key. The identity carries
//! both post-quantum keypairs; secret halves never leave the device and are
//! zeroized on drop.

pub mod identity;

pub use identity::{
    fingerprint_of, value_id_for_fingerprint, Identity, PublicIdentity, FINGERPRINT_HEX_LEN,
};
