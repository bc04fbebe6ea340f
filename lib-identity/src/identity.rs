//! Core identity structures

use anyhow::Result;
use lib_crypto::{
    dilithium5_keypair, dilithium5_sign, dilithium5_verify, kyber1024_keypair, sha3_512_hex,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a fingerprint in hex characters (SHA3-512 output)
pub const FINGERPRINT_HEX_LEN: usize = 128;

/// Compute the fingerprint of a signature public key
pub fn fingerprint_of(sign_public: &[u8]) -> String {
    sha3_512_hex(sign_public)
}

/// Derive the writer `value_id` from a fingerprint.
///
/// The first 16 hex characters parsed as a u64; zero maps to 1 so the id is
/// always distinguishable from an unset slot.
pub fn value_id_for_fingerprint(fingerprint: &str) -> u64 {
    let prefix = &fingerprint[..fingerprint.len().min(16)];
    let id = u64::from_str_radix(prefix, 16).unwrap_or(1);
    if id == 0 {
        1
    } else {
        id
    }
}

/// A full local identity: fingerprint plus both keypairs
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    /// 128-hex fingerprint, SHA3-512 of `sign_public`
    #[zeroize(skip)]
    pub fingerprint: String,
    /// Dilithium5 public key (2592 bytes)
    #[zeroize(skip)]
    pub sign_public: Vec<u8>,
    /// Dilithium5 secret key
    pub sign_secret: Vec<u8>,
    /// Kyber1024 public key (1568 bytes)
    #[zeroize(skip)]
    pub kem_public: Vec<u8>,
    /// Kyber1024 secret key
    pub kem_secret: Vec<u8>,
}

impl Identity {
    /// Generate a fresh identity with both post-quantum keypairs
    pub fn generate() -> Self {
        let (sign_public, sign_secret) = dilithium5_keypair();
        let (kem_public, kem_secret) = kyber1024_keypair();
        let fingerprint = fingerprint_of(&sign_public);

        Self {
            fingerprint,
            sign_public,
            sign_secret,
            kem_public,
            kem_secret,
        }
    }

    /// Sign a message with this identity's signature key
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        dilithium5_sign(message, &self.sign_secret)
    }

    /// Verify a signature against this identity's public key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool> {
        dilithium5_verify(message, signature, &self.sign_public)
    }

    /// The writer `value_id` this identity uses for its DHT slots
    pub fn owner_value_id(&self) -> u64 {
        value_id_for_fingerprint(&self.fingerprint)
    }

    /// Export the shareable half of this identity
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            fingerprint: self.fingerprint.clone(),
            sign_public: self.sign_public.clone(),
            kem_public: self.kem_public.clone(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret keys stay out of logs
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// The public half of an identity, safe to publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub fingerprint: String,
    #[serde(with = "hex_bytes")]
    pub sign_public: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub kem_public: Vec<u8>,
}

impl PublicIdentity {
    /// Check that the fingerprint matches the embedded signature key
    pub fn fingerprint_matches(&self) -> bool {
        fingerprint_of(&self.sign_public) == self.fingerprint
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
