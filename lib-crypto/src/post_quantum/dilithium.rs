//! CRYSTALS-Dilithium wrapper functions
//!
//! Detached signatures only: DHT records carry the message and the
//! signature as separate wire fields.

use anyhow::Result;
use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};

/// Dilithium5 public key size in bytes
pub const DILITHIUM5_PUBLICKEY_BYTES: usize = 2592;

/// Dilithium5 detached signature size in bytes
pub const DILITHIUM5_SIGNATURE_BYTES: usize = 4627;

/// Generate Dilithium5 keypair (Level 5 security)
pub fn dilithium5_keypair() -> (Vec<u8>, Vec<u8>) {
    let (pk, sk) = dilithium5::keypair();
    (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
}

/// Sign message with Dilithium5, returning a detached signature
pub fn dilithium5_sign(message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
    let sk = dilithium5::SecretKey::from_bytes(secret_key)
        .map_err(|_| anyhow::anyhow!("Invalid Dilithium5 secret key"))?;

    let signature = dilithium5::detached_sign(message, &sk);
    Ok(signature.as_bytes().to_vec())
}

/// Verify a detached Dilithium5 signature
pub fn dilithium5_verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    let pk = dilithium5::PublicKey::from_bytes(public_key)
        .map_err(|_| anyhow::anyhow!("Invalid Dilithium5 public key"))?;
    let sig = dilithium5::DetachedSignature::from_bytes(signature)
        .map_err(|_| anyhow::anyhow!("Invalid Dilithium5 signature"))?;

    Ok(dilithium5::verify_detached_signature(&sig, message, &pk).is_ok())
}
