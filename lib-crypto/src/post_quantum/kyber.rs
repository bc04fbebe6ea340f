//! CRYSTALS-Kyber wrapper functions
//!
//! Kyber1024 KEM. The 32-byte shared secret is used directly as the AEAD
//! key that wraps group symmetric keys; both sides must agree on it without
//! further derivation because the wrapped key travels beside the ciphertext.

use anyhow::Result;
use pqcrypto_kyber::kyber1024;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};

/// Kyber1024 public key size in bytes
pub const KYBER1024_PUBLICKEY_BYTES: usize = 1568;

/// Kyber1024 ciphertext size in bytes
pub const KYBER1024_CIPHERTEXT_BYTES: usize = 1568;

/// Generate Kyber1024 keypair (Level 5 security)
pub fn kyber1024_keypair() -> (Vec<u8>, Vec<u8>) {
    let (pk, sk) = kyber1024::keypair();
    (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
}

/// Encapsulate a shared secret against a recipient public key
pub fn kyber1024_encapsulate(public_key: &[u8]) -> Result<(Vec<u8>, [u8; 32])> {
    let pk = kyber1024::PublicKey::from_bytes(public_key)
        .map_err(|_| anyhow::anyhow!("Invalid Kyber1024 public key"))?;

    let (shared_secret, ciphertext) = kyber1024::encapsulate(&pk);

    let mut ss = [0u8; 32];
    ss.copy_from_slice(shared_secret.as_bytes());

    Ok((ciphertext.as_bytes().to_vec(), ss))
}

/// Decapsulate a shared secret with our secret key
pub fn kyber1024_decapsulate(ciphertext: &[u8], secret_key: &[u8]) -> Result<[u8; 32]> {
    let sk = kyber1024::SecretKey::from_bytes(secret_key)
        .map_err(|_| anyhow::anyhow!("Invalid Kyber1024 secret key"))?;
    let ct = kyber1024::Ciphertext::from_bytes(ciphertext)
        .map_err(|_| anyhow::anyhow!("Invalid Kyber1024 ciphertext"))?;

    let shared_secret = kyber1024::decapsulate(&ct, &sk);

    let mut ss = [0u8; 32];
    ss.copy_from_slice(shared_secret.as_bytes());

    Ok(ss)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kyber1024_kem() -> Result<()> {
        let (pk, sk) = kyber1024_keypair();
        assert_eq!(pk.len(), KYBER1024_PUBLICKEY_BYTES);

        let (ciphertext, ss_sender) = kyber1024_encapsulate(&pk)?;
        assert_eq!(ciphertext.len(), KYBER1024_CIPHERTEXT_BYTES);

        let ss_recipient = kyber1024_decapsulate(&ciphertext, &sk)?;
        assert_eq!(ss_sender, ss_recipient);
        Ok(())
    }

    #[test]
    fn test_kyber1024_wrong_key_differs() -> Result<()> {
        let (pk, _) = kyber1024_keypair();
        let (_, other_sk) = kyber1024_keypair();

        let (ciphertext, ss_sender) = kyber1024_encapsulate(&pk)?;
        // Decapsulating with the wrong key yields an implicit-rejection secret
        let ss_wrong = kyber1024_decapsulate(&ciphertext, &other_sk)?;
        assert_ne!(ss_sender, ss_wrong);
        Ok(())
    }
}
