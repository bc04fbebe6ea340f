//! Initial Key Packet
//!
//! Layout, big-endian:
//!
//! ```text
//! uuid [37] | gsk_version (u32) | member_count (u32)
//! | N x ( fingerprint [129] | kem_ciphertext [1568] | wrapped_key [48] )
//! | sig_type (u8) | sig_len (u16) | signature
//! ```
//!
//! Per member, the GSK is sealed under a fresh Kyber1024 shared secret with
//! an all-zero nonce and `uuid || gsk_version` as associated data. The
//! signature covers every byte before `sig_type` and is produced by the
//! member currently holding the owner role.

use anyhow::{anyhow, Context, Result};
use lib_crypto::{
    aead_open, aead_seal, dilithium5_verify, kyber1024_decapsulate, kyber1024_encapsulate,
    AEAD_TAG_BYTES, KYBER1024_CIPHERTEXT_BYTES,
};
use lib_identity::Identity;
use lib_storage::codec::{ByteReader, ByteWriter};

const UUID_FIELD: usize = 37;
const FP_FIELD: usize = 129;
const WRAPPED_FIELD: usize = 32 + AEAD_TAG_BYTES;
const MAX_SIG_LEN: usize = 8 * 1024;
const MAX_MEMBERS: u32 = 10_000;

/// Dilithium5 signature
const SIG_TYPE_DILITHIUM5: u8 = 1;

/// One member's wrapped copy of the group key
#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub fingerprint: String,
    pub kem_ciphertext: Vec<u8>,
    pub wrapped_key: Vec<u8>,
}

/// A decoded Initial Key Packet
#[derive(Debug, Clone)]
pub struct InitialKeyPacket {
    pub uuid: String,
    pub gsk_version: u32,
    pub entries: Vec<MemberEntry>,
    pub signature: Vec<u8>,
    signed_region_len: usize,
}

fn wrap_aad(uuid: &str, gsk_version: u32) -> Vec<u8> {
    let mut aad = uuid.as_bytes().to_vec();
    aad.extend_from_slice(&gsk_version.to_be_bytes());
    aad
}

/// Build, sign and serialize a packet wrapping `gsk` for every member.
///
/// `members` pairs each fingerprint with its Kyber1024 public key.
pub fn build_packet(
    owner: &Identity,
    uuid: &str,
    gsk_version: u32,
    members: &[(String, Vec<u8>)],
    gsk: &[u8; 32],
) -> Result<Vec<u8>> {
    if members.is_empty() {
        return Err(anyhow!("key packet needs at least one member"));
    }

    let aad = wrap_aad(uuid, gsk_version);

    let mut w = ByteWriter::new();
    w.write_padded_string(uuid, UUID_FIELD)?;
    w.write_u32(gsk_version)?;
    w.write_u32(members.len() as u32)?;

    for (fingerprint, kem_public) in members {
        let (ciphertext, shared_secret) = kyber1024_encapsulate(kem_public)
            .with_context(|| format!("encapsulation for {} failed", &fingerprint[..8.min(fingerprint.len())]))?;
        let wrapped = aead_seal(&shared_secret, &[0u8; 12], &aad, gsk)?;

        w.write_padded_string(fingerprint, FP_FIELD)?;
        w.write_bytes(&ciphertext)?;
        w.write_bytes(&wrapped)?;
    }

    let mut bytes = w.into_inner();
    let signature = owner.sign(&bytes)?;

    let mut trailer = ByteWriter::new();
    trailer.write_u8(SIG_TYPE_DILITHIUM5)?;
    trailer.write_u16(signature.len() as u16)?;
    trailer.write_bytes(&signature)?;
    bytes.extend_from_slice(&trailer.into_inner());
    Ok(bytes)
}

impl InitialKeyPacket {
    /// Parse a packet without verifying its signature
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let uuid = r.read_padded_string(UUID_FIELD)?;
        let gsk_version = r.read_u32()?;

        let member_count = r.read_u32()?;
        if member_count == 0 || member_count > MAX_MEMBERS {
            return Err(anyhow!("invalid member count {}", member_count));
        }

        let mut entries = Vec::with_capacity(member_count as usize);
        for _ in 0..member_count {
            let fingerprint = r.read_padded_string(FP_FIELD)?;
            let kem_ciphertext = r.read_bytes(KYBER1024_CIPHERTEXT_BYTES)?.to_vec();
            let wrapped_key = r.read_bytes(WRAPPED_FIELD)?.to_vec();
            entries.push(MemberEntry {
                fingerprint,
                kem_ciphertext,
                wrapped_key,
            });
        }

        let signed_region_len = r.position();

        let sig_type = r.read_u8()?;
        if sig_type != SIG_TYPE_DILITHIUM5 {
            return Err(anyhow!("unknown signature type {}", sig_type));
        }
        let signature = r.read_bytes_u16(MAX_SIG_LEN)?;

        Ok(Self {
            uuid,
            gsk_version,
            entries,
            signature,
            signed_region_len,
        })
    }

    /// Verify the owner signature over the packet body
    pub fn verify(&self, bytes: &[u8], owner_sign_public: &[u8]) -> Result<bool> {
        dilithium5_verify(
            &bytes[..self.signed_region_len],
            &self.signature,
            owner_sign_public,
        )
    }

    /// Recover the GSK for the local identity.
    ///
    /// Scans the member entries for our fingerprint, decapsulates the
    /// beside-it ciphertext and opens the wrapped key.
    pub fn extract_gsk(&self, identity: &Identity) -> Result<[u8; 32]> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.fingerprint == identity.fingerprint)
            .ok_or_else(|| anyhow!("local identity is not in this key packet"))?;

        let shared_secret = kyber1024_decapsulate(&entry.kem_ciphertext, &identity.kem_secret)?;
        let aad = wrap_aad(&self.uuid, self.gsk_version);
        let opened = aead_open(&shared_secret, &[0u8; 12], &aad, &entry.wrapped_key)
            .context("group key unwrap failed")?;

        let gsk: [u8; 32] = opened
            .try_into()
            .map_err(|_| anyhow!("unwrapped group key has wrong length"))?;
        Ok(gsk)
    }
}
