//! Profiles, public-key records, aliases and reverse mappings
//!
//! JSON payloads travel in a signed envelope:
//!
//! ```text
//! json_len (u64) | json | sig_len (u64) | signature
//! ```
//!
//! The signature covers the JSON bytes. Public-key records are
//! self-certifying: the embedded signature key must hash to the record's
//! fingerprint, and the signature is checked against that embedded key.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use lib_crypto::dilithium5_verify;
use lib_identity::{fingerprint_of, Identity, PublicIdentity};
use lib_storage::chunk::ChunkStore;
use lib_storage::codec::{ByteReader, ByteWriter};
use lib_storage::keys::{lookup_key, profile_base, pubkey_base, reverse_base};
use lib_dht::Dht;
use serde::{Deserialize, Serialize};

/// Long-lived records: 365 days
pub const YEAR_TTL_SECS: u32 = 365 * 86_400;

const ALIAS_FIELD: usize = 128;
const MAX_JSON_LEN: usize = 1024 * 1024;
const MAX_SIG_LEN: usize = 8 * 1024;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// User profile JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub fingerprint: String,
    pub display_name: String,
    #[serde(default)]
    pub status_message: String,
    pub updated_at: u64,
}

/// Reverse mapping JSON: fingerprint back to a display name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseRecord {
    pub fingerprint: String,
    pub display_name: String,
    /// Hex-encoded signature public key
    pub sign_public_hex: String,
}

/// Wrap JSON bytes in the signed envelope
pub fn encode_signed_json(identity: &Identity, json: &[u8]) -> Result<Vec<u8>> {
    let signature = identity.sign(json)?;

    let mut w = ByteWriter::new();
    w.write_u64(json.len() as u64)?;
    w.write_bytes(json)?;
    w.write_u64(signature.len() as u64)?;
    w.write_bytes(&signature)?;
    Ok(w.into_inner())
}

/// Split an envelope into (json, signature) without verifying
fn split_envelope(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut r = ByteReader::new(bytes);

    let json_len = r.read_u64()? as usize;
    if json_len > MAX_JSON_LEN {
        return Err(anyhow!("record JSON too large: {} bytes", json_len));
    }
    let json = r.read_bytes(json_len)?.to_vec();

    let sig_len = r.read_u64()? as usize;
    if sig_len > MAX_SIG_LEN {
        return Err(anyhow!("record signature too large: {} bytes", sig_len));
    }
    let signature = r.read_bytes(sig_len)?.to_vec();

    Ok((json, signature))
}

/// Open an envelope, verifying the signature against a known key
pub fn decode_signed_json(bytes: &[u8], sign_public: &[u8]) -> Result<Vec<u8>> {
    let (json, signature) = split_envelope(bytes)?;
    if !dilithium5_verify(&json, &signature, sign_public)? {
        return Err(anyhow!("record signature invalid"));
    }
    Ok(json)
}

/// Publish the local identity's public-key record
pub async fn publish_public_key(chunks: &Arc<ChunkStore>, identity: &Identity) -> Result<()> {
    let json = serde_json::to_vec(&identity.public())?;
    let bytes = encode_signed_json(identity, &json)?;
    chunks
        .publish(&pubkey_base(&identity.fingerprint), &bytes, YEAR_TTL_SECS)
        .await?;
    Ok(())
}

/// Fetch and validate a public-key record.
///
/// The record is self-certifying: the embedded key must hash to the
/// requested fingerprint, then the envelope signature is checked against
/// that key.
pub async fn fetch_public_key(
    chunks: &Arc<ChunkStore>,
    fingerprint: &str,
) -> Result<PublicIdentity> {
    let bytes = chunks
        .fetch(&pubkey_base(fingerprint))
        .await
        .with_context(|| {
            format!(
                "no public-key record for {}",
                fingerprint.get(..8).unwrap_or(fingerprint)
            )
        })?;

    let (json, signature) = split_envelope(&bytes)?;
    let public: PublicIdentity = serde_json::from_slice(&json)?;

    if public.fingerprint != fingerprint || !public.fingerprint_matches() {
        return Err(anyhow!("public-key record fingerprint mismatch"));
    }
    if !dilithium5_verify(&json, &signature, &public.sign_public)? {
        return Err(anyhow!("public-key record signature invalid"));
    }
    Ok(public)
}

/// Publish the local identity's profile
pub async fn publish_profile(
    chunks: &Arc<ChunkStore>,
    identity: &Identity,
    display_name: &str,
    status_message: &str,
) -> Result<Profile> {
    let profile = Profile {
        fingerprint: identity.fingerprint.clone(),
        display_name: display_name.to_string(),
        status_message: status_message.to_string(),
        updated_at: unix_now(),
    };

    let json = serde_json::to_vec(&profile)?;
    let bytes = encode_signed_json(identity, &json)?;
    chunks
        .publish(&profile_base(&identity.fingerprint), &bytes, YEAR_TTL_SECS)
        .await?;
    Ok(profile)
}

/// Fetch a profile, verified against the owner's public-key record
pub async fn fetch_profile(chunks: &Arc<ChunkStore>, fingerprint: &str) -> Result<Profile> {
    let public = fetch_public_key(chunks, fingerprint).await?;

    let bytes = chunks.fetch(&profile_base(fingerprint)).await?;
    let json = decode_signed_json(&bytes, &public.sign_public)?;
    let profile: Profile = serde_json::from_slice(&json)?;

    if profile.fingerprint != fingerprint {
        return Err(anyhow!("profile fingerprint mismatch"));
    }
    Ok(profile)
}

/// Publish a human-name alias pointing at a fingerprint.
///
/// The alias value is the bare 128-character fingerprint in a fixed-width
/// field; resolution is a single direct read.
pub async fn publish_alias(dht: &Arc<dyn Dht>, name: &str, fingerprint: &str) -> Result<()> {
    let mut w = ByteWriter::new();
    w.write_padded_string(fingerprint, ALIAS_FIELD)?;
    dht.put_signed(
        lookup_key(name),
        w.into_inner(),
        dht.owner_value_id(),
        YEAR_TTL_SECS,
    )
    .await?;
    Ok(())
}

/// Resolve an alias to a fingerprint; None when unclaimed
pub async fn resolve_alias(dht: &Arc<dyn Dht>, name: &str) -> Result<Option<String>> {
    let Some(bytes) = dht.get(lookup_key(name)).await? else {
        return Ok(None);
    };
    let mut r = ByteReader::new(&bytes);
    Ok(Some(r.read_padded_string(ALIAS_FIELD)?))
}

/// Publish the signed reverse mapping for the local identity
pub async fn publish_reverse(
    chunks: &Arc<ChunkStore>,
    identity: &Identity,
    display_name: &str,
) -> Result<()> {
    let record = ReverseRecord {
        fingerprint: identity.fingerprint.clone(),
        display_name: display_name.to_string(),
        sign_public_hex: hex::encode(&identity.sign_public),
    };

    let json = serde_json::to_vec(&record)?;
    let bytes = encode_signed_json(identity, &json)?;
    chunks
        .publish(&reverse_base(&identity.fingerprint), &bytes, YEAR_TTL_SECS)
        .await?;
    Ok(())
}

/// Fetch and validate a reverse mapping
pub async fn fetch_reverse(chunks: &Arc<ChunkStore>, fingerprint: &str) -> Result<ReverseRecord> {
    let bytes = chunks.fetch(&reverse_base(fingerprint)).await?;
    let (json, signature) = split_envelope(&bytes)?;
    let record: ReverseRecord = serde_json::from_slice(&json)?;

    let sign_public = hex::decode(&record.sign_public_hex)?;
    if record.fingerprint != fingerprint || fingerprint_of(&sign_public) != fingerprint {
        return Err(anyhow!("reverse record fingerprint mismatch"));
    }
    if !dilithium5_verify(&json, &signature, &sign_public)? {
        return Err(anyhow!("reverse record signature invalid"));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_dht::MemoryDht;

    fn setup() -> (Arc<ChunkStore>, Arc<dyn Dht>) {
        let dht: Arc<dyn Dht> = Arc::new(MemoryDht::new());
        (Arc::new(ChunkStore::new(dht.clone())), dht)
    }

    #[tokio::test]
    async fn test_public_key_record_round_trip() {
        let (chunks, _dht) = setup();
        let identity = Identity::generate();

        publish_public_key(&chunks, &identity).await.unwrap();
        let public = fetch_public_key(&chunks, &identity.fingerprint)
            .await
            .unwrap();

        assert_eq!(public.fingerprint, identity.fingerprint);
        assert_eq!(public.kem_public, identity.kem_public);
    }

    #[tokio::test]
    async fn test_profile_round_trip() {
        let (chunks, _dht) = setup();
        let identity = Identity::generate();

        publish_public_key(&chunks, &identity).await.unwrap();
        publish_profile(&chunks, &identity, "Alice", "hello there")
            .await
            .unwrap();

        let profile = fetch_profile(&chunks, &identity.fingerprint).await.unwrap();
        assert_eq!(profile.display_name, "Alice");
        assert_eq!(profile.status_message, "hello there");
    }

    #[tokio::test]
    async fn test_forged_profile_rejected() {
        let (chunks, _dht) = setup();
        let identity = Identity::generate();
        let forger = Identity::generate();

        publish_public_key(&chunks, &identity).await.unwrap();

        // A profile signed by the wrong identity at the victim's key
        let fake = Profile {
            fingerprint: identity.fingerprint.clone(),
            display_name: "Evil".into(),
            status_message: String::new(),
            updated_at: unix_now(),
        };
        let json = serde_json::to_vec(&fake).unwrap();
        let bytes = encode_signed_json(&forger, &json).unwrap();
        chunks
            .publish(&profile_base(&identity.fingerprint), &bytes, YEAR_TTL_SECS)
            .await
            .unwrap();

        assert!(fetch_profile(&chunks, &identity.fingerprint).await.is_err());
    }

    #[tokio::test]
    async fn test_alias_round_trip() {
        let (_chunks, dht) = setup();
        let fp = "ab".repeat(64);

        publish_alias(&dht, "alice", &fp).await.unwrap();
        assert_eq!(resolve_alias(&dht, "alice").await.unwrap(), Some(fp));
        assert_eq!(resolve_alias(&dht, "unclaimed").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reverse_record_round_trip() {
        let (chunks, _dht) = setup();
        let identity = Identity::generate();

        publish_reverse(&chunks, &identity, "Alice").await.unwrap();
        let record = fetch_reverse(&chunks, &identity.fingerprint).await.unwrap();
        assert_eq!(record.display_name, "Alice");
    }
}
