//! Contact requests
//!
//! A contact request is a single signed record published into the
//! recipient's inbox at `"{recipient}:requests"`. Each sender writes under
//! a `value_id` derived from their own fingerprint, so requests from
//! different senders accumulate as distinct slots at the one key.
//!
//! Record layout, big-endian, fixed fields NUL-padded:
//!
//! ```text
//! magic "DNAR" (u32) | version (u8) | timestamp (u64) | expiry (u64)
//! | sender_fp [129] | sender_name [64] | sig_pubkey [2592] | message [256]
//! | sig_len (u16) | sig
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use lib_crypto::{dilithium5_verify, DILITHIUM5_PUBLICKEY_BYTES};
use lib_identity::{fingerprint_of, Identity};
use lib_storage::chunk::ChunkStore;
use lib_storage::codec::{ByteReader, ByteWriter};
use lib_storage::keys::requests_base;
use tracing::warn;

/// ASCII "DNAR"
pub const REQUEST_MAGIC: u32 = 0x444E_4152;

/// Current record version
pub const REQUEST_VERSION: u8 = 1;

/// Default request lifetime: 30 days
pub const REQUEST_TTL_SECS: u32 = 30 * 86_400;

const FP_FIELD: usize = 129;
const NAME_FIELD: usize = 64;
const MESSAGE_FIELD: usize = 256;
const MAX_SIG_LEN: usize = 8 * 1024;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A validated contact request
#[derive(Debug, Clone)]
pub struct ContactRequest {
    pub timestamp: u64,
    pub expiry: u64,
    pub sender_fingerprint: String,
    pub sender_name: String,
    pub sig_pubkey: Vec<u8>,
    pub message: String,
}

impl ContactRequest {
    fn encode_unsigned(&self) -> Result<Vec<u8>> {
        if self.sig_pubkey.len() != DILITHIUM5_PUBLICKEY_BYTES {
            return Err(anyhow!(
                "signature public key must be {} bytes",
                DILITHIUM5_PUBLICKEY_BYTES
            ));
        }

        let mut w = ByteWriter::new();
        w.write_u32(REQUEST_MAGIC)?;
        w.write_u8(REQUEST_VERSION)?;
        w.write_u64(self.timestamp)?;
        w.write_u64(self.expiry)?;
        w.write_padded_string(&self.sender_fingerprint, FP_FIELD)?;
        w.write_padded_string(&self.sender_name, NAME_FIELD)?;
        w.write_bytes(&self.sig_pubkey)?;
        w.write_padded_string(&self.message, MESSAGE_FIELD)?;
        Ok(w.into_inner())
    }

    /// Serialize and sign with the sender's identity
    pub fn encode_signed(&self, identity: &Identity) -> Result<Vec<u8>> {
        let mut bytes = self.encode_unsigned()?;
        let signature = identity.sign(&bytes)?;

        let mut w = ByteWriter::new();
        w.write_u16(signature.len() as u16)?;
        w.write_bytes(&signature)?;
        bytes.extend_from_slice(&w.into_inner());
        Ok(bytes)
    }

    /// Decode and fully validate one record.
    ///
    /// Rejects expired requests, fingerprints that do not hash-bind to the
    /// embedded public key, and bad signatures.
    pub fn decode_verified(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        r.expect_magic(REQUEST_MAGIC)?;

        let version = r.read_u8()?;
        if version != REQUEST_VERSION {
            return Err(anyhow!("unsupported contact request version {}", version));
        }

        let timestamp = r.read_u64()?;
        let expiry = r.read_u64()?;
        let sender_fingerprint = r.read_padded_string(FP_FIELD)?;
        let sender_name = r.read_padded_string(NAME_FIELD)?;
        let sig_pubkey = r.read_bytes(DILITHIUM5_PUBLICKEY_BYTES)?.to_vec();
        let message = r.read_padded_string(MESSAGE_FIELD)?;

        // Everything before sig_len is covered by the signature
        let signed_region = &bytes[..r.position()];

        let signature = r.read_bytes_u16(MAX_SIG_LEN)?;

        if expiry <= unix_now() {
            return Err(anyhow!("contact request expired"));
        }
        if fingerprint_of(&sig_pubkey) != sender_fingerprint {
            return Err(anyhow!("fingerprint does not match embedded public key"));
        }
        if !dilithium5_verify(signed_region, &signature, &sig_pubkey)? {
            return Err(anyhow!("contact request signature invalid"));
        }

        Ok(Self {
            timestamp,
            expiry,
            sender_fingerprint,
            sender_name,
            sig_pubkey,
            message,
        })
    }

    /// The inbox slot id this sender writes under
    pub fn value_id(&self) -> u64 {
        lib_identity::value_id_for_fingerprint(&self.sender_fingerprint)
    }
}

/// Sign and publish a contact request into a recipient's inbox
pub async fn send_request(
    chunks: &Arc<ChunkStore>,
    identity: &Identity,
    recipient_fp: &str,
    display_name: &str,
    message: &str,
) -> Result<()> {
    let now = unix_now();
    let request = ContactRequest {
        timestamp: now,
        expiry: now + REQUEST_TTL_SECS as u64,
        sender_fingerprint: identity.fingerprint.clone(),
        sender_name: display_name.to_string(),
        sig_pubkey: identity.sign_public.clone(),
        message: message.to_string(),
    };

    let bytes = request.encode_signed(identity)?;
    chunks
        .publish_as(
            &requests_base(recipient_fp),
            &bytes,
            REQUEST_TTL_SECS,
            request.value_id(),
        )
        .await?;
    Ok(())
}

/// Fetch and validate every pending request in a recipient's inbox.
///
/// Invalid slots are skipped with a warning; one bad record never hides
/// the others.
pub async fn fetch_requests(
    chunks: &Arc<ChunkStore>,
    recipient_fp: &str,
) -> Result<Vec<ContactRequest>> {
    let slots = chunks.fetch_all(&requests_base(recipient_fp)).await?;

    let mut requests = Vec::new();
    for bytes in slots {
        match ContactRequest::decode_verified(&bytes) {
            Ok(request) => requests.push(request),
            Err(e) => warn!(error = %e, "invalid contact request skipped"),
        }
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_dht::MemoryDht;

    fn chunks() -> Arc<ChunkStore> {
        Arc::new(ChunkStore::new(Arc::new(MemoryDht::new())))
    }

    #[test]
    fn test_encode_decode_verified() {
        let identity = Identity::generate();
        let now = unix_now();
        let request = ContactRequest {
            timestamp: now,
            expiry: now + 3600,
            sender_fingerprint: identity.fingerprint.clone(),
            sender_name: "Alice".into(),
            sig_pubkey: identity.sign_public.clone(),
            message: "hello, add me".into(),
        };

        let bytes = request.encode_signed(&identity).unwrap();
        let back = ContactRequest::decode_verified(&bytes).unwrap();
        assert_eq!(back.sender_fingerprint, identity.fingerprint);
        assert_eq!(back.sender_name, "Alice");
        assert_eq!(back.message, "hello, add me");
    }

    #[test]
    fn test_tampered_record_rejected() {
        let identity = Identity::generate();
        let now = unix_now();
        let request = ContactRequest {
            timestamp: now,
            expiry: now + 3600,
            sender_fingerprint: identity.fingerprint.clone(),
            sender_name: "Alice".into(),
            sig_pubkey: identity.sign_public.clone(),
            message: "hello".into(),
        };

        let mut bytes = request.encode_signed(&identity).unwrap();
        // Flip a byte inside the message field (after header, fp, name, pubkey)
        let message_offset = 21 + FP_FIELD + NAME_FIELD + DILITHIUM5_PUBLICKEY_BYTES;
        bytes[message_offset + 10] ^= 0x01;
        assert!(ContactRequest::decode_verified(&bytes).is_err());
    }

    #[test]
    fn test_fingerprint_binding_enforced() {
        let identity = Identity::generate();
        let other = Identity::generate();
        let now = unix_now();
        // Claim another identity's fingerprint over our own public key
        let request = ContactRequest {
            timestamp: now,
            expiry: now + 3600,
            sender_fingerprint: other.fingerprint.clone(),
            sender_name: "Mallory".into(),
            sig_pubkey: identity.sign_public.clone(),
            message: "hi".into(),
        };

        let bytes = request.encode_signed(&identity).unwrap();
        let err = ContactRequest::decode_verified(&bytes).unwrap_err();
        assert!(err.to_string().contains("fingerprint"));
    }

    #[test]
    fn test_expired_request_rejected() {
        let identity = Identity::generate();
        let request = ContactRequest {
            timestamp: 1000,
            expiry: 2000,
            sender_fingerprint: identity.fingerprint.clone(),
            sender_name: "Old".into(),
            sig_pubkey: identity.sign_public.clone(),
            message: "stale".into(),
        };

        let bytes = request.encode_signed(&identity).unwrap();
        assert!(ContactRequest::decode_verified(&bytes).is_err());
    }

    #[tokio::test]
    async fn test_multi_sender_accumulation() {
        let chunks = chunks();
        let recipient = "rr".repeat(64);

        let alice = Identity::generate();
        let bob = Identity::generate();

        send_request(&chunks, &alice, &recipient, "Alice", "hi from alice")
            .await
            .unwrap();
        send_request(&chunks, &bob, &recipient, "Bob", "hi from bob")
            .await
            .unwrap();

        let requests = fetch_requests(&chunks, &recipient).await.unwrap();
        assert_eq!(requests.len(), 2);

        let mut names: Vec<&str> = requests.iter().map(|r| r.sender_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn test_resend_replaces_own_slot() {
        let chunks = chunks();
        let recipient = "rr".repeat(64);
        let alice = Identity::generate();

        send_request(&chunks, &alice, &recipient, "Alice", "first")
            .await
            .unwrap();
        send_request(&chunks, &alice, &recipient, "Alice", "second")
            .await
            .unwrap();

        let requests = fetch_requests(&chunks, &recipient).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "second");
    }
}
