//! Feed subscription lists
//!
//! Layout, big-endian:
//!
//! ```text
//! magic "FEED" (u32) | version (u8) | count (u16)
//! | count x ( topic_uuid [37] | subscribed_at (u64) | last_synced (u64) )
//! | sig_len (u16) | signature
//! ```
//!
//! The signature covers everything before `sig_len` and is checked against
//! the owner's public-key record on fetch.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use lib_crypto::dilithium5_verify;
use lib_identity::Identity;
use lib_storage::chunk::ChunkStore;
use lib_storage::codec::{ByteReader, ByteWriter};
use lib_storage::keys::feeds_base;
use serde::{Deserialize, Serialize};

use crate::profile::fetch_public_key;

/// ASCII "FEED"
pub const FEED_MAGIC: u32 = 0x4645_4544;

/// Current list version
pub const FEED_VERSION: u8 = 1;

/// Subscription list TTL: 30 days
pub const FEED_TTL_SECS: u32 = 30 * 86_400;

const TOPIC_FIELD: usize = 37;
const MAX_SIG_LEN: usize = 8 * 1024;

/// One subscribed feed topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSubscription {
    pub topic_uuid: String,
    pub subscribed_at: u64,
    pub last_synced: u64,
}

/// Serialize and sign a subscription list
pub fn encode_list(identity: &Identity, subscriptions: &[FeedSubscription]) -> Result<Vec<u8>> {
    if subscriptions.len() > u16::MAX as usize {
        return Err(anyhow!("too many feed subscriptions"));
    }

    let mut w = ByteWriter::new();
    w.write_u32(FEED_MAGIC)?;
    w.write_u8(FEED_VERSION)?;
    w.write_u16(subscriptions.len() as u16)?;
    for sub in subscriptions {
        w.write_padded_string(&sub.topic_uuid, TOPIC_FIELD)?;
        w.write_u64(sub.subscribed_at)?;
        w.write_u64(sub.last_synced)?;
    }

    let mut bytes = w.into_inner();
    let signature = identity.sign(&bytes)?;

    let mut trailer = ByteWriter::new();
    trailer.write_u16(signature.len() as u16)?;
    trailer.write_bytes(&signature)?;
    bytes.extend_from_slice(&trailer.into_inner());
    Ok(bytes)
}

/// Decode a subscription list, verifying the owner signature
pub fn decode_list_verified(bytes: &[u8], sign_public: &[u8]) -> Result<Vec<FeedSubscription>> {
    let mut r = ByteReader::new(bytes);
    r.expect_magic(FEED_MAGIC)?;

    let version = r.read_u8()?;
    if version != FEED_VERSION {
        return Err(anyhow!("unsupported feed list version {}", version));
    }

    let count = r.read_u16()? as usize;
    let mut subscriptions = Vec::with_capacity(count);
    for _ in 0..count {
        let topic_uuid = r.read_padded_string(TOPIC_FIELD)?;
        let subscribed_at = r.read_u64()?;
        let last_synced = r.read_u64()?;
        subscriptions.push(FeedSubscription {
            topic_uuid,
            subscribed_at,
            last_synced,
        });
    }

    let signed_region = &bytes[..r.position()];
    let signature = r.read_bytes_u16(MAX_SIG_LEN)?;

    if !dilithium5_verify(signed_region, &signature, sign_public)? {
        return Err(anyhow!("feed list signature invalid"));
    }
    Ok(subscriptions)
}

/// Publish the local identity's subscription list
pub async fn publish_subscriptions(
    chunks: &Arc<ChunkStore>,
    identity: &Identity,
    subscriptions: &[FeedSubscription],
) -> Result<()> {
    let bytes = encode_list(identity, subscriptions)?;
    chunks
        .publish(&feeds_base(&identity.fingerprint), &bytes, FEED_TTL_SECS)
        .await?;
    Ok(())
}

/// Fetch a user's subscription list, verified against their key record
pub async fn fetch_subscriptions(
    chunks: &Arc<ChunkStore>,
    fingerprint: &str,
) -> Result<Vec<FeedSubscription>> {
    let public = fetch_public_key(chunks, fingerprint).await?;
    let bytes = chunks.fetch(&feeds_base(fingerprint)).await?;
    decode_list_verified(&bytes, &public.sign_public)
}
