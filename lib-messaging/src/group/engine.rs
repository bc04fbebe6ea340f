//! Group engine
//!
//! Authorization is enforced at the writer through read-modify-write: a
//! disallowed operation fails before any DHT put is issued. Every
//! membership change rotates the group key and publishes a fresh Initial
//! Key Packet at the next version's key.
//!
//! The owner role is not stored anywhere: at any moment the effective
//! owner is the member with the maximal SHA3-512(fingerprint) whose
//! heartbeat is younger than seven days. The deterministic choice keeps
//! simultaneous rotation attempts from diverging.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use lib_crypto::{rand_key, sha3_512};
use lib_dht::Dht;
use lib_identity::Identity;
use lib_storage::chunk::ChunkStore;
use lib_storage::keys::{group_base, gsk_base, heartbeat_key};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::group::keypacket::{build_packet, InitialKeyPacket};
use crate::group::metadata::GroupMetadata;
use crate::profile::fetch_public_key;

/// Group records TTL: 30 days
pub const GROUP_TTL_SECS: u32 = 30 * 86_400;

/// Heartbeat record TTL
pub const HEARTBEAT_TTL_SECS: u32 = 30 * 86_400;

/// A member with no heartbeat in this window loses the owner role
pub const OWNER_STALE_SECS: u64 = 7 * 86_400;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Group metadata and key-distribution operations for one local identity
pub struct GroupEngine {
    chunks: Arc<ChunkStore>,
    identity: Arc<Identity>,
}

impl GroupEngine {
    pub fn new(chunks: Arc<ChunkStore>, identity: Arc<Identity>) -> Self {
        Self { chunks, identity }
    }

    fn dht(&self) -> &Arc<dyn Dht> {
        self.chunks.dht()
    }

    /// Resolve every member's KEM public key from their key records.
    ///
    /// The local identity resolves from memory; everyone else must have a
    /// published public-key record.
    async fn resolve_member_keys(&self, members: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
        let mut keys = Vec::with_capacity(members.len());
        for member in members {
            if *member == self.identity.fingerprint {
                keys.push((member.clone(), self.identity.kem_public.clone()));
            } else {
                let public = fetch_public_key(&self.chunks, member)
                    .await
                    .with_context(|| format!("cannot wrap key for member {}", &member[..8]))?;
                keys.push((member.clone(), public.kem_public));
            }
        }
        Ok(keys)
    }

    async fn publish_metadata(&self, meta: &GroupMetadata) -> Result<()> {
        meta.validate()?;
        let json = serde_json::to_vec(meta)?;
        self.chunks
            .publish(&group_base(&meta.uuid), &json, GROUP_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Generate a fresh GSK and publish the packet for the current
    /// `gsk_version` of `meta`.
    async fn rotate_key(&self, meta: &GroupMetadata) -> Result<[u8; 32]> {
        let member_keys = self.resolve_member_keys(&meta.members).await?;
        let gsk = rand_key();

        let packet = build_packet(
            &self.identity,
            &meta.uuid,
            meta.gsk_version,
            &member_keys,
            &gsk,
        )?;
        self.chunks
            .publish(&gsk_base(&meta.uuid, meta.gsk_version), &packet, GROUP_TTL_SECS)
            .await?;

        info!(
            uuid = %meta.uuid,
            gsk_version = meta.gsk_version,
            members = meta.members.len(),
            "group key rotated"
        );
        Ok(gsk)
    }

    /// Create a group; the local identity becomes the creator.
    ///
    /// Returns the metadata and the version-1 group key.
    pub async fn create(
        &self,
        name: &str,
        description: &str,
        initial_members: &[String],
    ) -> Result<(GroupMetadata, [u8; 32])> {
        let mut members = vec![self.identity.fingerprint.clone()];
        for member in initial_members {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }

        let meta = GroupMetadata {
            uuid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            creator: self.identity.fingerprint.clone(),
            created_at: unix_now(),
            version: 1,
            gsk_version: 1,
            members,
        };

        self.publish_metadata(&meta).await?;
        let gsk = self.rotate_key(&meta).await?;
        Ok((meta, gsk))
    }

    /// Fetch and validate a group's metadata
    pub async fn fetch(&self, uuid: &str) -> Result<GroupMetadata> {
        let bytes = self.chunks.fetch(&group_base(uuid)).await?;
        let meta: GroupMetadata = serde_json::from_slice(&bytes)?;
        meta.validate()?;
        Ok(meta)
    }

    /// Update name and description. No membership change, no rotation.
    pub async fn update_info(
        &self,
        uuid: &str,
        name: &str,
        description: &str,
    ) -> Result<GroupMetadata> {
        let mut meta = self.fetch(uuid).await?;
        if !meta.can_update(&self.identity.fingerprint) {
            return Err(anyhow!("not authorized to update this group"));
        }

        meta.name = name.to_string();
        meta.description = description.to_string();
        meta.version += 1;
        self.publish_metadata(&meta).await?;
        Ok(meta)
    }

    /// Add a member and rotate the group key
    pub async fn add_member(&self, uuid: &str, member_fp: &str) -> Result<GroupMetadata> {
        let mut meta = self.fetch(uuid).await?;
        if !meta.can_update(&self.identity.fingerprint) {
            return Err(anyhow!("not authorized to add members"));
        }
        if meta.is_member(member_fp) {
            debug!(uuid, member = member_fp.get(..8).unwrap_or(member_fp), "already a member");
            return Ok(meta);
        }

        meta.members.push(member_fp.to_string());
        meta.version += 1;
        meta.gsk_version += 1;

        self.publish_metadata(&meta).await?;
        self.rotate_key(&meta).await?;
        Ok(meta)
    }

    /// Remove a member and rotate the group key.
    ///
    /// Only the creator may remove others; anyone may remove themselves.
    /// The creator cannot be removed.
    pub async fn remove_member(&self, uuid: &str, member_fp: &str) -> Result<GroupMetadata> {
        let mut meta = self.fetch(uuid).await?;
        if !meta.can_remove(&self.identity.fingerprint, member_fp) {
            return Err(anyhow!("not authorized to remove this member"));
        }
        if meta.is_creator(member_fp) {
            return Err(anyhow!("the creator cannot be removed"));
        }
        if !meta.is_member(member_fp) {
            return Ok(meta);
        }

        meta.members.retain(|m| m != member_fp);
        meta.version += 1;
        meta.gsk_version += 1;

        self.publish_metadata(&meta).await?;
        self.rotate_key(&meta).await?;
        Ok(meta)
    }

    /// Delete a group (creator only): overwrite the metadata with a
    /// short-TTL tombstone.
    pub async fn delete(&self, uuid: &str) -> Result<()> {
        let meta = self.fetch(uuid).await?;
        if !meta.can_delete(&self.identity.fingerprint) {
            return Err(anyhow!("only the creator may delete a group"));
        }
        self.chunks.delete(&group_base(uuid), None).await?;
        Ok(())
    }

    /// Publish the local member's liveness heartbeat
    pub async fn publish_heartbeat(&self, uuid: &str) -> Result<()> {
        let value = unix_now().to_be_bytes().to_vec();
        self.dht()
            .put_signed(
                heartbeat_key(uuid, &self.identity.fingerprint),
                value,
                self.identity.owner_value_id(),
                HEARTBEAT_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    /// The member currently holding the owner role.
    ///
    /// Hash-maximal fingerprint among members whose heartbeat is younger
    /// than [`OWNER_STALE_SECS`]; None when nobody is live.
    pub async fn effective_owner(&self, meta: &GroupMetadata) -> Result<Option<String>> {
        let now = unix_now();
        let mut best: Option<(Vec<u8>, String)> = None;

        for member in &meta.members {
            let Some(bytes) = self.dht().get(heartbeat_key(&meta.uuid, member)).await? else {
                continue;
            };
            let raw: [u8; 8] = match bytes.as_slice().try_into() {
                Ok(raw) => raw,
                Err(_) => {
                    warn!(member = &member[..8], "malformed heartbeat skipped");
                    continue;
                }
            };
            let ts = u64::from_be_bytes(raw);
            if now.saturating_sub(ts) > OWNER_STALE_SECS {
                continue;
            }

            let rank = sha3_512(member.as_bytes()).to_vec();
            if best.as_ref().map(|(r, _)| rank > *r).unwrap_or(true) {
                best = Some((rank, member.clone()));
            }
        }

        Ok(best.map(|(_, member)| member))
    }

    /// Recover the GSK for one version of a group.
    ///
    /// The packet signature is accepted from any current member, matching
    /// the floating owner role; non-member signers are rejected.
    pub async fn extract_gsk(&self, uuid: &str, gsk_version: u32) -> Result<[u8; 32]> {
        let bytes = self.chunks.fetch(&gsk_base(uuid, gsk_version)).await?;
        let packet = InitialKeyPacket::decode(&bytes)?;

        if packet.uuid != uuid || packet.gsk_version != gsk_version {
            return Err(anyhow!("key packet does not match requested version"));
        }

        let meta = self.fetch(uuid).await?;
        let mut verified = false;
        for member in &meta.members {
            let sign_public = if *member == self.identity.fingerprint {
                self.identity.sign_public.clone()
            } else {
                match fetch_public_key(&self.chunks, member).await {
                    Ok(public) => public.sign_public,
                    Err(_) => continue,
                }
            };
            if packet.verify(&bytes, &sign_public)? {
                verified = true;
                break;
            }
        }
        if !verified {
            return Err(anyhow!("key packet is not signed by any group member"));
        }

        packet.extract_gsk(&self.identity)
    }
}
