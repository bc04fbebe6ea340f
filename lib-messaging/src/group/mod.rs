//! Group metadata and symmetric-key distribution
//!
//! A group is a JSON metadata record plus, per key version, an Initial Key
//! Packet that wraps the 32-byte group symmetric key (GSK) for every
//! member. Membership changes rotate the key: new GSK, incremented
//! `gsk_version`, fresh packet at the new version's key. Old packets age
//! out by TTL without exposing the new key.

pub mod engine;
pub mod keypacket;
pub mod metadata;

pub use engine::GroupEngine;
pub use keypacket::InitialKeyPacket;
pub use metadata::GroupMetadata;
