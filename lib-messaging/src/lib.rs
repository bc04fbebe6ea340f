//! DNA Messenger Application Records
//!
//! Everything a user sees is a signed record in the DHT, published and
//! fetched through the chunked storage plane:
//!
//! - `outbox` - per-day direct-message buckets with a write-through cache
//!   and multi-contact sync
//! - `ack` - delivery acknowledgments between contact pairs
//! - `contacts` - signed contact-request records at a recipient inbox key
//! - `group` - group metadata and symmetric-key distribution via Initial
//!   Key Packets
//! - `profile` - profiles, public-key records, name aliases and reverse
//!   mappings
//! - `feeds` - feed subscription lists

pub mod ack;
pub mod contacts;
pub mod feeds;
pub mod group;
pub mod outbox;
pub mod profile;

pub use ack::{publish_ack, AckCallback, AckListener};
pub use contacts::ContactRequest;
pub use group::{GroupEngine, GroupMetadata};
pub use outbox::{DirectMessage, Outbox, SyncMode};
pub use profile::Profile;
