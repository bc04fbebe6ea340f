//! Direct-message outbox
//!
//! Offline messages ride the DHT in per-day sender buckets: the logical
//! value at `"{sender}:outbox:{recipient}:{day}"` holds every message the
//! sender queued for that recipient on that day. A bounded write-through
//! cache keeps the read-modify-publish cycle cheap and carries messages
//! that could not be published until connectivity returns.

pub mod cache;
pub mod engine;
pub mod message;

pub use engine::{Outbox, OutboxStatsSnapshot, SyncMode};
pub use message::{DirectMessage, BUCKET_CAP, DEFAULT_DM_TTL_SECS};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Day index used in bucket keys
pub fn current_day() -> u64 {
    unix_now() / 86_400
}
