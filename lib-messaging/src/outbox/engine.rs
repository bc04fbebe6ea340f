//! Outbox engine
//!
//! Queueing is a serialized read-modify-publish cycle over the current day
//! bucket. The cache mutex is never held across a DHT call; a separate
//! async lock serializes whole queue operations so concurrent writers
//! cannot interleave bucket versions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use futures::future::join_all;
use lib_dht::{Dht, ListenCallback, ListenerId};
use lib_storage::chunk::{ChunkError, ChunkStore};
use lib_storage::keys::{chunk_key, outbox_base};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::outbox::cache::BucketCache;
use crate::outbox::message::{
    decode_bucket, encode_bucket, DirectMessage, BUCKET_CAP, DEFAULT_DM_TTL_SECS,
};
use crate::outbox::{current_day, unix_now};

/// DHT TTL of a day bucket record
const BUCKET_RECORD_TTL_SECS: u32 = DEFAULT_DM_TTL_SECS as u32;

/// How widely the sync variants range over day buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Yesterday, today and tomorrow (clock-skew tolerant)
    Recent,
    /// The last week plus tomorrow
    Full,
}

#[derive(Default)]
struct OutboxStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    messages_queued: AtomicU64,
    publish_failures: AtomicU64,
    messages_synced: AtomicU64,
}

/// Counter snapshot exported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub messages_queued: u64,
    pub publish_failures: u64,
    pub messages_synced: u64,
}

struct Subscription {
    listener: ListenerId,
    day: u64,
    callback: ListenCallback,
}

/// Per-identity direct-message outbox over the chunked store
pub struct Outbox {
    chunks: Arc<ChunkStore>,
    cache: StdMutex<BucketCache>,
    // Serializes read-modify-publish cycles; never nested inside the cache lock
    queue_lock: AsyncMutex<()>,
    subscriptions: StdMutex<HashMap<String, Subscription>>,
    stats: OutboxStats,
}

impl Outbox {
    pub fn new(chunks: Arc<ChunkStore>) -> Self {
        Self {
            chunks,
            cache: StdMutex::new(BucketCache::new()),
            queue_lock: AsyncMutex::new(()),
            subscriptions: StdMutex::new(HashMap::new()),
            stats: OutboxStats::default(),
        }
    }

    /// Append a message to the sender's current day bucket.
    ///
    /// Idempotent per `seq_num`: re-queueing an already-present sequence
    /// number leaves the bucket unchanged. A full bucket drops its oldest
    /// message. A failed publish caches the bucket with a sync flag and
    /// still reports success; [`cache_sync_pending`](Self::cache_sync_pending)
    /// retries later.
    pub async fn queue_message(
        &self,
        sender: &str,
        recipient: &str,
        ciphertext: Vec<u8>,
        seq_num: u64,
        ttl_secs: u64,
    ) -> Result<()> {
        let _serial = self.queue_lock.lock().await;

        let base_key = outbox_base(sender, recipient, current_day());

        let cached = self.cache.lock().unwrap().get(&base_key);
        let mut messages = match cached {
            Some(messages) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                messages
            }
            None => {
                self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                match self.chunks.fetch(&base_key).await {
                    Ok(bytes) => decode_bucket(&bytes)?,
                    Err(ChunkError::NotFound) => Vec::new(),
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if messages.iter().any(|m| m.seq_num == seq_num) {
            debug!(base_key, seq_num, "duplicate sequence number, bucket unchanged");
            return Ok(());
        }

        if messages.len() >= BUCKET_CAP {
            warn!(base_key, cap = BUCKET_CAP, "bucket full, dropping oldest message");
            messages.remove(0);
        }

        let now = unix_now();
        let ttl = if ttl_secs == 0 {
            DEFAULT_DM_TTL_SECS
        } else {
            ttl_secs
        };
        messages.push(DirectMessage {
            seq_num,
            timestamp: now,
            expiry: now + ttl,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            ciphertext,
        });

        let encoded = encode_bucket(&messages)?;
        match self
            .chunks
            .publish(&base_key, &encoded, BUCKET_RECORD_TTL_SECS)
            .await
        {
            Ok(()) => {
                self.cache
                    .lock()
                    .unwrap()
                    .insert(base_key, messages, false);
            }
            Err(e) => {
                warn!(error = %e, "bucket publish failed, caching for later sync");
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                self.cache.lock().unwrap().insert(base_key, messages, true);
            }
        }

        self.stats.messages_queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fetch the messages a contact queued for us on one day.
    ///
    /// An absent bucket is empty, not an error; expired messages are
    /// filtered out.
    pub async fn sync_day(
        &self,
        my_fp: &str,
        contact_fp: &str,
        day: u64,
    ) -> Result<Vec<DirectMessage>> {
        let base_key = outbox_base(contact_fp, my_fp, day);

        let bytes = match self.chunks.fetch(&base_key).await {
            Ok(bytes) => bytes,
            Err(ChunkError::NotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let now = unix_now();
        let messages: Vec<DirectMessage> = decode_bucket(&bytes)?
            .into_iter()
            .filter(|m| m.expiry >= now)
            .collect();

        self.stats
            .messages_synced
            .fetch_add(messages.len() as u64, Ordering::Relaxed);
        Ok(messages)
    }

    /// Sync yesterday, today and tomorrow from one contact
    pub async fn sync_recent(&self, my_fp: &str, contact_fp: &str) -> Result<Vec<DirectMessage>> {
        self.sync_range(my_fp, contact_fp, current_day().saturating_sub(1), current_day() + 1)
            .await
    }

    /// Sync the last week plus tomorrow from one contact
    pub async fn sync_full(&self, my_fp: &str, contact_fp: &str) -> Result<Vec<DirectMessage>> {
        self.sync_range(my_fp, contact_fp, current_day().saturating_sub(6), current_day() + 1)
            .await
    }

    async fn sync_range(
        &self,
        my_fp: &str,
        contact_fp: &str,
        from_day: u64,
        to_day: u64,
    ) -> Result<Vec<DirectMessage>> {
        let mut all = Vec::new();
        for day in from_day..=to_day {
            all.extend(self.sync_day(my_fp, contact_fp, day).await?);
        }
        Ok(all)
    }

    /// Fan out a sync across every contact.
    ///
    /// Per-contact failures are logged and skipped; one unreachable bucket
    /// never hides the others.
    pub async fn sync_all_contacts(
        &self,
        my_fp: &str,
        contacts: &[String],
        mode: SyncMode,
    ) -> Vec<DirectMessage> {
        let fetches = contacts.iter().map(|contact| async move {
            let result = match mode {
                SyncMode::Recent => self.sync_recent(my_fp, contact).await,
                SyncMode::Full => self.sync_full(my_fp, contact).await,
            };
            match result {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(contact = %contact, error = %e, "contact sync failed");
                    Vec::new()
                }
            }
        });

        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// Register a long-lived listener on today's bucket from one contact.
    ///
    /// The callback fires on every update of the bucket's chunk-0 slot.
    pub fn subscribe(&self, my_fp: &str, contact_fp: &str, callback: ListenCallback) {
        let day = current_day();
        let key = chunk_key(&outbox_base(contact_fp, my_fp, day), 0);
        let listener = self.chunks.dht().listen(key, callback.clone());

        let mut subscriptions = self.subscriptions.lock().unwrap();
        if let Some(previous) = subscriptions.insert(contact_fp.to_string(), Subscription {
            listener,
            day,
            callback,
        }) {
            self.chunks.dht().cancel_listen(previous.listener);
        }
    }

    /// Drop the listener for one contact
    pub fn unsubscribe(&self, contact_fp: &str) {
        if let Some(sub) = self.subscriptions.lock().unwrap().remove(contact_fp) {
            self.chunks.dht().cancel_listen(sub.listener);
        }
    }

    /// Rotate listeners whose tracked day is no longer current.
    ///
    /// Returns the contacts that rotated; callers should sync yesterday for
    /// each to catch messages queued around midnight.
    pub fn check_day_rotation(&self, my_fp: &str) -> Vec<String> {
        let day = current_day();
        let mut rotated = Vec::new();

        let mut subscriptions = self.subscriptions.lock().unwrap();
        for (contact, sub) in subscriptions.iter_mut() {
            if sub.day == day {
                continue;
            }
            self.chunks.dht().cancel_listen(sub.listener);
            let key = chunk_key(&outbox_base(contact, my_fp, day), 0);
            sub.listener = self.chunks.dht().listen(key, sub.callback.clone());
            sub.day = day;
            rotated.push(contact.clone());
        }
        rotated
    }

    /// Retry publishing every bucket held with the sync flag
    pub async fn cache_sync_pending(&self) -> Result<usize> {
        let pending = self.cache.lock().unwrap().pending();
        let mut synced = 0;

        for (base_key, messages) in pending {
            let encoded = encode_bucket(&messages)?;
            match self
                .chunks
                .publish(&base_key, &encoded, BUCKET_RECORD_TTL_SECS)
                .await
            {
                Ok(()) => {
                    self.cache.lock().unwrap().mark_synced(&base_key);
                    synced += 1;
                }
                Err(e) => {
                    warn!(base_key = %base_key, error = %e, "pending bucket still unpublishable");
                }
            }
        }
        Ok(synced)
    }

    pub fn stats(&self) -> OutboxStatsSnapshot {
        OutboxStatsSnapshot {
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            messages_queued: self.stats.messages_queued.load(Ordering::Relaxed),
            publish_failures: self.stats.publish_failures.load(Ordering::Relaxed),
            messages_synced: self.stats.messages_synced.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_dht::{ListenEvent, MemoryDht};

    fn fingerprints() -> (String, String) {
        ("aa".repeat(64), "bb".repeat(64))
    }

    fn outbox() -> Arc<Outbox> {
        let chunks = Arc::new(ChunkStore::new(Arc::new(MemoryDht::new())));
        Arc::new(Outbox::new(chunks))
    }

    #[tokio::test]
    async fn test_queue_and_sync_day() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();

        outbox
            .queue_message(&alice, &bob, b"CT-A".to_vec(), 1, DEFAULT_DM_TTL_SECS)
            .await
            .unwrap();

        let messages = outbox.sync_day(&bob, &alice, current_day()).await.unwrap();
        assert_eq!(messages.len(), 1);
        let m = &messages[0];
        assert_eq!(m.seq_num, 1);
        assert_eq!(m.sender, alice);
        assert_eq!(m.recipient, bob);
        assert_eq!(m.ciphertext, b"CT-A");
        assert_eq!(m.expiry, m.timestamp + DEFAULT_DM_TTL_SECS);
    }

    #[tokio::test]
    async fn test_queue_idempotent_by_seq_num() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();

        outbox
            .queue_message(&alice, &bob, b"CT-A".to_vec(), 1, 0)
            .await
            .unwrap();
        outbox
            .queue_message(&alice, &bob, b"CT-A".to_vec(), 1, 0)
            .await
            .unwrap();

        let messages = outbox.sync_day(&bob, &alice, current_day()).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_seq_order_preserved() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();

        for seq in 1..=5 {
            outbox
                .queue_message(&alice, &bob, vec![seq as u8], seq, 0)
                .await
                .unwrap();
        }

        let messages = outbox.sync_day(&bob, &alice, current_day()).await.unwrap();
        let seqs: Vec<u64> = messages.iter().map(|m| m.seq_num).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_full_bucket_drops_oldest() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();
        let day = current_day();
        let base_key = outbox_base(&alice, &bob, day);

        // Pre-seed a full bucket directly to avoid 500 publish cycles
        let now = unix_now();
        let full: Vec<DirectMessage> = (1..=BUCKET_CAP as u64)
            .map(|seq| DirectMessage {
                seq_num: seq,
                timestamp: now,
                expiry: now + DEFAULT_DM_TTL_SECS,
                sender: alice.clone(),
                recipient: bob.clone(),
                ciphertext: vec![1],
            })
            .collect();
        outbox
            .chunks
            .publish(&base_key, &encode_bucket(&full).unwrap(), 604_800)
            .await
            .unwrap();

        outbox
            .queue_message(&alice, &bob, b"newest".to_vec(), BUCKET_CAP as u64 + 1, 0)
            .await
            .unwrap();

        let messages = outbox.sync_day(&bob, &alice, day).await.unwrap();
        assert_eq!(messages.len(), BUCKET_CAP);
        assert_eq!(messages.first().unwrap().seq_num, 2, "oldest dropped");
        assert_eq!(
            messages.last().unwrap().seq_num,
            BUCKET_CAP as u64 + 1,
            "newest appended"
        );
    }

    #[tokio::test]
    async fn test_sync_missing_bucket_is_empty() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();
        assert!(outbox
            .sync_day(&bob, &alice, current_day())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_sync_all_contacts_accumulates() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();
        let carol = "cc".repeat(64);

        outbox
            .queue_message(&alice, &bob, b"from-alice".to_vec(), 1, 0)
            .await
            .unwrap();
        outbox
            .queue_message(&carol, &bob, b"from-carol".to_vec(), 1, 0)
            .await
            .unwrap();

        let messages = outbox
            .sync_all_contacts(&bob, &[alice.clone(), carol.clone()], SyncMode::Recent)
            .await;
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_subscription_fires_and_rotates() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();

        let hits = Arc::new(StdMutex::new(0u32));
        let sink = hits.clone();
        outbox.subscribe(
            &bob,
            &alice,
            Arc::new(move |_event: ListenEvent| {
                *sink.lock().unwrap() += 1;
            }),
        );

        outbox
            .queue_message(&alice, &bob, b"live".to_vec(), 1, 0)
            .await
            .unwrap();
        assert!(*hits.lock().unwrap() >= 1);

        // Same-day check does not rotate
        assert!(outbox.check_day_rotation(&bob).is_empty());

        // Force the tracked day backwards to simulate midnight passing
        outbox
            .subscriptions
            .lock()
            .unwrap()
            .get_mut(&alice)
            .unwrap()
            .day -= 1;
        let rotated = outbox.check_day_rotation(&bob);
        assert_eq!(rotated, vec![alice.clone()]);

        // The rotated listener still observes today's bucket
        outbox
            .queue_message(&alice, &bob, b"after-rotate".to_vec(), 2, 0)
            .await
            .unwrap();
        assert!(*hits.lock().unwrap() >= 2);

        outbox.unsubscribe(&alice);
    }

    #[tokio::test]
    async fn test_cache_hit_on_second_queue() {
        let outbox = outbox();
        let (alice, bob) = fingerprints();

        outbox
            .queue_message(&alice, &bob, b"one".to_vec(), 1, 0)
            .await
            .unwrap();
        outbox
            .queue_message(&alice, &bob, b"two".to_vec(), 2, 0)
            .await
            .unwrap();

        let stats = outbox.stats();
        assert_eq!(stats.messages_queued, 2);
        assert!(stats.cache_hits >= 1);
    }
}
