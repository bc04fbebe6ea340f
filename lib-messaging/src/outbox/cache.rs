//! Bounded bucket cache
//!
//! 64 slots keyed by bucket base key, 60-second freshness window. An entry
//! whose publish failed is held with `needs_dht_sync` set and is exempt
//! from freshness expiry until a sync succeeds, so queued messages survive
//! an offline stretch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::outbox::message::DirectMessage;

/// Cache capacity in buckets
pub const CACHE_SLOTS: usize = 64;

/// Freshness window for clean entries
pub const CACHE_TTL: Duration = Duration::from_secs(60);

struct CacheSlot {
    messages: Vec<DirectMessage>,
    cached_at: Instant,
    needs_dht_sync: bool,
}

/// In-memory write-through cache of decoded day buckets
pub struct BucketCache {
    slots: HashMap<String, CacheSlot>,
}

impl BucketCache {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Fresh copy of a bucket, or None on miss/stale
    pub fn get(&mut self, base_key: &str) -> Option<Vec<DirectMessage>> {
        let slot = self.slots.get(base_key)?;
        if !slot.needs_dht_sync && slot.cached_at.elapsed() > CACHE_TTL {
            self.slots.remove(base_key);
            return None;
        }
        Some(self.slots[base_key].messages.clone())
    }

    /// Store a bucket, evicting the oldest entry when full.
    ///
    /// Clean entries are evicted before dirty ones; a dirty entry is only
    /// displaced as a last resort.
    pub fn insert(&mut self, base_key: String, messages: Vec<DirectMessage>, needs_dht_sync: bool) {
        if !self.slots.contains_key(&base_key) && self.slots.len() >= CACHE_SLOTS {
            self.evict_one();
        }
        self.slots.insert(base_key, CacheSlot {
            messages,
            cached_at: Instant::now(),
            needs_dht_sync,
        });
    }

    fn evict_one(&mut self) {
        let victim = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.needs_dht_sync)
            .min_by_key(|(_, slot)| slot.cached_at)
            .map(|(key, _)| key.clone())
            .or_else(|| {
                self.slots
                    .iter()
                    .min_by_key(|(_, slot)| slot.cached_at)
                    .map(|(key, _)| key.clone())
            });

        if let Some(key) = victim {
            if self
                .slots
                .get(&key)
                .map(|slot| slot.needs_dht_sync)
                .unwrap_or(false)
            {
                warn!(base_key = %key, "evicting unsynced bucket from full cache");
            }
            self.slots.remove(&key);
        }
    }

    /// Buckets whose last publish failed
    pub fn pending(&self) -> Vec<(String, Vec<DirectMessage>)> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.needs_dht_sync)
            .map(|(key, slot)| (key.clone(), slot.messages.clone()))
            .collect()
    }

    /// Clear the dirty flag after a successful publish
    pub fn mark_synced(&mut self, base_key: &str) {
        if let Some(slot) = self.slots.get_mut(base_key) {
            slot.needs_dht_sync = false;
            slot.cached_at = Instant::now();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for BucketCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(seq: u64) -> DirectMessage {
        DirectMessage {
            seq_num: seq,
            timestamp: 0,
            expiry: u64::MAX,
            sender: "s".into(),
            recipient: "r".into(),
            ciphertext: vec![],
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = BucketCache::new();
        cache.insert("bucket-a".into(), vec![message(1)], false);

        assert_eq!(cache.get("bucket-a").unwrap().len(), 1);
        assert!(cache.get("bucket-b").is_none());
    }

    #[test]
    fn test_eviction_prefers_clean_entries() {
        let mut cache = BucketCache::new();
        cache.insert("dirty".into(), vec![message(1)], true);
        for i in 0..CACHE_SLOTS {
            cache.insert(format!("clean-{}", i), vec![], false);
        }

        assert!(cache.len() <= CACHE_SLOTS);
        // The dirty entry survived a full sweep of clean insertions
        assert!(cache.get("dirty").is_some());
    }

    #[test]
    fn test_pending_and_mark_synced() {
        let mut cache = BucketCache::new();
        cache.insert("a".into(), vec![message(1)], true);
        cache.insert("b".into(), vec![message(2)], false);

        let pending = cache.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, "a");

        cache.mark_synced("a");
        assert!(cache.pending().is_empty());
    }
}
