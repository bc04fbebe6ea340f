//! In-process DHT implementation
//!
//! Backs tests and single-node deployments. Semantics mirror the network
//! transport: slots keyed by `(key, value_id)`, TTL expiry, listener
//! notification on put, and packed republish that preserves raw bytes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use crate::transport::Dht;
use crate::types::{
    DhtError, DhtKey, ListenCallback, ListenEvent, ListenerId, PutObserver, TTL_PERMANENT,
};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Clone)]
struct Slot {
    data: Vec<u8>,
    stored_at: u64,
    ttl_secs: u32,
    // Monotonic insertion counter so `get` can return the newest slot
    seq: u64,
}

impl Slot {
    fn is_expired(&self, now: u64) -> bool {
        self.ttl_secs != TTL_PERMANENT && self.stored_at.saturating_add(self.ttl_secs as u64) <= now
    }
}

#[derive(Default)]
struct ListenerTable {
    by_key: HashMap<DhtKey, Vec<(ListenerId, ListenCallback)>>,
    key_of: HashMap<ListenerId, DhtKey>,
}

/// Single-process [`Dht`] implementation
pub struct MemoryDht {
    slots: Mutex<HashMap<DhtKey, HashMap<u64, Slot>>>,
    listeners: Mutex<ListenerTable>,
    observer: Mutex<Option<PutObserver>>,
    next_listener: AtomicU64,
    put_seq: AtomicU64,
    owner_value_id: AtomicU64,
    ready: AtomicBool,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            listeners: Mutex::new(ListenerTable::default()),
            observer: Mutex::new(None),
            next_listener: AtomicU64::new(1),
            put_seq: AtomicU64::new(1),
            owner_value_id: AtomicU64::new(1),
            ready: AtomicBool::new(true),
        }
    }

    /// Set the local identity's writer value id
    pub fn set_owner_value_id(&self, value_id: u64) {
        self.owner_value_id.store(value_id, Ordering::SeqCst);
    }

    /// Toggle simulated connectivity
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Install the put observer used by bootstrap-node persistence
    pub fn set_put_observer(&self, observer: Option<PutObserver>) {
        *self.observer.lock().unwrap() = observer;
    }

    /// Drop expired slots, firing expiry events at their listeners
    pub fn sweep_expired(&self) {
        let now = unix_now();
        let mut expired_keys = Vec::new();
        {
            let mut slots = self.slots.lock().unwrap();
            slots.retain(|key, values| {
                let before = values.len();
                values.retain(|_, slot| !slot.is_expired(now));
                if values.len() < before {
                    expired_keys.push(*key);
                }
                !values.is_empty()
            });
        }
        for key in expired_keys {
            self.notify(key, ListenEvent {
                value: None,
                expired: true,
            });
        }
    }

    /// Number of live slots across all keys (test introspection)
    pub fn slot_count(&self) -> usize {
        let now = unix_now();
        let slots = self.slots.lock().unwrap();
        slots
            .values()
            .map(|v| v.values().filter(|s| !s.is_expired(now)).count())
            .sum()
    }

    fn notify(&self, key: DhtKey, event: ListenEvent) {
        let callbacks: Vec<ListenCallback> = {
            let listeners = self.listeners.lock().unwrap();
            listeners
                .by_key
                .get(&key)
                .map(|v| v.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for cb in callbacks {
            cb(event.clone());
        }
    }

    fn store(&self, key: DhtKey, value: Vec<u8>, value_id: u64, ttl_secs: u32) {
        let seq = self.put_seq.fetch_add(1, Ordering::SeqCst);
        let slot = Slot {
            data: value,
            stored_at: unix_now(),
            ttl_secs,
            seq,
        };
        self.slots
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .insert(value_id, slot);
    }
}

impl Default for MemoryDht {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dht for MemoryDht {
    async fn put_signed(
        &self,
        key: DhtKey,
        value: Vec<u8>,
        value_id: u64,
        ttl_secs: u32,
    ) -> Result<(), DhtError> {
        debug!(key = %key.to_hex(), value_id, ttl_secs, len = value.len(), "memory dht put");

        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer(&key, &value, value_id, ttl_secs);
        }

        self.store(key, value.clone(), value_id, ttl_secs);
        self.notify(key, ListenEvent {
            value: Some(value),
            expired: false,
        });
        Ok(())
    }

    async fn get(&self, key: DhtKey) -> Result<Option<Vec<u8>>, DhtError> {
        let now = unix_now();
        let slots = self.slots.lock().unwrap();
        Ok(slots.get(&key).and_then(|values| {
            values
                .values()
                .filter(|slot| !slot.is_expired(now))
                .max_by_key(|slot| slot.seq)
                .map(|slot| slot.data.clone())
        }))
    }

    async fn get_all(&self, key: DhtKey) -> Result<Vec<Vec<u8>>, DhtError> {
        let now = unix_now();
        let slots = self.slots.lock().unwrap();
        Ok(slots
            .get(&key)
            .map(|values| {
                let mut live: Vec<&Slot> =
                    values.values().filter(|slot| !slot.is_expired(now)).collect();
                live.sort_by_key(|slot| slot.seq);
                live.into_iter().map(|slot| slot.data.clone()).collect()
            })
            .unwrap_or_default())
    }

    async fn get_batch(&self, keys: &[DhtKey]) -> Result<Vec<Option<Vec<u8>>>, DhtError> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(*key).await?);
        }
        Ok(results)
    }

    fn listen(&self, key: DhtKey, callback: ListenCallback) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let mut listeners = self.listeners.lock().unwrap();
        listeners.by_key.entry(key).or_default().push((id, callback));
        listeners.key_of.insert(id, key);
        id
    }

    fn cancel_listen(&self, listener: ListenerId) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(key) = listeners.key_of.remove(&listener) {
            if let Some(list) = listeners.by_key.get_mut(&key) {
                list.retain(|(id, _)| *id != listener);
                if list.is_empty() {
                    listeners.by_key.remove(&key);
                }
            }
        }
    }

    fn owner_value_id(&self) -> u64 {
        self.owner_value_id.load(Ordering::SeqCst)
    }

    async fn republish_packed(&self, key_hex: &str, value: Vec<u8>) -> Result<(), DhtError> {
        let key = DhtKey::from_hex(key_hex)?;
        debug!(key = %key_hex, len = value.len(), "memory dht republish");
        // Restored values keep their original serialized form; the slot is
        // refreshed rather than re-signed.
        self.store(key, value.clone(), 0, TTL_PERMANENT);
        self.notify(key, ListenEvent {
            value: Some(value),
            expired: false,
        });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
