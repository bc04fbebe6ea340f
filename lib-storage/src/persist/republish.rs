//! Restart republish worker
//!
//! After a bootstrap node restarts, the newest persisted row per key is
//! replayed into the DHT with its serialized bytes unchanged. Publication
//! waits for connectivity, retries transient failures with backoff and
//! rate-limits between values so a large store does not flood the network.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use lib_dht::Dht;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::persist::store::PersistentStore;

/// Maximum wait for initial connectivity
const READY_WAIT: Duration = Duration::from_secs(60);

/// Maximum wait for reconnection before each retry
const RECONNECT_WAIT: Duration = Duration::from_secs(30);

/// Connectivity poll interval
const READY_POLL: Duration = Duration::from_secs(1);

/// Backoff before each republish retry: 500 ms, 1 s, 2 s
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

/// Pause between values
const RATE_LIMIT: Duration = Duration::from_millis(100);

/// Outcome counters of one republish pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepublishReport {
    pub republished: u64,
    pub skipped_expired: u64,
    pub failed: u64,
}

/// Replays persisted records into the DHT after a restart
pub struct RepublishWorker {
    store: Arc<PersistentStore>,
    dht: Arc<dyn Dht>,
}

impl RepublishWorker {
    pub fn new(store: Arc<PersistentStore>, dht: Arc<dyn Dht>) -> Self {
        Self { store, dht }
    }

    /// Run one full republish pass
    pub async fn run(&self) -> Result<RepublishReport> {
        if !self.wait_for_ready(READY_WAIT).await {
            // Proceed anyway; individual retries re-check connectivity
            warn!("DHT not ready after initial wait, republishing regardless");
        }

        let rows = self.store.latest_rows()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        info!(total = rows.len(), "starting republish pass");

        let mut report = RepublishReport::default();
        for row in rows {
            if let Some(expires_at) = row.expires_at {
                if expires_at <= now {
                    report.skipped_expired += 1;
                    continue;
                }
            }

            if self.republish_one(&row.key_hash, row.value_data).await {
                report.republished += 1;
            } else {
                report.failed += 1;
            }

            sleep(RATE_LIMIT).await;
        }

        info!(
            republished = report.republished,
            skipped_expired = report.skipped_expired,
            failed = report.failed,
            "republish pass complete"
        );
        Ok(report)
    }

    async fn republish_one(&self, key_hash: &str, value: Vec<u8>) -> bool {
        for attempt in 0..=RETRY_BACKOFF.len() {
            if attempt > 0 {
                sleep(RETRY_BACKOFF[attempt - 1]).await;
            }

            if !self.dht.is_ready() && !self.wait_for_ready(RECONNECT_WAIT).await {
                warn!(key_hash, attempt, "DHT unreachable, retry skipped");
                continue;
            }

            match self.dht.republish_packed(key_hash, value.clone()).await {
                Ok(()) => {
                    debug!(key_hash, attempt, "record republished");
                    return true;
                }
                Err(e) => {
                    warn!(key_hash, attempt, error = %e, "republish attempt failed");
                }
            }
        }
        false
    }

    async fn wait_for_ready(&self, max: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max;
        loop {
            if self.dht.is_ready() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            sleep(READY_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::store::PersistedValue;
    use crate::persist::{VALUE_TYPE_PERMANENT, VALUE_TYPE_YEAR};
    use lib_dht::{DhtKey, MemoryDht};

    #[tokio::test]
    async fn test_republish_restores_latest_values() {
        let store = Arc::new(PersistentStore::open_in_memory().unwrap());
        let key = DhtKey([0x42; 32]);

        // Two versions of the same key; only the newest is replayed
        store
            .insert(&PersistedValue {
                key_hash: key.to_hex(),
                value_data: b"version-1".to_vec(),
                value_type: VALUE_TYPE_YEAR,
                created_at: 100,
                expires_at: None,
            })
            .unwrap();
        store
            .insert(&PersistedValue {
                key_hash: key.to_hex(),
                value_data: b"version-2".to_vec(),
                value_type: VALUE_TYPE_YEAR,
                created_at: 200,
                expires_at: None,
            })
            .unwrap();

        let dht = Arc::new(MemoryDht::new());
        let worker = RepublishWorker::new(store, dht.clone());
        let report = worker.run().await.unwrap();

        assert_eq!(report.republished, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            dht.get(key).await.unwrap(),
            Some(b"version-2".to_vec()),
            "restored bytes must match the persisted value exactly"
        );
    }

    #[tokio::test]
    async fn test_expired_rows_skipped() {
        let store = Arc::new(PersistentStore::open_in_memory().unwrap());
        let key = DhtKey([0x43; 32]);

        store
            .insert(&PersistedValue {
                key_hash: key.to_hex(),
                value_data: b"stale".to_vec(),
                value_type: VALUE_TYPE_PERMANENT,
                created_at: 1,
                expires_at: Some(2),
            })
            .unwrap();

        let dht = Arc::new(MemoryDht::new());
        let worker = RepublishWorker::new(store, dht.clone());
        let report = worker.run().await.unwrap();

        assert_eq!(report.skipped_expired, 1);
        assert_eq!(report.republished, 0);
        assert_eq!(dht.get(key).await.unwrap(), None);
    }
}
