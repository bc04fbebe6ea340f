//! Delivery acknowledgments
//!
//! After draining a sender's outbox, the recipient publishes an 8-byte
//! big-endian Unix timestamp at `"{recipient}:ack:{sender}"`. The record is
//! replaced in place (`value_id = 1`), so the slot always carries the
//! latest drain time. Senders listen on the same key and mark messages with
//! `timestamp <= ack_ts` as delivered.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use lib_dht::{Dht, ListenEvent, ListenerId};
use lib_storage::keys::ack_key;
use tokio::time::sleep;
use tracing::{debug, warn};

/// ACK record TTL: 30 days
pub const ACK_TTL_SECS: u32 = 30 * 86_400;

/// Replaced-in-place slot id for ACK records
const ACK_VALUE_ID: u64 = 1;

/// Backoff before each publish retry
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

/// Delivery callback: `(sender_fp, recipient_fp, ack_ts)`
pub type AckCallback = Arc<dyn Fn(&str, &str, u64) + Send + Sync>;

/// Publish an acknowledgment that `recipient_fp` has drained
/// `sender_fp`'s outbox up to `ack_ts`.
pub async fn publish_ack(
    dht: &Arc<dyn Dht>,
    recipient_fp: &str,
    sender_fp: &str,
    ack_ts: u64,
) -> Result<()> {
    let key = ack_key(recipient_fp, sender_fp);
    let value = ack_ts.to_be_bytes().to_vec();

    let mut last_err = None;
    for attempt in 0..=RETRY_BACKOFF.len() {
        if attempt > 0 {
            sleep(RETRY_BACKOFF[attempt - 1]).await;
        }
        match dht
            .put_signed(key, value.clone(), ACK_VALUE_ID, ACK_TTL_SECS)
            .await
        {
            Ok(()) => {
                debug!(recipient_fp, sender_fp, ack_ts, "acknowledgment published");
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %e, "acknowledgment publish failed");
                last_err = Some(e);
            }
        }
    }

    Err(anyhow!(
        "acknowledgment publish exhausted retries: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Sender-side listener for one (sender, recipient) acknowledgment slot
pub struct AckListener {
    dht: Arc<dyn Dht>,
    listener: ListenerId,
}

impl AckListener {
    /// Register a listener for acknowledgments from `recipient_fp` about
    /// messages sent by `sender_fp` (the local identity).
    ///
    /// Expiration events are ignored; malformed values are skipped.
    pub fn register(
        dht: Arc<dyn Dht>,
        sender_fp: &str,
        recipient_fp: &str,
        callback: AckCallback,
    ) -> Self {
        let key = ack_key(recipient_fp, sender_fp);
        let sender = sender_fp.to_string();
        let recipient = recipient_fp.to_string();

        let listener = dht.listen(
            key,
            Arc::new(move |event: ListenEvent| {
                if event.expired {
                    return;
                }
                let Some(value) = event.value else { return };
                let raw: [u8; 8] = match value.as_slice().try_into() {
                    Ok(raw) => raw,
                    Err(_) => {
                        warn!(len = value.len(), "acknowledgment value is not 8 bytes");
                        return;
                    }
                };
                let ack_ts = u64::from_be_bytes(raw);
                callback(&sender, &recipient, ack_ts);
            }),
        );

        Self { dht, listener }
    }

    /// Stop observing the slot
    pub fn cancel(self) {
        self.dht.cancel_listen(self.listener);
    }
}
