//! Asynchronous publish queue
//!
//! Non-blocking submission in front of the synchronous chunked publish. A
//! single worker drains a bounded FIFO, retrying transient failures with
//! exponential backoff. Completion is reported through a callback invoked
//! from the worker; callbacks must not block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::chunk::{ChunkError, ChunkStore};

/// Maximum queued items
const QUEUE_CAPACITY: usize = 256;

/// Retries per item on retryable publish errors
const PUBLISH_RETRIES: u32 = 3;

/// Backoff before each retry: 1 s, 2 s, 4 s
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Final disposition of a queued publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Ok,
    Failed,
    Cancelled,
}

/// Completion callback: `(request_id, base_key, status, error)`
pub type CompletionCallback =
    Arc<dyn Fn(u64, &str, PublishStatus, Option<&ChunkError>) + Send + Sync>;

/// Submission errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("publish queue is full ({capacity} items)")]
    Full { capacity: usize },
    #[error("publish queue is shut down")]
    ShutDown,
}

struct QueueItem {
    id: u64,
    base_key: String,
    data: Vec<u8>,
    ttl_secs: u32,
    callback: Option<CompletionCallback>,
}

struct QueueShared {
    pending: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    running: AtomicBool,
    next_id: AtomicU64,
}

/// Bounded single-worker publish queue over a [`ChunkStore`]
pub struct PublishQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PublishQueue {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        let shared = Arc::new(QueueShared {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        });

        let worker_shared = shared.clone();
        let worker = tokio::spawn(async move {
            worker_loop(worker_shared, store).await;
        });

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a publish. Inputs are owned by the queue from here on; the
    /// returned id can be passed to [`cancel`](Self::cancel).
    pub fn submit(
        &self,
        base_key: &str,
        data: Vec<u8>,
        ttl_secs: u32,
        callback: Option<CompletionCallback>,
    ) -> Result<u64, QueueError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.len() >= QUEUE_CAPACITY {
                return Err(QueueError::Full {
                    capacity: QUEUE_CAPACITY,
                });
            }
            pending.push_back(QueueItem {
                id,
                base_key: base_key.to_string(),
                data,
                ttl_secs,
                callback,
            });
        }
        self.shared.notify.notify_one();
        Ok(id)
    }

    /// Cancel an item still in the queue.
    ///
    /// Returns true when the item was removed; an item already being
    /// processed completes normally.
    pub fn cancel(&self, id: u64) -> bool {
        let removed: Option<QueueItem> = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending
                .iter()
                .position(|item| item.id == id)
                .and_then(|pos| pending.remove(pos))
        };

        match removed {
            Some(item) => {
                if let Some(cb) = item.callback {
                    cb(item.id, &item.base_key, PublishStatus::Cancelled, None);
                }
                true
            }
            None => false,
        }
    }

    /// Number of items waiting in the queue
    pub fn depth(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }

    /// Stop the worker and fire `Cancelled` for every pending item
    pub async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify.notify_one();

        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let drained: Vec<QueueItem> = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.drain(..).collect()
        };
        for item in drained {
            if let Some(cb) = item.callback {
                cb(item.id, &item.base_key, PublishStatus::Cancelled, None);
            }
        }
    }
}

async fn worker_loop(shared: Arc<QueueShared>, store: Arc<ChunkStore>) {
    loop {
        // Pending items left behind at shutdown are drained as Cancelled,
        // not processed
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }

        let item = {
            let mut pending = shared.pending.lock().unwrap();
            pending.pop_front()
        };

        let Some(item) = item else {
            shared.notify.notified().await;
            continue;
        };

        let result = publish_with_retry(&store, &item).await;

        match result {
            Ok(()) => {
                debug!(id = item.id, base_key = %item.base_key, "publish complete");
                if let Some(cb) = &item.callback {
                    cb(item.id, &item.base_key, PublishStatus::Ok, None);
                }
            }
            Err(e) => {
                warn!(id = item.id, base_key = %item.base_key, error = %e, "publish failed");
                if let Some(cb) = &item.callback {
                    cb(item.id, &item.base_key, PublishStatus::Failed, Some(&e));
                }
            }
        }
    }
}

async fn publish_with_retry(store: &ChunkStore, item: &QueueItem) -> Result<(), ChunkError> {
    let mut attempt = 0;
    loop {
        match store.publish(&item.base_key, &item.data, item.ttl_secs).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < PUBLISH_RETRIES => {
                let backoff = RETRY_BACKOFF[attempt as usize];
                debug!(
                    id = item.id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "retrying publish"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_dht::MemoryDht;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{timeout, Duration};

    fn queue_with_dht() -> (PublishQueue, Arc<ChunkStore>) {
        let store = Arc::new(ChunkStore::new(Arc::new(MemoryDht::new())));
        (PublishQueue::new(store.clone()), store)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_submit_publishes_and_calls_back() {
        let (queue, store) = queue_with_dht();

        let completions: Arc<StdMutex<Vec<(u64, PublishStatus)>>> =
            Arc::new(StdMutex::new(Vec::new()));
        let sink = completions.clone();
        let cb: CompletionCallback = Arc::new(move |id, _base, status, _err| {
            sink.lock().unwrap().push((id, status));
        });

        let id = queue
            .submit("q:item", b"queued data".to_vec(), 3600, Some(cb))
            .unwrap();

        wait_for(|| !completions.lock().unwrap().is_empty()).await;
        assert_eq!(completions.lock().unwrap()[0], (id, PublishStatus::Ok));
        assert_eq!(store.fetch("q:item").await.unwrap(), b"queued data");
    }

    #[tokio::test]
    async fn test_fifo_completion_order() {
        let (queue, _store) = queue_with_dht();

        let order: Arc<StdMutex<Vec<u64>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = order.clone();
        let cb: CompletionCallback = Arc::new(move |id, _base, status, _err| {
            assert_eq!(status, PublishStatus::Ok);
            sink.lock().unwrap().push(id);
        });

        let mut ids = Vec::new();
        for i in 0..5 {
            let id = queue
                .submit(&format!("q:fifo:{}", i), vec![i as u8 + 1; 64], 3600, Some(cb.clone()))
                .unwrap();
            ids.push(id);
        }

        wait_for(|| order.lock().unwrap().len() == 5).await;
        assert_eq!(*order.lock().unwrap(), ids);
    }

    #[tokio::test]
    async fn test_cancel_pending_item() {
        let (queue, _store) = queue_with_dht();

        // An unknown id is not cancellable
        assert!(!queue.cancel(999));
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_without_retry() {
        let (queue, _store) = queue_with_dht();

        let completions: Arc<StdMutex<Vec<PublishStatus>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = completions.clone();
        let cb: CompletionCallback = Arc::new(move |_id, _base, status, err| {
            // Empty input is API misuse, never retried
            assert!(matches!(err, Some(ChunkError::EmptyInput)));
            sink.lock().unwrap().push(status);
        });

        queue.submit("q:bad", Vec::new(), 3600, Some(cb)).unwrap();

        wait_for(|| !completions.lock().unwrap().is_empty()).await;
        assert_eq!(completions.lock().unwrap()[0], PublishStatus::Failed);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending() {
        let (queue, _store) = queue_with_dht();
        queue.shutdown().await;
        assert!(matches!(
            queue.submit("q:late", b"x".to_vec(), 60, None),
            Err(QueueError::ShutDown)
        ));
    }
}
