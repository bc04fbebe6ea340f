//! Chunked publish and fetch over the DHT

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use futures::future::join_all;
use lib_crypto::sha3_256;
use lib_dht::Dht;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::chunk::header::{ChunkRecord, MAX_CHUNKS, MAX_CHUNK_PAYLOAD, MAX_LOGICAL_SIZE};
use crate::chunk::ChunkError;
use crate::keys::chunk_key;

/// Total wall-clock budget for a multi-chunk fetch
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between re-issues for missing chunks
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Re-issues per missing chunk after the initial pass
const FETCH_RETRIES: u32 = 3;

/// zstd maximum practical level
const COMPRESSION_LEVEL: i32 = 19;

/// TTL of deletion tombstones in seconds
const TOMBSTONE_TTL_SECS: u32 = 60;

/// Header summary of a stored logical value
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub content_hash: Option<[u8; 32]>,
    pub original_size: u32,
    pub total_chunks: u32,
    pub is_v2: bool,
}

/// Chunked storage engine over a DHT transport
pub struct ChunkStore {
    dht: Arc<dyn Dht>,
    // Serializes concurrent publishes to one base key so chunks from two
    // compressed payloads never interleave
    publish_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChunkStore {
    pub fn new(dht: Arc<dyn Dht>) -> Self {
        Self {
            dht,
            publish_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// The transport this store publishes through
    pub fn dht(&self) -> &Arc<dyn Dht> {
        &self.dht
    }

    fn lock_for(&self, base_key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.publish_locks.lock().unwrap();
        locks
            .entry(base_key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Publish a logical value under the writer's own `value_id`
    pub async fn publish(&self, base_key: &str, data: &[u8], ttl_secs: u32) -> Result<(), ChunkError> {
        let value_id = self.dht.owner_value_id();
        self.publish_as(base_key, data, ttl_secs, value_id).await
    }

    /// Publish a logical value under an explicit `value_id`.
    ///
    /// Used by multi-writer inbox keys where the slot id encodes the sender.
    pub async fn publish_as(
        &self,
        base_key: &str,
        data: &[u8],
        ttl_secs: u32,
        value_id: u64,
    ) -> Result<(), ChunkError> {
        if data.is_empty() {
            return Err(ChunkError::EmptyInput);
        }
        if data.len() > MAX_LOGICAL_SIZE {
            return Err(ChunkError::TooLarge { size: data.len() });
        }

        let lock = self.lock_for(base_key);
        let _guard = lock.lock().await;

        let compressed = zstd::encode_all(data, COMPRESSION_LEVEL)
            .map_err(|e| ChunkError::Compress(e.to_string()))?;

        let total = compressed.len().div_ceil(MAX_CHUNK_PAYLOAD) as u32;
        if total > MAX_CHUNKS {
            return Err(ChunkError::TooManyChunks {
                count: total as u64,
            });
        }

        let content_hash = sha3_256(data);

        debug!(
            base_key,
            original = data.len(),
            compressed = compressed.len(),
            total,
            "publishing chunked value"
        );

        for (i, slice) in compressed.chunks(MAX_CHUNK_PAYLOAD).enumerate() {
            let record = ChunkRecord::new_v2(
                total,
                i as u32,
                data.len() as u32,
                content_hash,
                slice.to_vec(),
            );
            let bytes = record.encode()?;
            self.dht
                .put_signed(chunk_key(base_key, i as u32), bytes, value_id, ttl_secs)
                .await
                .map_err(ChunkError::DhtPut)?;
        }

        Ok(())
    }

    /// Fetch and reassemble the logical value at `base_key`
    pub async fn fetch(&self, base_key: &str) -> Result<Vec<u8>, ChunkError> {
        let first_bytes = self
            .dht
            .get(chunk_key(base_key, 0))
            .await
            .map_err(ChunkError::DhtGet)?
            .ok_or(ChunkError::NotFound)?;

        let first = ChunkRecord::decode(&first_bytes)?;
        if first.is_tombstone() {
            return Err(ChunkError::NotFound);
        }
        if first.chunk_index != 0 {
            return Err(ChunkError::IndexMismatch {
                expected: 0,
                found: first.chunk_index,
            });
        }
        if first.original_size as usize > MAX_LOGICAL_SIZE {
            return Err(ChunkError::TooLarge {
                size: first.original_size as usize,
            });
        }

        let total = first.total_chunks;
        if total == 1 {
            return decompress_and_verify(&first, &first.payload);
        }

        let rest = self.fetch_remaining(base_key, total).await?;

        let mut compressed = first.payload.clone();
        for i in 1..total {
            let record = rest.get(&i).ok_or(ChunkError::Incomplete {
                missing: 1,
                total,
            })?;
            compressed.extend_from_slice(&record.payload);
        }

        decompress_and_verify(&first, &compressed)
    }

    /// Concurrently fetch chunks 1..N-1, re-issuing missing slots within the
    /// outer wall-clock budget.
    async fn fetch_remaining(
        &self,
        base_key: &str,
        total: u32,
    ) -> Result<HashMap<u32, ChunkRecord>, ChunkError> {
        let deadline = Instant::now() + FETCH_TIMEOUT;

        let mut records: HashMap<u32, ChunkRecord> = HashMap::new();

        for attempt in 0..=FETCH_RETRIES {
            let missing: Vec<u32> = (1..total).filter(|i| !records.contains_key(i)).collect();
            if missing.is_empty() {
                return Ok(records);
            }

            if attempt > 0 {
                // Propagation delay between the writer's slots is the common
                // cause of a missing chunk
                if Instant::now() + RETRY_DELAY >= deadline {
                    return Err(ChunkError::Timeout);
                }
                sleep(RETRY_DELAY).await;
            }

            let budget = deadline.saturating_duration_since(Instant::now());
            if budget.is_zero() {
                return Err(ChunkError::Timeout);
            }

            let fetches = missing.iter().map(|&i| {
                let dht = self.dht.clone();
                let key = chunk_key(base_key, i);
                async move { (i, dht.get(key).await) }
            });

            let results = match timeout(budget, join_all(fetches)).await {
                Ok(results) => results,
                Err(_) => return Err(ChunkError::Timeout),
            };

            for (i, result) in results {
                match result {
                    Ok(Some(bytes)) => match ChunkRecord::decode(&bytes) {
                        Ok(record) if record.chunk_index == i => {
                            records.insert(i, record);
                        }
                        Ok(record) => {
                            warn!(
                                base_key,
                                expected = i,
                                found = record.chunk_index,
                                "chunk index mismatch, leaving slot for retry"
                            );
                        }
                        Err(e) => {
                            warn!(base_key, index = i, error = %e, "invalid chunk, leaving slot for retry");
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        warn!(base_key, index = i, error = %e, "chunk get failed");
                    }
                }
            }
        }

        let missing = (1..total).filter(|i| !records.contains_key(i)).count() as u32;
        if missing > 0 {
            return Err(ChunkError::Incomplete { missing, total });
        }
        Ok(records)
    }

    /// Batched fetch of many logical values.
    ///
    /// One DHT round trip covers every single-chunk value; only multi-chunk
    /// values fall back to the full fetch path. Per-value failures yield
    /// `None` rather than aborting the batch.
    pub async fn fetch_batch(&self, base_keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, ChunkError> {
        let keys: Vec<_> = base_keys.iter().map(|b| chunk_key(b, 0)).collect();
        let slots = self
            .dht
            .get_batch(&keys)
            .await
            .map_err(ChunkError::DhtGet)?;

        let mut out = Vec::with_capacity(base_keys.len());
        for (base_key, slot) in base_keys.iter().zip(slots) {
            let Some(bytes) = slot else {
                out.push(None);
                continue;
            };

            match ChunkRecord::decode(&bytes) {
                Ok(record) if record.is_tombstone() => out.push(None),
                Ok(record) if record.total_chunks == 1 => {
                    match decompress_and_verify(&record, &record.payload) {
                        Ok(data) => out.push(Some(data)),
                        Err(e) => {
                            warn!(base_key, error = %e, "single-chunk value failed verification");
                            out.push(None);
                        }
                    }
                }
                Ok(_) => match self.fetch(base_key).await {
                    Ok(data) => out.push(Some(data)),
                    Err(e) => {
                        warn!(base_key, error = %e, "multi-chunk fetch failed");
                        out.push(None);
                    }
                },
                Err(e) => {
                    warn!(base_key, error = %e, "invalid chunk 0 in batch");
                    out.push(None);
                }
            }
        }
        Ok(out)
    }

    /// Fetch only the chunk-0 header of a logical value.
    ///
    /// Lets callers skip a full fetch when a cached content hash matches.
    pub async fn fetch_metadata(&self, base_key: &str) -> Result<ChunkMetadata, ChunkError> {
        let bytes = self
            .dht
            .get(chunk_key(base_key, 0))
            .await
            .map_err(ChunkError::DhtGet)?
            .ok_or(ChunkError::NotFound)?;

        let record = ChunkRecord::decode(&bytes)?;
        if record.is_tombstone() {
            return Err(ChunkError::NotFound);
        }

        Ok(ChunkMetadata {
            content_hash: record.content_hash,
            original_size: record.original_size,
            total_chunks: record.total_chunks,
            is_v2: record.version == crate::chunk::header::CHUNK_VERSION_V2,
        })
    }

    /// Fetch every concurrent single-chunk value at a shared base key.
    ///
    /// Multi-writer inbox keys accumulate one slot per writer; invalid
    /// slots are skipped, not fatal.
    pub async fn fetch_all(&self, base_key: &str) -> Result<Vec<Vec<u8>>, ChunkError> {
        let slots = self
            .dht
            .get_all(chunk_key(base_key, 0))
            .await
            .map_err(ChunkError::DhtGet)?;

        let mut out = Vec::new();
        for bytes in slots {
            match ChunkRecord::decode(&bytes) {
                Ok(record) if record.is_tombstone() => {}
                Ok(record) if record.total_chunks == 1 => {
                    match decompress_and_verify(&record, &record.payload) {
                        Ok(data) => out.push(data),
                        Err(e) => warn!(base_key, error = %e, "inbox slot failed verification"),
                    }
                }
                Ok(_) => warn!(base_key, "multi-chunk record at shared key skipped"),
                Err(e) => warn!(base_key, error = %e, "invalid inbox slot skipped"),
            }
        }
        Ok(out)
    }

    /// Best-effort delete: overwrite every slot with a short-TTL tombstone.
    ///
    /// When the chunk count is unknown it is discovered from chunk 0; an
    /// already-absent value is not an error.
    pub async fn delete(&self, base_key: &str, known_chunks: Option<u32>) -> Result<(), ChunkError> {
        let total = match known_chunks {
            Some(n) => n,
            None => match self.fetch_metadata(base_key).await {
                Ok(meta) => meta.total_chunks,
                Err(ChunkError::NotFound) => return Ok(()),
                Err(e) => return Err(e),
            },
        };
        let total = total.clamp(1, MAX_CHUNKS);

        let value_id = self.dht.owner_value_id();
        for i in 0..total {
            let bytes = ChunkRecord::tombstone(i).encode()?;
            self.dht
                .put_signed(chunk_key(base_key, i), bytes, value_id, TOMBSTONE_TTL_SECS)
                .await
                .map_err(ChunkError::DhtPut)?;
        }
        Ok(())
    }
}

/// Decompress a reassembled payload and verify it against the chunk-0 header
fn decompress_and_verify(first: &ChunkRecord, compressed: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let data = zstd::decode_all(compressed).map_err(|e| ChunkError::Decompress(e.to_string()))?;

    if data.len() as u64 != first.original_size as u64 {
        return Err(ChunkError::SizeMismatch {
            expected: first.original_size as u64,
            actual: data.len() as u64,
        });
    }

    if let Some(expected) = first.content_hash {
        if sha3_256(&data) != expected {
            return Err(ChunkError::HashMismatch);
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_crypto::rand_bytes;
    use lib_dht::MemoryDht;

    fn store() -> ChunkStore {
        ChunkStore::new(Arc::new(MemoryDht::new()))
    }

    #[tokio::test]
    async fn test_single_chunk_round_trip() {
        let store = store();
        store.publish("t:small", b"hello world", 3600).await.unwrap();

        let data = store.fetch("t:small").await.unwrap();
        assert_eq!(data, b"hello world");

        let meta = store.fetch_metadata("t:small").await.unwrap();
        assert_eq!(meta.total_chunks, 1);
        assert_eq!(meta.original_size, 11);
        assert!(meta.is_v2);
    }

    #[tokio::test]
    async fn test_large_constant_buffer_round_trip() {
        // 200 KB of 0xAA compresses to a single chunk but exercises the
        // original_size bookkeeping
        let store = store();
        let data = vec![0xAAu8; 200_000];
        store.publish("t:1", &data, 3600).await.unwrap();

        let fetched = store.fetch("t:1").await.unwrap();
        assert_eq!(fetched, data);

        let meta = store.fetch_metadata("t:1").await.unwrap();
        assert_eq!(meta.original_size, 200_000);
    }

    #[tokio::test]
    async fn test_multi_chunk_round_trip() {
        // Random data defeats compression and forces several chunks
        let store = store();
        let data = rand_bytes(120_000);
        store.publish("t:big", &data, 3600).await.unwrap();

        let meta = store.fetch_metadata("t:big").await.unwrap();
        assert!(meta.total_chunks >= 2, "expected multi-chunk value");

        let fetched = store.fetch("t:big").await.unwrap();
        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let store = store();
        assert!(matches!(
            store.publish("t:empty", b"", 3600).await,
            Err(ChunkError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let store = store();
        assert!(matches!(
            store.fetch("t:absent").await,
            Err(ChunkError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_tombstones_value() {
        let store = store();
        store.publish("t:gone", b"payload", 3600).await.unwrap();
        store.delete("t:gone", None).await.unwrap();

        assert!(matches!(
            store.fetch("t:gone").await,
            Err(ChunkError::NotFound)
        ));
        assert!(matches!(
            store.fetch_metadata("t:gone").await,
            Err(ChunkError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_corrupted_chunk_surfaces_incomplete() {
        let dht = Arc::new(MemoryDht::new());
        let store = ChunkStore::new(dht.clone());
        let data = rand_bytes(120_000);
        store.publish("t:corrupt", &data, 3600).await.unwrap();

        // Overwrite chunk 1 with garbage under the same value_id
        let value_id = dht.owner_value_id();
        dht.put_signed(chunk_key("t:corrupt", 1), vec![0xFF; 16], value_id, 3600)
            .await
            .unwrap();

        let err = store.fetch("t:corrupt").await.unwrap_err();
        assert!(matches!(err, ChunkError::Incomplete { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_batch_mixes_hits_and_misses() {
        let store = store();
        store.publish("t:a", b"alpha", 3600).await.unwrap();
        store.publish("t:b", b"beta", 3600).await.unwrap();

        let results = store
            .fetch_batch(&[
                "t:a".to_string(),
                "t:missing".to_string(),
                "t:b".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(results[0], Some(b"alpha".to_vec()));
        assert_eq!(results[1], None);
        assert_eq!(results[2], Some(b"beta".to_vec()));
    }

    #[tokio::test]
    async fn test_fetch_all_accumulates_writers() {
        let store = store();
        store.publish_as("inbox", b"from-alice", 3600, 11).await.unwrap();
        store.publish_as("inbox", b"from-bob", 3600, 22).await.unwrap();

        let mut all = store.fetch_all("inbox").await.unwrap();
        all.sort();
        assert_eq!(all, vec![b"from-alice".to_vec(), b"from-bob".to_vec()]);
    }

    #[tokio::test]
    async fn test_content_hash_mismatch_detected() {
        let dht = Arc::new(MemoryDht::new());
        let store = ChunkStore::new(dht.clone());
        store.publish("t:hash", b"original value", 3600).await.unwrap();

        // Replace chunk 0 with a record whose hash does not match its data,
        // simulating interleaved writes
        let record = ChunkRecord::new_v2(
            1,
            0,
            14,
            [0xEE; 32],
            zstd::encode_all(&b"original value"[..], 3).unwrap(),
        );
        dht.put_signed(
            chunk_key("t:hash", 0),
            record.encode().unwrap(),
            dht.owner_value_id(),
            3600,
        )
        .await
        .unwrap();

        let err = store.fetch("t:hash").await.unwrap_err();
        assert!(matches!(err, ChunkError::HashMismatch));
        assert!(err.is_retryable());
    }
}
