//! Chunked storage layer
//!
//! A logical value of any size is zstd-compressed, split into slices of at
//! most [`header::MAX_CHUNK_PAYLOAD`] bytes, wrapped in CRC-checked headers
//! and fanned out across derived slot keys. Fetch reverses the pipeline:
//! concurrent gets, per-chunk verification, index-ordered reassembly,
//! decompression and a content-hash check against chunk 0.

pub mod header;
pub mod store;

use lib_dht::DhtError;
use thiserror::Error;

use crate::codec::CodecError;

pub use header::{ChunkRecord, MAX_CHUNKS, MAX_CHUNK_PAYLOAD, MAX_LOGICAL_SIZE};
pub use store::{ChunkMetadata, ChunkStore};

/// Chunked storage error taxonomy
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("empty input")]
    EmptyInput,
    #[error("logical value too large: {size} bytes")]
    TooLarge { size: usize },
    #[error("too many chunks: {count}")]
    TooManyChunks { count: u64 },
    #[error("compression failed: {0}")]
    Compress(String),
    #[error("decompression failed: {0}")]
    Decompress(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("chunk {index} failed CRC32")]
    Checksum { index: u32 },
    #[error("chunk index mismatch: expected {expected}, found {found}")]
    IndexMismatch { expected: u32, found: u32 },
    #[error("content hash mismatch")]
    HashMismatch,
    #[error("reassembled size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("DHT put failed: {0}")]
    DhtPut(DhtError),
    #[error("DHT get failed: {0}")]
    DhtGet(DhtError),
    #[error("fetch timed out")]
    Timeout,
    #[error("incomplete fetch: {missing} of {total} chunks missing")]
    Incomplete { missing: u32, total: u32 },
    #[error("value not found")]
    NotFound,
}

impl ChunkError {
    /// Whether a caller-side retry can plausibly succeed.
    ///
    /// `HashMismatch` is retryable: it signals a version race where chunks
    /// from different writes interleaved, which a later fetch resolves.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChunkError::DhtPut(_)
                | ChunkError::DhtGet(_)
                | ChunkError::Timeout
                | ChunkError::Incomplete { .. }
                | ChunkError::HashMismatch
        )
    }
}
