//! Chunk record wire format
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic "DNAC" (u32) | version (u8) | total_chunks (u32) | chunk_index (u32)
//! | chunk_data_size (u32) | original_size (u32) | crc32 (u32)
//! | content_hash [32]  (version 2, chunk 0 only)
//! | payload [chunk_data_size]
//! ```
//!
//! `original_size` and `content_hash` are meaningful only on chunk 0. A
//! record with `total_chunks == 0` is a deletion tombstone.

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::chunk::ChunkError;

/// ASCII "DNAC"
pub const CHUNK_MAGIC: u32 = 0x444E_4143;

/// Legacy format without a content hash
pub const CHUNK_VERSION_V1: u8 = 1;

/// Current format carrying SHA3-256 of the uncompressed logical value
pub const CHUNK_VERSION_V2: u8 = 2;

/// Maximum payload bytes per chunk
pub const MAX_CHUNK_PAYLOAD: usize = 44_975;

/// Maximum chunks per logical value
pub const MAX_CHUNKS: u32 = 10_000;

/// Maximum uncompressed logical value size (100 MiB)
pub const MAX_LOGICAL_SIZE: usize = 100 * 1024 * 1024;

/// One decoded chunk record
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub version: u8,
    pub total_chunks: u32,
    pub chunk_index: u32,
    pub original_size: u32,
    pub crc32: u32,
    /// SHA3-256 of the uncompressed logical value; v2 chunk 0 only
    pub content_hash: Option<[u8; 32]>,
    pub payload: Vec<u8>,
}

impl ChunkRecord {
    /// Build a v2 chunk for one compressed slice
    pub fn new_v2(
        total_chunks: u32,
        chunk_index: u32,
        original_size: u32,
        content_hash: [u8; 32],
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: CHUNK_VERSION_V2,
            total_chunks,
            chunk_index,
            original_size: if chunk_index == 0 { original_size } else { 0 },
            crc32: crc32fast::hash(&payload),
            content_hash: if chunk_index == 0 {
                Some(content_hash)
            } else {
                None
            },
            payload,
        }
    }

    /// Build the deletion tombstone for one slot
    pub fn tombstone(chunk_index: u32) -> Self {
        let payload = vec![0u8];
        Self {
            version: CHUNK_VERSION_V2,
            total_chunks: 0,
            chunk_index,
            original_size: 0,
            crc32: crc32fast::hash(&payload),
            content_hash: if chunk_index == 0 { Some([0u8; 32]) } else { None },
            payload,
        }
    }

    /// A tombstone overwrites a deleted logical value
    pub fn is_tombstone(&self) -> bool {
        self.total_chunks == 0
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = ByteWriter::new();
        w.write_u32(CHUNK_MAGIC)?;
        w.write_u8(self.version)?;
        w.write_u32(self.total_chunks)?;
        w.write_u32(self.chunk_index)?;
        w.write_u32(self.payload.len() as u32)?;
        w.write_u32(self.original_size)?;
        w.write_u32(self.crc32)?;
        if let Some(hash) = &self.content_hash {
            w.write_bytes(hash)?;
        }
        w.write_bytes(&self.payload)?;
        Ok(w.into_inner())
    }

    /// Decode and verify one chunk record.
    ///
    /// Checks magic, version, payload bounds and the CRC32 over the payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChunkError> {
        let mut r = ByteReader::new(bytes);
        r.expect_magic(CHUNK_MAGIC)?;

        let version = r.read_u8()?;
        if version != CHUNK_VERSION_V1 && version != CHUNK_VERSION_V2 {
            return Err(CodecError::UnsupportedVersion { found: version }.into());
        }

        let total_chunks = r.read_u32()?;
        if total_chunks > MAX_CHUNKS {
            return Err(ChunkError::TooManyChunks {
                count: total_chunks as u64,
            });
        }

        let chunk_index = r.read_u32()?;
        let data_size = r.read_u32()? as usize;
        if data_size > MAX_CHUNK_PAYLOAD {
            return Err(CodecError::OversizeField {
                field: "chunk payload",
                len: data_size,
                max: MAX_CHUNK_PAYLOAD,
            }
            .into());
        }

        let original_size = r.read_u32()?;
        let crc32 = r.read_u32()?;

        let content_hash = if version == CHUNK_VERSION_V2 && chunk_index == 0 {
            Some(r.read_array::<32>()?)
        } else {
            None
        };

        let payload = r.read_bytes(data_size)?.to_vec();

        if crc32fast::hash(&payload) != crc32 {
            return Err(ChunkError::Checksum { index: chunk_index });
        }

        Ok(Self {
            version,
            total_chunks,
            chunk_index,
            original_size,
            crc32,
            content_hash,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_round_trip() {
        let record = ChunkRecord::new_v2(3, 0, 4096, [0xCC; 32], vec![1, 2, 3, 4]);
        let bytes = record.encode().unwrap();
        let back = ChunkRecord::decode(&bytes).unwrap();

        assert_eq!(back.version, CHUNK_VERSION_V2);
        assert_eq!(back.total_chunks, 3);
        assert_eq!(back.chunk_index, 0);
        assert_eq!(back.original_size, 4096);
        assert_eq!(back.content_hash, Some([0xCC; 32]));
        assert_eq!(back.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_non_first_chunk_omits_hash() {
        let record = ChunkRecord::new_v2(3, 1, 4096, [0xCC; 32], vec![5, 6]);
        assert!(record.content_hash.is_none());
        assert_eq!(record.original_size, 0);

        let back = ChunkRecord::decode(&record.encode().unwrap()).unwrap();
        assert!(back.content_hash.is_none());
    }

    #[test]
    fn test_crc_mismatch_rejected() {
        let record = ChunkRecord::new_v2(1, 0, 4, [0; 32], vec![1, 2, 3, 4]);
        let mut bytes = record.encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(matches!(
            ChunkRecord::decode(&bytes),
            Err(ChunkError::Checksum { index: 0 })
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let record = ChunkRecord::new_v2(1, 0, 1, [0; 32], vec![9]);
        let mut bytes = record.encode().unwrap();
        bytes[0] = b'X';

        assert!(matches!(
            ChunkRecord::decode(&bytes),
            Err(ChunkError::Codec(CodecError::BadMagic { .. }))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let record = ChunkRecord::new_v2(1, 0, 1, [0; 32], vec![9]);
        let mut bytes = record.encode().unwrap();
        bytes[4] = 9;

        assert!(matches!(
            ChunkRecord::decode(&bytes),
            Err(ChunkError::Codec(CodecError::UnsupportedVersion { found: 9 }))
        ));
    }

    #[test]
    fn test_excess_total_chunks_rejected() {
        let mut record = ChunkRecord::new_v2(1, 0, 1, [0; 32], vec![9]);
        record.total_chunks = MAX_CHUNKS + 1;
        let bytes = record.encode().unwrap();

        assert!(matches!(
            ChunkRecord::decode(&bytes),
            Err(ChunkError::TooManyChunks { .. })
        ));
    }

    #[test]
    fn test_tombstone_round_trip() {
        let bytes = ChunkRecord::tombstone(0).encode().unwrap();
        let back = ChunkRecord::decode(&bytes).unwrap();
        assert!(back.is_tombstone());
    }
}
