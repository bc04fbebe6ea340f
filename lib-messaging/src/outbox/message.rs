//! Direct-message wire format
//!
//! Bucket layout: `count (u32)` followed by `count` records. Record layout,
//! big-endian:
//!
//! ```text
//! magic "DNA " (u32) | version (u8) | seq_num (u64) | timestamp (u64)
//! | expiry (u64) | sender_len (u16) | recipient_len (u16) | ct_len (u32)
//! | sender | recipient | ciphertext
//! ```
//!
//! Version 1 (legacy) omits `seq_num`; decoded records get `seq_num = 0`.

use anyhow::Result;
use lib_storage::codec::{ByteReader, ByteWriter, CodecError};

/// ASCII "DNA "
pub const DM_MAGIC: u32 = 0x444E_4120;

/// Current record version
pub const DM_VERSION: u8 = 2;

/// Legacy record version without sequence numbers
pub const DM_VERSION_V1: u8 = 1;

/// Maximum messages per day bucket; the oldest is dropped beyond this
pub const BUCKET_CAP: usize = 500;

/// Default message TTL: 7 days
pub const DEFAULT_DM_TTL_SECS: u64 = 604_800;

const MAX_FINGERPRINT_LEN: usize = 256;
const MAX_CIPHERTEXT_LEN: usize = 4 * 1024 * 1024;

/// One queued direct message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    /// Monotonic per (sender, recipient)
    pub seq_num: u64,
    pub timestamp: u64,
    pub expiry: u64,
    pub sender: String,
    pub recipient: String,
    /// Opaque AEAD output; the storage plane never sees plaintext
    pub ciphertext: Vec<u8>,
}

impl DirectMessage {
    fn encode_into(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u32(DM_MAGIC)?;
        w.write_u8(DM_VERSION)?;
        w.write_u64(self.seq_num)?;
        w.write_u64(self.timestamp)?;
        w.write_u64(self.expiry)?;
        w.write_u16(self.sender.len() as u16)?;
        w.write_u16(self.recipient.len() as u16)?;
        w.write_u32(self.ciphertext.len() as u32)?;
        w.write_bytes(self.sender.as_bytes())?;
        w.write_bytes(self.recipient.as_bytes())?;
        w.write_bytes(&self.ciphertext)?;
        Ok(())
    }

    fn decode_from(r: &mut ByteReader) -> Result<Self, CodecError> {
        r.expect_magic(DM_MAGIC)?;
        let version = r.read_u8()?;
        if version != DM_VERSION && version != DM_VERSION_V1 {
            return Err(CodecError::UnsupportedVersion { found: version });
        }

        let seq_num = if version == DM_VERSION { r.read_u64()? } else { 0 };
        let timestamp = r.read_u64()?;
        let expiry = r.read_u64()?;

        let sender_len = r.read_u16()? as usize;
        let recipient_len = r.read_u16()? as usize;
        let ct_len = r.read_u32()? as usize;
        if sender_len > MAX_FINGERPRINT_LEN || recipient_len > MAX_FINGERPRINT_LEN {
            return Err(CodecError::OversizeField {
                field: "fingerprint",
                len: sender_len.max(recipient_len),
                max: MAX_FINGERPRINT_LEN,
            });
        }
        if ct_len > MAX_CIPHERTEXT_LEN {
            return Err(CodecError::OversizeField {
                field: "ciphertext",
                len: ct_len,
                max: MAX_CIPHERTEXT_LEN,
            });
        }

        let sender = String::from_utf8(r.read_bytes(sender_len)?.to_vec()).map_err(|_| {
            CodecError::OversizeField {
                field: "sender",
                len: sender_len,
                max: MAX_FINGERPRINT_LEN,
            }
        })?;
        let recipient =
            String::from_utf8(r.read_bytes(recipient_len)?.to_vec()).map_err(|_| {
                CodecError::OversizeField {
                    field: "recipient",
                    len: recipient_len,
                    max: MAX_FINGERPRINT_LEN,
                }
            })?;
        let ciphertext = r.read_bytes(ct_len)?.to_vec();

        Ok(Self {
            seq_num,
            timestamp,
            expiry,
            sender,
            recipient,
            ciphertext,
        })
    }
}

/// Serialize one day bucket
pub fn encode_bucket(messages: &[DirectMessage]) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.write_u32(messages.len() as u32)?;
    for message in messages {
        message.encode_into(&mut w)?;
    }
    Ok(w.into_inner())
}

/// Deserialize one day bucket
pub fn decode_bucket(bytes: &[u8]) -> Result<Vec<DirectMessage>> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_u32()? as usize;

    let mut messages = Vec::with_capacity(count.min(BUCKET_CAP));
    for _ in 0..count {
        messages.push(DirectMessage::decode_from(&mut r)?);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u64) -> DirectMessage {
        DirectMessage {
            seq_num: seq,
            timestamp: 1_700_000_000,
            expiry: 1_700_604_800,
            sender: "aa".repeat(64),
            recipient: "bb".repeat(64),
            ciphertext: vec![0xC7; 48],
        }
    }

    #[test]
    fn test_bucket_round_trip() {
        let messages = vec![sample(1), sample(2), sample(3)];
        let bytes = encode_bucket(&messages).unwrap();
        let back = decode_bucket(&bytes).unwrap();
        assert_eq!(back, messages);
    }

    #[test]
    fn test_empty_bucket() {
        let bytes = encode_bucket(&[]).unwrap();
        assert!(decode_bucket(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_v1_record_gets_zero_seq() {
        // Hand-build a v1 record: no seq_num field
        let mut w = ByteWriter::new();
        w.write_u32(1).unwrap();
        w.write_u32(DM_MAGIC).unwrap();
        w.write_u8(DM_VERSION_V1).unwrap();
        w.write_u64(1_700_000_000).unwrap();
        w.write_u64(1_700_604_800).unwrap();
        w.write_u16(5).unwrap();
        w.write_u16(3).unwrap();
        w.write_u32(2).unwrap();
        w.write_bytes(b"alice").unwrap();
        w.write_bytes(b"bob").unwrap();
        w.write_bytes(&[1, 2]).unwrap();

        let messages = decode_bucket(&w.into_inner()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].seq_num, 0);
        assert_eq!(messages[0].sender, "alice");
    }

    #[test]
    fn test_truncated_bucket_rejected() {
        let bytes = encode_bucket(&[sample(1)]).unwrap();
        assert!(decode_bucket(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn test_bad_record_magic_rejected() {
        let mut bytes = encode_bucket(&[sample(1)]).unwrap();
        bytes[4] = b'X';
        assert!(decode_bucket(&bytes).is_err());
    }
}
