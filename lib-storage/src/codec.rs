//! Binary codec primitives
//!
//! Every on-wire structure in the messenger is read and written through
//! these cursors. All multi-byte integers are big-endian regardless of host
//! endianness. Readers are bounds-checked and return typed errors; writers
//! refuse to overrun an optional size limit.

use thiserror::Error;

/// Codec error taxonomy
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("unsupported version {found}")]
    UnsupportedVersion { found: u8 },
    #[error("oversize field {field}: {len} bytes exceeds {max}")]
    OversizeField {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Bounds-checked cursor over a byte slice
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    /// Read a fixed number of raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self.take(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(bytes);
        Ok(arr)
    }

    /// Read a u32 magic and compare against the expected value
    pub fn expect_magic(&mut self, expected: u32) -> Result<(), CodecError> {
        let found = self.read_u32()?;
        if found != expected {
            return Err(CodecError::BadMagic { expected, found });
        }
        Ok(())
    }

    /// Read a u16-length-prefixed UTF-8 string
    pub fn read_string_u16(&mut self, max: usize) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        if len > max {
            return Err(CodecError::OversizeField {
                field: "string",
                len,
                max,
            });
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::OversizeField {
            field: "string",
            len,
            max,
        })
    }

    /// Read a u16-length-prefixed byte array
    pub fn read_bytes_u16(&mut self, max: usize) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u16()? as usize;
        if len > max {
            return Err(CodecError::OversizeField {
                field: "bytes",
                len,
                max,
            });
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Read a u32-length-prefixed byte array
    pub fn read_bytes_u32(&mut self, max: usize) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(CodecError::OversizeField {
                field: "bytes",
                len,
                max,
            });
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Read a fixed-width field holding a NUL-padded string.
    ///
    /// Trailing zero bytes are padding, not part of the value.
    pub fn read_padded_string(&mut self, width: usize) -> Result<String, CodecError> {
        let bytes = self.take(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(width);
        String::from_utf8(bytes[..end].to_vec()).map_err(|_| CodecError::OversizeField {
            field: "padded string",
            len: width,
            max: width,
        })
    }
}

/// Growable writer with an optional hard size limit
pub struct ByteWriter {
    buf: Vec<u8>,
    limit: Option<usize>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            limit: None,
        }
    }

    /// Writer that refuses to grow past `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(4096)),
            limit: Some(limit),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn ensure(&mut self, n: usize) -> Result<(), CodecError> {
        if let Some(limit) = self.limit {
            if self.buf.len() + n > limit {
                return Err(CodecError::OversizeField {
                    field: "buffer",
                    len: self.buf.len() + n,
                    max: limit,
                });
            }
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.ensure(1)?;
        self.buf.push(v);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), CodecError> {
        self.ensure(2)?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.ensure(4)?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), CodecError> {
        self.ensure(8)?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.ensure(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Write a u16-length-prefixed UTF-8 string
    pub fn write_string_u16(&mut self, s: &str) -> Result<(), CodecError> {
        if s.len() > u16::MAX as usize {
            return Err(CodecError::OversizeField {
                field: "string",
                len: s.len(),
                max: u16::MAX as usize,
            });
        }
        self.write_u16(s.len() as u16)?;
        self.write_bytes(s.as_bytes())
    }

    /// Write a u16-length-prefixed byte array
    pub fn write_bytes_u16(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > u16::MAX as usize {
            return Err(CodecError::OversizeField {
                field: "bytes",
                len: bytes.len(),
                max: u16::MAX as usize,
            });
        }
        self.write_u16(bytes.len() as u16)?;
        self.write_bytes(bytes)
    }

    /// Write a u32-length-prefixed byte array
    pub fn write_bytes_u32(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > u32::MAX as usize {
            return Err(CodecError::OversizeField {
                field: "bytes",
                len: bytes.len(),
                max: u32::MAX as usize,
            });
        }
        self.write_u32(bytes.len() as u32)?;
        self.write_bytes(bytes)
    }

    /// Write a string into a fixed-width NUL-padded field
    pub fn write_padded_string(&mut self, s: &str, width: usize) -> Result<(), CodecError> {
        if s.len() > width {
            return Err(CodecError::OversizeField {
                field: "padded string",
                len: s.len(),
                max: width,
            });
        }
        self.write_bytes(s.as_bytes())?;
        let pad = vec![0u8; width - s.len()];
        self.write_bytes(&pad)
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}
