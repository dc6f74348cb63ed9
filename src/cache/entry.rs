//! Cache Entry Module
//!
//! On-disk entry format and the in-memory record kept for each resident entry.
//!
//! Each entry lives in its own file:
//!
//! ```text
//! +----------------------+-----------+-----------------------+
//! | header (60 bytes)    | key bytes | payload (stored bytes) |
//! +----------------------+-----------+-----------------------+
//! ```
//!
//! The header is a fixed-width bincode struct carrying a CRC32C over itself
//! and the key, plus a CRC32C of the payload. A file whose length or checksums
//! disagree with its header is never returned as a hit.

use std::io::{self, Read};
use std::time::{SystemTime, UNIX_EPOCH};

use crc32c::{crc32c, crc32c_append};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::codec::Mode;

/// Magic number for entry files: "SHRD"
pub const ENTRY_MAGIC: u32 = 0x5348_5244;

/// Current entry format version
pub const ENTRY_VERSION: u16 = 1;

/// Serialized header width in bytes
pub const HEADER_LEN: usize = 60;

// == Format Error ==
#[derive(Error, Debug)]
pub enum EntryFormatError {
    #[error("invalid magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported entry version {0}")]
    UnsupportedVersion(u16),

    #[error("header checksum mismatch")]
    HeaderChecksum,

    #[error("payload checksum mismatch")]
    PayloadChecksum,

    #[error("truncated entry: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("stored key does not match the requested key")]
    KeyMismatch,

    #[error("decoded size {actual} differs from recorded size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("unreadable header: {0}")]
    Header(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

// == Entry Header ==
/// Fixed-width header written at the start of every entry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    magic: u32,
    version: u16,
    mode: u8,
    reserved: u8,
    pub key_len: u32,
    pub raw_size: u64,
    pub stored_size: u64,
    pub sequence: u64,
    pub created_at_ms: u64,
    /// 0 means the entry never expires
    pub expires_at_ms: u64,
    pub payload_crc: u32,
    header_crc: u32,
}

impl EntryHeader {
    // == Constructor ==
    /// Builds a sealed header for `key` and `payload`.
    pub fn seal(
        key: &[u8],
        payload: &[u8],
        mode: Mode,
        raw_size: u64,
        sequence: u64,
        created_at_ms: u64,
        expires_at_ms: Option<u64>,
    ) -> Self {
        let mut header = Self {
            magic: ENTRY_MAGIC,
            version: ENTRY_VERSION,
            mode: mode.as_u8(),
            reserved: 0,
            key_len: key.len() as u32,
            raw_size,
            stored_size: payload.len() as u64,
            sequence,
            created_at_ms,
            expires_at_ms: expires_at_ms.unwrap_or(0),
            payload_crc: crc32c(payload),
            header_crc: 0,
        };
        header.header_crc = header.checksum(key);
        header
    }

    fn checksum(&self, key: &[u8]) -> u32 {
        let mut unsealed = *self;
        unsealed.header_crc = 0;
        // Fixed-width structs always serialize.
        let bytes = bincode::serialize(&unsealed).unwrap_or_default();
        crc32c_append(crc32c(&bytes), key)
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EntryFormatError> {
        bincode::serialize(self).map_err(|e| EntryFormatError::Header(e.to_string()))
    }

    /// Parses and checks the fixed fields; the checksum needs the key and is
    /// verified by [`EntryHeader::verify`].
    pub fn parse(bytes: &[u8]) -> Result<Self, EntryFormatError> {
        if bytes.len() < HEADER_LEN {
            return Err(EntryFormatError::Truncated {
                expected: HEADER_LEN as u64,
                actual: bytes.len() as u64,
            });
        }
        let header: EntryHeader = bincode::deserialize(&bytes[..HEADER_LEN])
            .map_err(|e| EntryFormatError::Header(e.to_string()))?;
        if header.magic != ENTRY_MAGIC {
            return Err(EntryFormatError::BadMagic(header.magic));
        }
        if header.version != ENTRY_VERSION {
            return Err(EntryFormatError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }

    /// Verifies the header checksum against the key stored after it.
    pub fn verify(&self, key: &[u8]) -> Result<(), EntryFormatError> {
        if key.len() != self.key_len as usize || self.checksum(key) != self.header_crc {
            return Err(EntryFormatError::HeaderChecksum);
        }
        Ok(())
    }

    pub fn mode(&self) -> Result<Mode, EntryFormatError> {
        Mode::try_from(self.mode).map_err(|e| EntryFormatError::Header(e.to_string()))
    }

    /// Total file length implied by the header.
    ///
    /// Length fields are untrusted until the checksum is verified, so an
    /// overflowing sum is a malformed header.
    pub fn file_len(&self) -> Result<u64, EntryFormatError> {
        (HEADER_LEN as u64)
            .checked_add(u64::from(self.key_len))
            .and_then(|len| len.checked_add(self.stored_size))
            .ok_or_else(|| {
                EntryFormatError::Header(format!(
                    "key length {} and stored size {} overflow the file length",
                    self.key_len, self.stored_size
                ))
            })
    }

    pub fn expires_at(&self) -> Option<u64> {
        (self.expires_at_ms != 0).then_some(self.expires_at_ms)
    }
}

// == Decoded Entry ==
/// A fully validated entry file borrowed from its bytes.
#[derive(Debug)]
pub struct DecodedEntry<'a> {
    pub header: EntryHeader,
    pub key: &'a [u8],
    pub payload: &'a [u8],
}

/// Validates a complete entry file: header, key checksum, length and payload CRC.
pub fn decode_entry(bytes: &[u8]) -> Result<DecodedEntry<'_>, EntryFormatError> {
    let header = EntryHeader::parse(bytes)?;
    let expected = header.file_len()?;
    if bytes.len() as u64 != expected {
        return Err(EntryFormatError::Truncated {
            expected,
            actual: bytes.len() as u64,
        });
    }
    let key_end = HEADER_LEN + header.key_len as usize;
    let key = &bytes[HEADER_LEN..key_end];
    header.verify(key)?;
    let payload = &bytes[key_end..];
    if crc32c(payload) != header.payload_crc {
        return Err(EntryFormatError::PayloadChecksum);
    }
    Ok(DecodedEntry {
        header,
        key,
        payload,
    })
}

/// Reads and verifies the header and key of an entry without its payload.
///
/// Used when rebuilding a shard index on open.
pub fn read_prefix(
    reader: &mut impl Read,
    file_len: u64,
) -> Result<(EntryHeader, Vec<u8>), EntryFormatError> {
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => EntryFormatError::Truncated {
            expected: HEADER_LEN as u64,
            actual: file_len,
        },
        _ => EntryFormatError::Io(e),
    })?;
    let header = EntryHeader::parse(&head)?;
    let expected = header.file_len()?;
    if file_len != expected {
        return Err(EntryFormatError::Truncated {
            expected,
            actual: file_len,
        });
    }
    // key_len is bounded by the real file length from here on
    let mut key = vec![0u8; header.key_len as usize];
    reader.read_exact(&mut key)?;
    header.verify(&key)?;
    Ok((header, key))
}

// == Entry Meta ==
/// In-memory record of a resident entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Serialized cache key
    pub key: Vec<u8>,
    /// Recency stamp; lower is older
    pub sequence: u64,
    /// Stored (post-codec) payload size counted against the budget
    pub size_bytes: u64,
    /// Value size before encoding
    pub raw_size: u64,
    pub mode: Mode,
    /// Creation timestamp (Unix milliseconds)
    pub created_at_ms: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at_ms: Option<u64>,
}

impl EntryMeta {
    pub fn from_header(header: &EntryHeader, key: Vec<u8>) -> Result<Self, EntryFormatError> {
        Ok(Self {
            key,
            sequence: header.sequence,
            size_bytes: header.stored_size,
            raw_size: header.raw_size,
            mode: header.mode()?,
            created_at_ms: header.created_at_ms,
            expires_at_ms: header.expires_at(),
        })
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiration time.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at_ms {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at_ms
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
