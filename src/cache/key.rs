//! Cache Key Module
//!
//! Keys identify one computation's result: an operation name followed by its
//! arguments. The serialized form is stable across processes and is what both
//! routing and on-disk lookup hash.

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

use crate::error::Result;

// == Key Part ==
/// A single primitive component of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    UInt(u64),
    /// IEEE-754 bits with `-0.0` folded into `0.0` and a single NaN pattern
    Float(u64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl KeyPart {
    /// Builds a float part with a canonical bit pattern.
    pub fn float(value: f64) -> Self {
        let canonical = if value == 0.0 {
            0.0f64
        } else if value.is_nan() {
            f64::NAN
        } else {
            value
        };
        KeyPart::Float(canonical.to_bits())
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Str(s) => write!(f, "{s:?}"),
            KeyPart::Int(i) => write!(f, "{i}"),
            KeyPart::UInt(u) => write!(f, "{u}"),
            KeyPart::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            KeyPart::Bool(b) => write!(f, "{b}"),
            KeyPart::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        KeyPart::Int(value.into())
    }
}

impl From<u64> for KeyPart {
    fn from(value: u64) -> Self {
        KeyPart::UInt(value)
    }
}

impl From<usize> for KeyPart {
    fn from(value: usize) -> Self {
        KeyPart::UInt(value as u64)
    }
}

impl From<f64> for KeyPart {
    fn from(value: f64) -> Self {
        KeyPart::float(value)
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl From<Vec<u8>> for KeyPart {
    fn from(value: Vec<u8>) -> Self {
        KeyPart::Bytes(value)
    }
}

// == Cache Key ==
/// Immutable, ordered tuple of primitive values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    parts: Vec<KeyPart>,
}

impl CacheKey {
    /// Starts a key with the name of the computation it caches.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            parts: vec![KeyPart::Str(name.into())],
        }
    }

    /// Appends an argument to the key.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.parts.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    // == Encode ==
    /// Serializes the key into its stable byte form and hashes it.
    ///
    /// Changing this encoding or either hash invalidates every stored shard.
    pub fn encode(&self) -> Result<EncodedKey> {
        let bytes = bincode::serialize(self)?;
        Ok(EncodedKey::from_bytes(bytes))
    }

    /// Rebuilds a key from the bytes produced by [`CacheKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.parts.iter();
        if let Some(first) = parts.next() {
            match first {
                KeyPart::Str(name) => write!(f, "{name}(")?,
                other => write!(f, "{other}(")?,
            }
        }
        for (i, part) in parts.enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, ")")
    }
}

// == Encoded Key ==
/// Serialized key bytes together with the hashes derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedKey {
    bytes: Vec<u8>,
    route_hash: u64,
    digest: u128,
}

impl EncodedKey {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        let route_hash = xxh3_64(&bytes);
        let digest = xxh3_128(&bytes);
        Self {
            bytes,
            route_hash,
            digest,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 64-bit hash used to pick a shard.
    pub fn route_hash(&self) -> u64 {
        self.route_hash
    }

    /// 128-bit hash naming the entry file within its shard.
    pub fn digest(&self) -> u128 {
        self.digest
    }
}

/// Entry file stem for a key digest.
pub fn digest_stem(digest: u128) -> String {
    hex::encode(digest.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop_key() -> CacheKey {
        CacheKey::new("getCtRawCandidate")
            .with("1.3.6.1.4.1.14519.5.2.1.6279.6001.100225287222365663678666836860")
            .with(KeyPart::UInt(91))
            .with(KeyPart::UInt(360))
            .with(KeyPart::UInt(341))
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = crop_key().encode().unwrap();
        let b = crop_key().encode().unwrap();
        assert_eq!(a, b);
        assert_eq!(digest_stem(a.digest()).len(), 32);
    }

    #[test]
    fn test_argument_order_matters() {
        let a = CacheKey::new("f").with(1i64).with(2i64).encode().unwrap();
        let b = CacheKey::new("f").with(2i64).with(1i64).encode().unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_part_types_are_distinct() {
        let signed = CacheKey::new("f").with(1i64).encode().unwrap();
        let unsigned = CacheKey::new("f").with(1u64).encode().unwrap();
        let text = CacheKey::new("f").with("1").encode().unwrap();
        assert_ne!(signed.digest(), unsigned.digest());
        assert_ne!(signed.digest(), text.digest());
    }

    #[test]
    fn test_float_canonicalization() {
        assert_eq!(KeyPart::float(0.0), KeyPart::float(-0.0));
        assert_eq!(KeyPart::float(f64::NAN), KeyPart::float(-f64::NAN));
        assert_ne!(KeyPart::float(1.0), KeyPart::float(1.5));
    }

    #[test]
    fn test_decode_restores_key() {
        let key = crop_key().with(true).with(vec![0u8, 255]);
        let encoded = key.encode().unwrap();
        assert_eq!(CacheKey::decode(encoded.bytes()).unwrap(), key);
    }

    #[test]
    fn test_display() {
        let key = CacheKey::new("getCtRawCandidate").with("abc").with(3u64);
        assert_eq!(key.to_string(), "getCtRawCandidate(\"abc\", 3)");
    }
}
