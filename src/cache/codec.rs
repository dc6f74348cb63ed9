//! Codec Module
//!
//! Reversible transform applied to value bytes on their way to and from disk.
//! Values below the compression threshold are stored raw and never touch a
//! compressor.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

// == Mode ==
/// How a stored blob was produced, recorded in each entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    Raw = 0,
    Gzip = 1,
    Zstd = 2,
}

impl Mode {
    pub fn is_compressed(self) -> bool {
        self != Mode::Raw
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Mode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Raw),
            1 => Ok(Mode::Gzip),
            2 => Ok(Mode::Zstd),
            other => Err(CodecError::UnknownMode(other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Raw => "raw",
            Mode::Gzip => "gzip",
            Mode::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

// == Codec Error ==
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown storage mode {0}")]
    UnknownMode(u8),

    #[error("{mode} payload could not be decoded: {source}")]
    Decode {
        mode: Mode,
        #[source]
        source: std::io::Error,
    },
}

// == Codec Trait ==
/// Bijection between raw value bytes and stored bytes.
///
/// `decode(encode(x)) == x` for every input. `encode` never fails; `decode`
/// fails only on bytes that were not produced by a matching `encode`.
pub trait Codec: Send + Sync + fmt::Debug {
    fn encode(&self, raw: &[u8]) -> (Vec<u8>, Mode);

    fn decode(&self, stored: &[u8], mode: Mode) -> Result<Vec<u8>, CodecError>;
}

// == Compression ==
/// Compressor selection with its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Gzip { level: u32 },
    Zstd { level: i32 },
}

impl FromStr for Compression {
    type Err = String;

    /// Parses `gzip`, `zstd`, `none`, optionally suffixed with `:<level>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, level) = match s.split_once(':') {
            Some((name, level)) => (name, Some(level)),
            None => (s, None),
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "raw" => Ok(Compression::None),
            "gzip" | "gz" => {
                let level = match level {
                    Some(l) => l.trim().parse().map_err(|_| format!("bad gzip level: {l}"))?,
                    None => 1,
                };
                if level > 9 {
                    return Err(format!("gzip level must be 0-9, got {level}"));
                }
                Ok(Compression::Gzip { level })
            }
            "zstd" => {
                let level = match level {
                    Some(l) => l.trim().parse().map_err(|_| format!("bad zstd level: {l}"))?,
                    None => 1,
                };
                Ok(Compression::Zstd { level })
            }
            other => Err(format!("unknown compression: {other}")),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            Compression::Gzip { level } => write!(f, "gzip:{level}"),
            Compression::Zstd { level } => write!(f, "zstd:{level}"),
        }
    }
}

// == Threshold Codec ==
/// Compresses values whose raw size reaches `threshold`; stores the rest raw.
///
/// Decoding dispatches on the recorded mode rather than the current
/// configuration, so entries written under another compressor stay readable.
#[derive(Debug, Clone)]
pub struct ThresholdCodec {
    compression: Compression,
    threshold: usize,
}

impl ThresholdCodec {
    pub fn new(compression: Compression, threshold: usize) -> Self {
        Self {
            compression,
            threshold,
        }
    }

    fn compress(&self, raw: &[u8]) -> std::io::Result<(Vec<u8>, Mode)> {
        match self.compression {
            Compression::None => Ok((raw.to_vec(), Mode::Raw)),
            Compression::Gzip { level } => {
                let mut encoder = GzEncoder::new(
                    Vec::with_capacity(raw.len() / 2),
                    flate2::Compression::new(level),
                );
                encoder.write_all(raw)?;
                Ok((encoder.finish()?, Mode::Gzip))
            }
            Compression::Zstd { level } => Ok((zstd::stream::encode_all(raw, level)?, Mode::Zstd)),
        }
    }
}

impl Codec for ThresholdCodec {
    fn encode(&self, raw: &[u8]) -> (Vec<u8>, Mode) {
        if raw.len() < self.threshold {
            return (raw.to_vec(), Mode::Raw);
        }
        match self.compress(raw) {
            Ok(encoded) => encoded,
            Err(e) => {
                // raw is always a valid encoding
                warn!(error = %e, "compression failed, storing value raw");
                (raw.to_vec(), Mode::Raw)
            }
        }
    }

    fn decode(&self, stored: &[u8], mode: Mode) -> Result<Vec<u8>, CodecError> {
        match mode {
            Mode::Raw => Ok(stored.to_vec()),
            Mode::Gzip => {
                let mut out = Vec::new();
                GzDecoder::new(stored)
                    .read_to_end(&mut out)
                    .map_err(|source| CodecError::Decode { mode, source })?;
                Ok(out)
            }
            Mode::Zstd => zstd::stream::decode_all(stored)
                .map_err(|source| CodecError::Decode { mode, source }),
        }
    }
}
