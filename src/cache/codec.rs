//! Payload encoding for durable entries.
//!
//! Values are serialized to JSON and gzip-compressed. Gzip frames start with
//! a fixed two-byte magic and a ten-byte header, which gives the reader a
//! cheap corruption check before attempting to inflate anything.

use crate::errors::{CacheError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Leading bytes of every gzip stream
pub const COMPRESSED_MARKER: [u8; 2] = [0x1f, 0x8b];

/// Size of the fixed gzip header; anything shorter is truncated
pub const MIN_COMPRESSED_LEN: usize = 10;

/// Encoded payload with both sizes recorded for the metadata index
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub uncompressed_len: u64,
}

impl EncodedPayload {
    pub fn compressed_len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Serialize and compress a value
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<EncodedPayload> {
    let json = serde_json::to_vec(value)?;
    let bytes = compress(&json)?;
    Ok(EncodedPayload {
        uncompressed_len: json.len() as u64,
        bytes,
    })
}

/// Decompress and deserialize a value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let json = decompress(bytes)?;
    Ok(serde_json::from_slice(&json)?)
}

pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::fast());
    encoder
        .write_all(raw)
        .and_then(|_| encoder.finish())
        .map_err(|e| CacheError::serialization(format!("compression failed: {}", e)))
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 3);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::serialization(format!("decompression failed: {}", e)))?;
    Ok(out)
}

/// Whether the buffer is long enough and starts with the gzip magic
pub fn has_compressed_marker(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_COMPRESSED_LEN && bytes.starts_with(&COMPRESSED_MARKER)
}
