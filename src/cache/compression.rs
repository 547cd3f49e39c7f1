//! Gzip payload compression

use crate::errors::{CoreError, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Compress `data` with gzip at the default level
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CoreError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CoreError::Compression(e.to_string()))
}

/// Inverse of [`compress`]
pub fn decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(size_hint);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::Compression(e.to_string()))?;
    Ok(out)
}

/// Compress when it pays off
///
/// Returns the bytes to store and whether they are compressed. Payloads under
/// `threshold` bytes, or that do not shrink, are kept as they are.
pub fn maybe_compress(data: Vec<u8>, threshold: usize) -> Result<(Vec<u8>, bool)> {
    if data.len() < threshold {
        return Ok((data, false));
    }
    let compressed = compress(&data)?;
    if compressed.len() < data.len() {
        Ok((compressed, true))
    } else {
        Ok((data, false))
    }
}
