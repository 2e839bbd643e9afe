//! # Chunked Byte Properties
//!
//! Property bags only carry strings of bounded size, so byte-valued
//! properties (certificates, thumbprints) travel as a map of decimal chunk
//! index to a slice of the base64 encoding:
//!
//! ```json
//! { "0": "MIIDdzCCAl+gAwIBAgIQ...", "1": "...", "2": "...AB" }
//! ```
//!
//! Chunks are reassembled in index order before decoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64;
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum length of one encoded chunk.
pub const MAX_CHUNK_LEN: usize = 512;

/// Errors while reassembling chunked bytes.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("chunk key {0:?} is not a decimal index")]
    InvalidIndex(String),

    #[error("chunk {0} is not a string")]
    NotAString(usize),

    #[error("chunk {0} is missing")]
    Missing(usize),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encodes `bytes` into an index → chunk map.
pub fn encode(bytes: &[u8]) -> Map<String, Value> {
    let encoded = Base64.encode(bytes);
    encoded
        .as_bytes()
        .chunks(MAX_CHUNK_LEN)
        .enumerate()
        .map(|(index, chunk)| {
            // base64 output is ASCII, so every chunk boundary is a char boundary
            let chunk = String::from_utf8_lossy(chunk).into_owned();
            (index.to_string(), Value::String(chunk))
        })
        .collect()
}

/// Reassembles and decodes an index → chunk map.
///
/// Indices must be contiguous starting at zero. An empty map decodes to an
/// empty byte vector.
pub fn decode(chunks: &Map<String, Value>) -> Result<Vec<u8>, ChunkError> {
    let mut ordered: Vec<(usize, &str)> = Vec::with_capacity(chunks.len());
    for (key, value) in chunks {
        let index: usize = key
            .trim()
            .parse()
            .map_err(|_| ChunkError::InvalidIndex(key.clone()))?;
        let chunk = value.as_str().ok_or(ChunkError::NotAString(index))?;
        ordered.push((index, chunk));
    }
    ordered.sort_unstable_by_key(|(index, _)| *index);

    let mut encoded = String::new();
    for (expected, (index, chunk)) in ordered.into_iter().enumerate() {
        if index != expected {
            return Err(ChunkError::Missing(expected));
        }
        encoded.push_str(chunk);
    }
    Ok(Base64.decode(encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_large_payload_splits_into_ordered_chunks() {
        let bytes: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let chunks = encode(&bytes);
        assert!(chunks.len() > 1);
        assert!(
            chunks
                .values()
                .all(|c| c.as_str().is_some_and(|s| s.len() <= MAX_CHUNK_LEN))
        );
        assert_eq!(decode(&chunks).unwrap(), bytes);
    }

    #[test]
    fn test_decode_orders_numerically() {
        // "10" sorts before "2" lexically; the index is numeric.
        let full = Base64.encode(b"ordering matters for reassembly!");
        let pieces: Vec<String> = full
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        assert!(pieces.len() > 10);
        let chunks: Map<String, Value> = pieces
            .iter()
            .enumerate()
            .rev()
            .map(|(i, p)| (i.to_string(), json!(p)))
            .collect();
        assert_eq!(decode(&chunks).unwrap(), b"ordering matters for reassembly!");
    }

    #[test]
    fn test_decode_rejects_gaps_and_garbage() {
        let gap = json!({ "0": "AQ==", "2": "Ag==" });
        assert!(matches!(
            decode(gap.as_object().unwrap()),
            Err(ChunkError::Missing(1))
        ));

        let bad_key = json!({ "first": "AQ==" });
        assert!(matches!(
            decode(bad_key.as_object().unwrap()),
            Err(ChunkError::InvalidIndex(_))
        ));

        let not_string = json!({ "0": 5 });
        assert!(matches!(
            decode(not_string.as_object().unwrap()),
            Err(ChunkError::NotAString(0))
        ));

        let bad_payload = json!({ "0": "!!!" });
        assert!(matches!(
            decode(bad_payload.as_object().unwrap()),
            Err(ChunkError::Base64(_))
        ));
    }

    #[test]
    fn test_empty_map_is_empty_bytes() {
        assert!(decode(&Map::new()).unwrap().is_empty());
        assert!(encode(&[]).is_empty());
    }
}
