//! # Value Codec
//!
//! Purpose: Define the serialize-to-bytes boundary between typed caller
//! values and the raw bytes stored remotely.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The client is generic over `Codec`, so the byte
//!    format is injectable without dynamic dispatch.
//! 2. **Opaque Bytes**: Callers of the codec never inspect encoded output.
//! 3. **Counter Friendly**: `JsonCodec` writes integers as ASCII digits, which
//!    the store's INCRBY/DECRBY accept directly.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, CacheResult};

/// Encode/decode pair used for every stored value.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a value into bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>>;

    /// Decodes bytes into an owned value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T>;

    /// Returns true when `bytes` is this codec's encoding of an absent value.
    fn is_null(&self, bytes: &[u8]) -> bool {
        let _ = bytes;
        false
    }
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(CacheError::serialization)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        serde_json::from_slice(bytes).map_err(CacheError::serialization)
    }

    fn is_null(&self, bytes: &[u8]) -> bool {
        bytes == b"null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        score: Option<f64>,
    }

    #[test]
    fn structured_values_roundtrip() {
        let profile = Profile {
            name: "ada".to_string(),
            tags: vec!["admin".to_string()],
            score: Some(9.5),
        };
        let bytes = JsonCodec.encode(&profile).unwrap();
        let decoded: Profile = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn integers_encode_as_digits() {
        assert_eq!(JsonCodec.encode(&42u64).unwrap(), b"42");
    }

    #[test]
    fn mismatched_type_is_serialization_error() {
        let bytes = JsonCodec.encode("text").unwrap();
        let err = JsonCodec.decode::<u64>(&bytes).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[test]
    fn none_and_unit_are_null() {
        let none: Option<String> = None;
        assert!(JsonCodec.is_null(&JsonCodec.encode(&none).unwrap()));
        assert!(JsonCodec.is_null(&JsonCodec.encode(&()).unwrap()));
        assert!(!JsonCodec.is_null(&JsonCodec.encode("null").unwrap()));
    }
}
