//! # Getter Capability
//!
//! A uniform "fetch and decode" interface over two read paths: the live
//! client (one key per round-trip) and a map materialized by `get_multi`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use pcache_common::{CacheError, CacheResult, Codec};

/// Decodes the value stored under a key.
pub trait Getter {
    /// Returns the decoded value, or `CacheError::CacheMiss` if it is absent.
    fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T>;
}

/// Result of a batched `MGET`, keyed by the requested key strings.
///
/// Keys the store did not have map to `None`; the miss only surfaces when the
/// caller asks for that key.
#[derive(Debug)]
pub struct ItemMapGetter<C> {
    items: HashMap<String, Option<Vec<u8>>>,
    codec: Arc<C>,
}

impl<C: Codec> ItemMapGetter<C> {
    pub(crate) fn new(items: HashMap<String, Option<Vec<u8>>>, codec: Arc<C>) -> Self {
        ItemMapGetter { items, codec }
    }

    /// Raw encoded bytes for a key, if the store returned any.
    pub fn raw(&self, key: &str) -> Option<&[u8]> {
        self.items.get(key).and_then(|item| item.as_deref())
    }

    /// Number of requested keys (hits and misses).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<C: Codec> Getter for ItemMapGetter<C> {
    fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        match self.raw(key) {
            Some(bytes) => self.codec.decode(bytes),
            None => Err(CacheError::CacheMiss),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcache_common::JsonCodec;

    fn getter() -> ItemMapGetter<JsonCodec> {
        let mut items = HashMap::new();
        items.insert("a".to_string(), Some(b"1".to_vec()));
        items.insert("b".to_string(), None);
        ItemMapGetter::new(items, Arc::new(JsonCodec))
    }

    #[test]
    fn hit_decodes() {
        let value: u32 = getter().get("a").unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn nil_slot_and_unknown_key_miss() {
        let getter = getter();
        assert!(getter.get::<u32>("b").unwrap_err().is_miss());
        assert!(getter.get::<u32>("zzz").unwrap_err().is_miss());
        assert_eq!(getter.len(), 2);
    }

    #[test]
    fn wrong_type_is_serialization_error() {
        let err = getter().get::<Vec<String>>("a").unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
