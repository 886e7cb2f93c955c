//! # Process-Wide Default Client
//!
//! Convenience functions that run against one shared `CacheClient`, built
//! lazily from `ClientConfig::from_env()` on first use.
//!
//! ## Usage Notes
//!
//! - Prefer passing a `CacheClient` explicitly; this module exists for call
//!   sites that cannot thread a handle through.
//! - `install` and `select` swap the shared handle. Operations that already
//!   cloned the previous handle finish against the previous pool, which
//!   closes once its last clone drops. Nothing coordinates the swap with
//!   in-flight work.

use parking_lot::{const_rwlock, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use pcache_common::{CacheResult, Expiration, JsonCodec, Ttl};

use crate::client::CacheClient;
use crate::config::ClientConfig;
use crate::getter::ItemMapGetter;

static DEFAULT: RwLock<Option<CacheClient>> = const_rwlock(None);

/// Returns the shared client, creating it from the environment if needed.
pub fn handle() -> CacheResult<CacheClient> {
    if let Some(client) = DEFAULT.read().as_ref() {
        return Ok(client.clone());
    }

    let mut slot = DEFAULT.write();
    if let Some(client) = slot.as_ref() {
        return Ok(client.clone());
    }
    let config = ClientConfig::from_env();
    info!(addr = %config.addr, db = config.database, "initializing default cache client");
    let client = CacheClient::with_config(config)?;
    *slot = Some(client.clone());
    Ok(client)
}

/// Replaces the shared client, returning the previous one.
pub fn install(client: CacheClient) -> Option<CacheClient> {
    DEFAULT.write().replace(client)
}

/// Rebinds the shared client to another database index.
pub fn select(database: u32) -> CacheResult<()> {
    let next = handle()?.select(database)?;
    install(next);
    Ok(())
}

pub fn ping() -> CacheResult<()> {
    handle()?.ping()
}

pub fn set<T: Serialize + ?Sized>(key: &str, value: &T, expiration: Expiration) -> CacheResult<()> {
    handle()?.set(key, value, expiration)
}

pub fn add<T: Serialize + ?Sized>(key: &str, value: &T, expiration: Expiration) -> CacheResult<()> {
    handle()?.add(key, value, expiration)
}

pub fn replace<T: Serialize + ?Sized>(
    key: &str,
    value: &T,
    expiration: Expiration,
) -> CacheResult<()> {
    handle()?.replace(key, value, expiration)
}

pub fn get<T: DeserializeOwned>(key: &str) -> CacheResult<T> {
    handle()?.get(key)
}

pub fn get_multi<K: AsRef<str>>(keys: &[K]) -> CacheResult<ItemMapGetter<JsonCodec>> {
    handle()?.get_multi(keys)
}

pub fn exists(key: &str) -> CacheResult<bool> {
    handle()?.exists(key)
}

pub fn delete(key: &str) -> CacheResult<()> {
    handle()?.delete(key)
}

pub fn ttl(key: &str) -> CacheResult<Ttl> {
    handle()?.ttl(key)
}

pub fn increment(key: &str, delta: u64) -> CacheResult<u64> {
    handle()?.increment(key, delta)
}

pub fn decrement(key: &str, delta: u64) -> CacheResult<u64> {
    handle()?.decrement(key, delta)
}

pub fn increment_float(key: &str, delta: f64) -> CacheResult<f64> {
    handle()?.increment_float(key, delta)
}

pub fn sadd<M: AsRef<[u8]>>(key: &str, members: &[M]) -> CacheResult<u64> {
    handle()?.sadd(key, members)
}

pub fn smembers(key: &str) -> CacheResult<Vec<String>> {
    handle()?.smembers(key)
}

pub fn zadd<M: AsRef<[u8]>>(key: &str, entries: &[(f64, M)]) -> CacheResult<u64> {
    handle()?.zadd(key, entries)
}

pub fn zrange(key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
    handle()?.zrange(key, start, stop)
}

pub fn sort(key: &str, modifiers: &[&str]) -> CacheResult<Vec<String>> {
    handle()?.sort(key, modifiers)
}

pub fn keys(pattern: &str) -> CacheResult<Vec<String>> {
    handle()?.keys(pattern)
}

pub fn hset<T: Serialize + ?Sized>(key: &str, field: &str, value: &T) -> CacheResult<bool> {
    handle()?.hset(key, field, value)
}

pub fn hget<T: DeserializeOwned>(key: &str, field: &str) -> CacheResult<T> {
    handle()?.hget(key, field)
}

pub fn hkeys(key: &str) -> CacheResult<Vec<String>> {
    handle()?.hkeys(key)
}

pub fn push<T: Serialize + ?Sized>(key: &str, value: &T) -> CacheResult<u64> {
    handle()?.push(key, value)
}

pub fn pop<T: DeserializeOwned>(key: &str) -> CacheResult<T> {
    handle()?.pop(key)
}

pub fn delete_matching(pattern: &str) -> CacheResult<u64> {
    handle()?.delete_matching(pattern)
}

pub fn flush() -> CacheResult<()> {
    handle()?.flush()
}
