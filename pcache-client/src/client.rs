//! # Cache Client API
//!
//! Purpose: Expose cache semantics (conditional writes, misses, bounded
//! counters, typed values) on top of raw store commands.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides pooling, framing, and encoding.
//! 2. **Scoped Acquisition**: Every operation holds one pooled connection for
//!    its round-trips and releases it on drop, including on `?` returns.
//! 3. **Distinct Outcomes**: Misses and failed preconditions are
//!    `CacheMiss`/`NotStored`, never folded into transport errors.
//! 4. **Best-Effort Conditionals**: add/replace/ttl/increment/decrement check
//!    existence with a separate EXISTS round-trip. Concurrent writers to the
//!    same key can slip in between the check and the write.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use pcache_common::{
    CacheError, CacheResult, Codec, Expiration, JsonCodec, Ttl, MAX_EXPIRATION_SECS,
};

use crate::config::ClientConfig;
use crate::getter::{Getter, ItemMapGetter};
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::resp::RespValue;

/// Maximum keys per DEL issued by `delete_matching`.
pub const DELETE_BATCH: usize = 512;

/// Pooled cache client.
///
/// Cloning is cheap: clones share the pool and codec.
pub struct CacheClient<C = JsonCodec> {
    pool: ConnectionPool,
    config: Arc<ClientConfig>,
    codec: Arc<C>,
}

impl<C> Clone for CacheClient<C> {
    fn clone(&self) -> Self {
        CacheClient {
            pool: self.pool.clone(),
            config: Arc::clone(&self.config),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl CacheClient<JsonCodec> {
    /// Creates a JSON client for `addr` with default configuration.
    pub fn connect(addr: impl Into<String>) -> CacheResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a JSON client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> CacheResult<Self> {
        Self::with_codec(config, JsonCodec)
    }
}

impl<C: Codec> CacheClient<C> {
    /// Creates a client with a custom configuration and codec.
    pub fn with_codec(config: ClientConfig, codec: C) -> CacheResult<Self> {
        let pool = ConnectionPool::new(config.pool_config())?;
        Ok(CacheClient {
            pool,
            config: Arc::new(config),
            codec: Arc::new(codec),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns a snapshot of the underlying pool.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Closes the pool; later operations fail with `PoolClosed`.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Checks store liveness over a pooled connection.
    pub fn ping(&self) -> CacheResult<()> {
        self.pool.ping()
    }

    /// Returns a client bound to another database index.
    ///
    /// The new client owns a fresh pool, so no connection scoped to the old
    /// index is ever reused. `self` keeps working until it is dropped.
    pub fn select(&self, database: u32) -> CacheResult<Self> {
        let config = self.config.with_database(database);
        let pool = ConnectionPool::new(config.pool_config())?;
        info!(addr = %config.addr, db = database, "rebinding cache client to database");
        Ok(CacheClient {
            pool,
            config: Arc::new(config),
            codec: Arc::clone(&self.codec),
        })
    }

    /// Stores a value unconditionally.
    pub fn set<T>(&self, key: &str, value: &T, expiration: Expiration) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let bytes = self.codec.encode(value)?;
        let expiry = self.expiry_secs(expiration)?;
        let mut conn = self.pool.acquire()?;
        store(&mut conn, key, &bytes, expiry)
    }

    /// Stores a value only if the key does not exist yet.
    pub fn add<T>(&self, key: &str, value: &T, expiration: Expiration) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let bytes = self.codec.encode(value)?;
        let expiry = self.expiry_secs(expiration)?;
        let mut conn = self.pool.acquire()?;
        if exists_on(&mut conn, key)? {
            debug!(key, "add skipped, key exists");
            return Err(CacheError::NotStored);
        }
        store(&mut conn, key, &bytes, expiry)
    }

    /// Stores a value only if the key already exists.
    ///
    /// A value that encodes to the codec's null is written but reported as
    /// `NotStored`.
    pub fn replace<T>(&self, key: &str, value: &T, expiration: Expiration) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let bytes = self.codec.encode(value)?;
        let expiry = self.expiry_secs(expiration)?;
        let mut conn = self.pool.acquire()?;
        if !exists_on(&mut conn, key)? {
            debug!(key, "replace skipped, key missing");
            return Err(CacheError::NotStored);
        }
        store(&mut conn, key, &bytes, expiry)?;
        if self.codec.is_null(&bytes) {
            return Err(CacheError::NotStored);
        }
        Ok(())
    }

    /// Fetches and decodes a value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let raw = {
            let mut conn = self.pool.acquire()?;
            conn.exec(&[b"GET", key.as_bytes()])?.into_bulk()?
        };
        match raw {
            Some(bytes) => self.codec.decode(&bytes),
            None => Err(CacheError::CacheMiss),
        }
    }

    /// Fetches many keys with one `MGET`.
    ///
    /// Per-key misses surface from `Getter::get` on the result.
    pub fn get_multi<K: AsRef<str>>(&self, keys: &[K]) -> CacheResult<ItemMapGetter<C>> {
        if keys.is_empty() {
            return Err(CacheError::CacheMiss);
        }

        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"MGET");
        args.extend(keys.iter().map(|key| key.as_ref().as_bytes()));

        let reply = {
            let mut conn = self.pool.acquire()?;
            conn.exec(&args)?.into_result()?
        };
        let items = match reply {
            RespValue::Array(items) => items,
            RespValue::Null => return Err(CacheError::CacheMiss),
            _ => return Err(CacheError::UnexpectedResponse),
        };

        let mut slots = items.into_iter();
        let mut map = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = match slots.next() {
                Some(RespValue::Bulk(data)) => data,
                _ => None,
            };
            map.insert(key.as_ref().to_string(), value);
        }
        Ok(ItemMapGetter::new(map, Arc::clone(&self.codec)))
    }

    pub fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.acquire()?;
        exists_on(&mut conn, key)
    }

    /// Deletes a key; `CacheMiss` if nothing was deleted.
    pub fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.pool.acquire()?;
        match conn.exec(&[b"DEL", key.as_bytes()])?.into_integer()? {
            0 => Err(CacheError::CacheMiss),
            _ => Ok(()),
        }
    }

    /// Returns the remaining lifetime of a key; `NotStored` if it is absent.
    pub fn ttl(&self, key: &str) -> CacheResult<Ttl> {
        let mut conn = self.pool.acquire()?;
        if !exists_on(&mut conn, key)? {
            return Err(CacheError::NotStored);
        }
        match conn.exec(&[b"TTL", key.as_bytes()])?.into_integer()? {
            -2 => Err(CacheError::NotStored),
            -1 => Ok(Ttl::NoExpiry),
            secs if secs >= 0 => Ok(Ttl::ExpiresIn(std::time::Duration::from_secs(secs as u64))),
            _ => Err(CacheError::UnexpectedResponse),
        }
    }

    /// Adds `delta` to an existing counter.
    ///
    /// The store would create a missing key; the EXISTS check turns that
    /// into `CacheMiss` instead. The current value is read first, and a
    /// negative or non-integer counter fails with `UnexpectedResponse`
    /// before anything is written.
    pub fn increment(&self, key: &str, delta: u64) -> CacheResult<u64> {
        let delta = i64::try_from(delta).map_err(|_| {
            CacheError::InvalidArgument(format!("increment delta {} exceeds i64::MAX", delta))
        })?;
        let mut conn = self.pool.acquire()?;
        if !exists_on(&mut conn, key)? {
            return Err(CacheError::CacheMiss);
        }
        read_counter(&mut conn, key)?;

        let delta = delta.to_string();
        let value = conn
            .exec(&[b"INCRBY", key.as_bytes(), delta.as_bytes()])?
            .into_integer()?;
        count(value)
    }

    /// Subtracts `delta` from an existing counter, stopping at zero.
    ///
    /// Same read-before-write rule as `increment`.
    pub fn decrement(&self, key: &str, delta: u64) -> CacheResult<u64> {
        let mut conn = self.pool.acquire()?;
        if !exists_on(&mut conn, key)? {
            return Err(CacheError::CacheMiss);
        }
        let current = read_counter(&mut conn, key)?;

        // Clamp so the stored value never goes below zero.
        let amount = delta.min(current).to_string();
        let value = conn
            .exec(&[b"DECRBY", key.as_bytes(), amount.as_bytes()])?
            .into_integer()?;
        count(value)
    }

    /// Adds a floating-point `delta` using the store's native float increment.
    pub fn increment_float(&self, key: &str, delta: f64) -> CacheResult<f64> {
        let mut conn = self.pool.acquire()?;
        if !exists_on(&mut conn, key)? {
            return Err(CacheError::CacheMiss);
        }
        let delta = delta.to_string();
        match conn
            .exec(&[b"INCRBYFLOAT", key.as_bytes(), delta.as_bytes()])?
            .into_bulk()?
        {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|text| text.trim().parse::<f64>().ok())
                .ok_or(CacheError::UnexpectedResponse),
            None => Err(CacheError::UnexpectedResponse),
        }
    }

    /// Adds raw members to a set; returns how many were new.
    pub fn sadd<M: AsRef<[u8]>>(&self, key: &str, members: &[M]) -> CacheResult<u64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(members.len() + 2);
        args.push(b"SADD");
        args.push(key.as_bytes());
        args.extend(members.iter().map(|member| member.as_ref()));
        let mut conn = self.pool.acquire()?;
        count(conn.exec(&args)?.into_integer()?)
    }

    pub fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.pool.acquire()?;
        conn.exec(&[b"SMEMBERS", key.as_bytes()])?.into_strings()
    }

    /// Adds `(score, member)` pairs to a sorted set; returns how many were new.
    pub fn zadd<M: AsRef<[u8]>>(&self, key: &str, entries: &[(f64, M)]) -> CacheResult<u64> {
        let scores: Vec<String> = entries.iter().map(|(score, _)| score.to_string()).collect();
        let mut args: Vec<&[u8]> = Vec::with_capacity(entries.len() * 2 + 2);
        args.push(b"ZADD");
        args.push(key.as_bytes());
        for (score, (_, member)) in scores.iter().zip(entries) {
            args.push(score.as_bytes());
            args.push(member.as_ref());
        }
        let mut conn = self.pool.acquire()?;
        count(conn.exec(&args)?.into_integer()?)
    }

    /// Members ranked `start..=stop`; negative indices count from the end.
    pub fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        let start = start.to_string();
        let stop = stop.to_string();
        let mut conn = self.pool.acquire()?;
        conn.exec(&[b"ZRANGE", key.as_bytes(), start.as_bytes(), stop.as_bytes()])?
            .into_strings()
    }

    /// Runs SORT with raw modifiers such as `ALPHA`, `DESC`, `LIMIT 0 10`.
    pub fn sort(&self, key: &str, modifiers: &[&str]) -> CacheResult<Vec<String>> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(modifiers.len() + 2);
        args.push(b"SORT");
        args.push(key.as_bytes());
        args.extend(modifiers.iter().map(|modifier| modifier.as_bytes()));
        let mut conn = self.pool.acquire()?;
        conn.exec(&args)?.into_strings()
    }

    /// Lists keys matching a glob-style pattern.
    pub fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.pool.acquire()?;
        conn.exec(&[b"KEYS", pattern.as_bytes()])?.into_strings()
    }

    /// Stores an encoded value in a hash field; returns true for a new field.
    pub fn hset<T>(&self, key: &str, field: &str, value: &T) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let bytes = self.codec.encode(value)?;
        let mut conn = self.pool.acquire()?;
        let created = conn
            .exec(&[b"HSET", key.as_bytes(), field.as_bytes(), bytes.as_slice()])?
            .into_integer()?;
        Ok(created > 0)
    }

    pub fn hget<T: DeserializeOwned>(&self, key: &str, field: &str) -> CacheResult<T> {
        let raw = {
            let mut conn = self.pool.acquire()?;
            conn.exec(&[b"HGET", key.as_bytes(), field.as_bytes()])?
                .into_bulk()?
        };
        match raw {
            Some(bytes) => self.codec.decode(&bytes),
            None => Err(CacheError::CacheMiss),
        }
    }

    pub fn hkeys(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.pool.acquire()?;
        conn.exec(&[b"HKEYS", key.as_bytes()])?.into_strings()
    }

    /// Appends an encoded value to a list; returns the new list length.
    pub fn push<T>(&self, key: &str, value: &T) -> CacheResult<u64>
    where
        T: Serialize + ?Sized,
    {
        let bytes = self.codec.encode(value)?;
        let mut conn = self.pool.acquire()?;
        count(
            conn.exec(&[b"RPUSH", key.as_bytes(), bytes.as_slice()])?
                .into_integer()?,
        )
    }

    /// Removes and decodes the head of a list; `CacheMiss` when it is empty.
    pub fn pop<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let raw = {
            let mut conn = self.pool.acquire()?;
            conn.exec(&[b"LPOP", key.as_bytes()])?.into_bulk()?
        };
        match raw {
            Some(bytes) => self.codec.decode(&bytes),
            None => Err(CacheError::CacheMiss),
        }
    }

    /// Removes every key in every database of the store.
    pub fn flush(&self) -> CacheResult<()> {
        info!(addr = %self.config.addr, "flushing all store databases");
        let mut conn = self.pool.acquire()?;
        conn.exec(&[b"FLUSHALL"])?.into_status()
    }

    /// Deletes every key matching a glob-style pattern.
    ///
    /// Lists matches with KEYS, then deletes them in batches of
    /// [`DELETE_BATCH`]. Not atomic: keys created after the listing survive.
    pub fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        let mut conn = self.pool.acquire()?;
        let keys = conn
            .exec(&[b"KEYS", pattern.as_bytes()])?
            .into_bytes_list()?;

        let mut deleted = 0u64;
        for batch in keys.chunks(DELETE_BATCH) {
            let mut args: Vec<&[u8]> = Vec::with_capacity(batch.len() + 1);
            args.push(b"DEL");
            args.extend(batch.iter().map(|key| key.as_slice()));
            deleted += count(conn.exec(&args)?.into_integer()?)?;
        }

        info!(pattern, matched = keys.len(), deleted, "deleted keys by pattern");
        Ok(deleted)
    }

    /// Resolves an expiration to whole seconds, rejecting ones the store
    /// cannot represent.
    fn expiry_secs(&self, expiration: Expiration) -> CacheResult<Option<u64>> {
        match expiration.resolve(self.config.default_expiration) {
            Some(secs) if secs > MAX_EXPIRATION_SECS => Err(CacheError::InvalidArgument(format!(
                "expiration of {} seconds exceeds {}",
                secs, MAX_EXPIRATION_SECS
            ))),
            expiry => Ok(expiry),
        }
    }
}

impl<C: Codec> Getter for CacheClient<C> {
    fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        CacheClient::get(self, key)
    }
}

/// Writes encoded bytes with SET or SETEX depending on the expiry.
fn store(
    conn: &mut PooledConnection,
    key: &str,
    bytes: &[u8],
    expiry: Option<u64>,
) -> CacheResult<()> {
    match expiry {
        Some(secs) => {
            let secs = secs.to_string();
            conn.exec(&[b"SETEX", key.as_bytes(), secs.as_bytes(), bytes])?
                .into_status()
        }
        None => conn.exec(&[b"SET", key.as_bytes(), bytes])?.into_status(),
    }
}

fn exists_on(conn: &mut PooledConnection, key: &str) -> CacheResult<bool> {
    Ok(conn.exec(&[b"EXISTS", key.as_bytes()])?.into_integer()? > 0)
}

/// Reads a counter, which must be a non-negative ASCII integer.
fn read_counter(conn: &mut PooledConnection, key: &str) -> CacheResult<u64> {
    match conn.exec(&[b"GET", key.as_bytes()])?.into_bulk()? {
        Some(raw) => {
            let value = parse_integer(&raw)?;
            debug!(key, value, "counter read");
            count(value)
        }
        None => Err(CacheError::CacheMiss),
    }
}

fn count(value: i64) -> CacheResult<u64> {
    u64::try_from(value).map_err(|_| CacheError::UnexpectedResponse)
}

fn parse_integer(raw: &[u8]) -> CacheResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or(CacheError::UnexpectedResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ascii_counters() {
        assert_eq!(parse_integer(b"42").unwrap(), 42);
        assert_eq!(parse_integer(b"-3").unwrap(), -3);
        assert!(parse_integer(b"\"text\"").is_err());
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert_eq!(count(3).unwrap(), 3);
        assert!(matches!(count(-1), Err(CacheError::UnexpectedResponse)));
    }

    #[test]
    fn empty_address_is_rejected_before_dialing() {
        let result = CacheClient::connect("");
        assert!(matches!(result, Err(CacheError::InvalidAddress)));
    }
}
