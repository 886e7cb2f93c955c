//! # PoolCache Client
//!
//! Purpose: Provide cache semantics (set/add/replace/get, counters, TTL,
//! collections) over a Redis-compatible store through a blocking,
//! connection-pooled client.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Explicit Handles**: `CacheClient` is passed to callers; `global` is an
//!    opt-in shortcut over one shared handle.
//! 3. **Typed Values**: Values cross the wire through a pluggable `Codec`.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod config;
mod getter;
mod pool;
mod resp;

pub mod global;

pub use client::{CacheClient, DELETE_BATCH};
pub use config::ClientConfig;
pub use getter::{Getter, ItemMapGetter};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use resp::RespValue;

pub use pcache_common::{
    CacheError, CacheResult, Codec, ErrorKind, Expiration, JsonCodec, Ttl, DEFAULT, FOREVER,
};
