//! # Connection Pool
//!
//! Purpose: Lend pre-authenticated, database-scoped TCP connections to many
//! concurrent callers while bounding the number of open sockets.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections
//!    and counters; dialing and socket teardown happen outside it.
//! 3. **Block, Don't Fail**: A saturated pool parks callers on a condvar until
//!    a connection is released or the acquire deadline passes.
//! 4. **RAII Release**: `PooledConnection` returns itself on drop, so every
//!    early return still gives the connection back.
//!
//! ## Structure Overview
//!
//! ```text
//! ConnectionPool (Arc)
//!   └── PoolInner
//!         ├── config: PoolConfig
//!         ├── state: Mutex<PoolState>
//!         │     ├── idle: VecDeque<IdleConnection>   (front = oldest)
//!         │     └── open / active / peak_active / dialed / closed
//!         └── available: Condvar                      (one wake per release)
//! ```

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use pcache_common::{CacheError, CacheResult};

use crate::resp::{encode_command, read_response, RespValue};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Store address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional password sent with AUTH after dialing.
    pub password: Option<String>,
    /// Database index selected after dialing.
    pub database: u32,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum open connections (idle + lent); zero means unbounded.
    pub max_active: usize,
    /// Idle connections older than this are closed on the next acquire.
    pub idle_timeout: Option<Duration>,
    /// Acquire wait bound; `None` blocks until a connection frees up.
    pub wait_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open (idle + lent).
    pub open: usize,
    /// Connections parked in the idle set.
    pub idle: usize,
    /// Connections currently lent to callers.
    pub active: usize,
    /// Highest `active` observed since the pool was created.
    pub peak_active: usize,
    /// Connections successfully dialed since the pool was created.
    pub dialed: u64,
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    open: usize,
    active: usize,
    peak_active: usize,
    dialed: u64,
    closed: bool,
}

impl PoolState {
    fn lend(&mut self) {
        self.active += 1;
        self.peak_active = self.peak_active.max(self.active);
    }

    /// Removes idle connections past `idle_timeout`.
    ///
    /// The oldest connections sit at the front, so the scan stops at the first
    /// fresh one. Returned connections are closed by the caller after unlocking.
    fn prune_idle(&mut self, idle_timeout: Option<Duration>, now: Instant) -> Vec<Connection> {
        let timeout = match idle_timeout {
            Some(timeout) => timeout,
            None => return Vec::new(),
        };

        let mut stale = Vec::new();
        while let Some(front) = self.idle.front() {
            if now.duration_since(front.since) < timeout {
                break;
            }
            if let Some(idle) = self.idle.pop_front() {
                stale.push(idle.conn);
            }
        }
        self.open = self.open.saturating_sub(stale.len());
        if !stale.is_empty() {
            trace!(pruned = stale.len(), "closing stale idle connections");
        }
        stale
    }
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool; no connection is dialed until first use.
    pub fn new(config: PoolConfig) -> CacheResult<Self> {
        if config.addr.trim().is_empty() {
            return Err(CacheError::InvalidAddress);
        }
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle.min(64)),
            open: 0,
            active: 0,
            peak_active: 0,
            dialed: 0,
            closed: false,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquires a connection, waiting up to the configured `wait_timeout`.
    pub fn acquire(&self) -> CacheResult<PooledConnection> {
        let deadline = self
            .inner
            .config
            .wait_timeout
            .map(|timeout| Instant::now() + timeout);
        self.acquire_until(deadline)
    }

    /// Acquires a connection, giving up with `PoolExhausted` at `deadline`.
    ///
    /// **Logic**:
    /// 1. Close idle connections past their lifetime.
    /// 2. Reuse the most recently returned idle connection.
    /// 3. Otherwise reserve a slot and dial if under `max_active`.
    /// 4. Otherwise wait for a release and retry.
    pub fn acquire_until(&self, deadline: Option<Instant>) -> CacheResult<PooledConnection> {
        let mut stale = Vec::new();
        let mut state = self.inner.state.lock();

        loop {
            if state.closed {
                return Err(CacheError::PoolClosed);
            }

            stale.extend(state.prune_idle(self.inner.config.idle_timeout, Instant::now()));

            // LIFO reuse lets rarely used connections age out at the front.
            if let Some(idle) = state.idle.pop_back() {
                state.lend();
                drop(state);
                drop(stale);
                return Ok(PooledConnection::new(self.inner.clone(), idle.conn));
            }

            if self.has_capacity(&state) {
                state.open += 1;
                state.dialed += 1;
                state.lend();
                drop(state);
                drop(stale);
                return match Connection::connect(&self.inner.config) {
                    Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
                    Err(err) => {
                        self.fail_dial();
                        Err(err)
                    }
                };
            }

            match deadline {
                None => {
                    debug!(open = state.open, "pool saturated, waiting for a connection");
                    self.inner.available.wait(&mut state);
                }
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(CacheError::PoolExhausted);
                    }
                    debug!(open = state.open, "pool saturated, waiting for a connection");
                    self.inner.available.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// Borrows a connection and checks it is alive with PING.
    pub fn ping(&self) -> CacheResult<()> {
        let mut conn = self.acquire()?;
        match conn.exec(&[b"PING"])?.into_result()? {
            RespValue::Simple(text) if text == b"PONG" => Ok(()),
            RespValue::Bulk(Some(text)) if text == b"PONG" => Ok(()),
            _ => Err(CacheError::UnexpectedResponse),
        }
    }

    /// Returns a snapshot of pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            active: state.active,
            peak_active: state.peak_active,
            dialed: state.dialed,
        }
    }

    /// Closes idle connections and rejects further acquires.
    ///
    /// Lent connections are closed as they are released; blocked callers wake
    /// up with `PoolClosed`.
    pub fn close(&self) {
        let drained: Vec<IdleConnection> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let drained: Vec<IdleConnection> = state.idle.drain(..).collect();
            state.open = state.open.saturating_sub(drained.len());
            drained
        };
        self.inner.available.notify_all();
        debug!(closed = drained.len(), "connection pool closed");
    }

    fn has_capacity(&self, state: &PoolState) -> bool {
        let max_active = self.inner.config.max_active;
        max_active == 0 || state.open < max_active
    }

    fn fail_dial(&self) {
        {
            let mut state = self.inner.state.lock();
            state.open = state.open.saturating_sub(1);
            state.active = state.active.saturating_sub(1);
            state.dialed = state.dialed.saturating_sub(1);
        }
        self.inner.available.notify_one();
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes a RESP command and returns the parsed reply.
    pub fn exec(&mut self, args: &[&[u8]]) -> CacheResult<RespValue> {
        let conn = self.conn.as_mut().ok_or(CacheError::PoolClosed)?;
        let response = conn.exec(args);
        if let Err(err) = &response {
            if err.is_transport() {
                // If IO/protocol fails, do not return this connection to the pool.
                warn!(error = %err, "discarding connection after transport error");
                self.valid = false;
            }
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let discarded = {
            let mut state = self.pool.state.lock();
            state.active = state.active.saturating_sub(1);
            if self.valid && !state.closed && state.idle.len() < self.pool.config.max_idle {
                state.idle.push_back(IdleConnection {
                    conn,
                    since: Instant::now(),
                });
                None
            } else {
                state.open = state.open.saturating_sub(1);
                Some(conn)
            }
        };
        self.pool.available.notify_one();
        debug!(pooled = discarded.is_none(), "connection released");

        // Socket close happens here, outside the lock; close errors are ignored.
        drop(discarded);
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Dials, authenticates, and selects the configured database.
    fn connect(config: &PoolConfig) -> CacheResult<Self> {
        let stream = connect_stream(config)?;
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        };

        if let Some(password) = &config.password {
            conn.exec(&[b"AUTH", password.as_bytes()])?.into_status()?;
        }
        let db = config.database.to_string();
        conn.exec(&[b"SELECT", db.as_bytes()])?.into_status()?;

        debug!(addr = %config.addr, db = config.database, "dialed store connection");
        Ok(conn)
    }

    fn exec(&mut self, args: &[&[u8]]) -> CacheResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(config: &PoolConfig) -> CacheResult<TcpStream> {
    let addrs = config
        .addr
        .to_socket_addrs()
        .map_err(|_| CacheError::InvalidAddress)?;

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.map(CacheError::Io).unwrap_or(CacheError::InvalidAddress))
}
