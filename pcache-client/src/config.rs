//! # Client Configuration
//!
//! Connection target, pool limits, and the default expiration, with an
//! environment loader for process bootstrap.

use std::env;
use std::time::Duration;

use crate::pool::PoolConfig;

/// Configuration for the cache client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional password sent with AUTH on every new connection.
    pub password: Option<String>,
    /// Database index selected on every new connection.
    pub database: u32,
    /// Expiration applied to writes that ask for the default.
    pub default_expiration: Duration,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum open connections (idle + lent); zero means unbounded.
    pub max_active: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// How long `acquire` waits for a free connection; `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            database: 0,
            default_expiration: Duration::from_secs(3600),
            max_idle: 50,
            max_active: 500,
            idle_timeout: Some(Duration::from_secs(180)),
            wait_timeout: None,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `PCACHE_ADDR` - store address (default: 127.0.0.1:6379)
    /// - `PCACHE_PASSWORD` - AUTH password (default: none)
    /// - `PCACHE_DB` - database index (default: 0)
    /// - `PCACHE_DEFAULT_TTL_SECS` - default expiration (default: 3600)
    /// - `PCACHE_MAX_IDLE` - idle connection cap (default: 50)
    /// - `PCACHE_MAX_ACTIVE` - open connection cap (default: 500)
    /// - `PCACHE_IDLE_TIMEOUT_SECS` - idle lifetime (default: 180)
    /// - `PCACHE_WAIT_TIMEOUT_MS` - acquire wait bound (default: unbounded)
    pub fn from_env() -> Self {
        let defaults = ClientConfig::default();
        ClientConfig {
            addr: env::var("PCACHE_ADDR").unwrap_or(defaults.addr),
            password: env::var("PCACHE_PASSWORD").ok().filter(|p| !p.is_empty()),
            database: parse_var("PCACHE_DB").unwrap_or(defaults.database),
            default_expiration: parse_var("PCACHE_DEFAULT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_expiration),
            max_idle: parse_var("PCACHE_MAX_IDLE").unwrap_or(defaults.max_idle),
            max_active: parse_var("PCACHE_MAX_ACTIVE").unwrap_or(defaults.max_active),
            idle_timeout: parse_var("PCACHE_IDLE_TIMEOUT_SECS")
                .map(|secs| Some(Duration::from_secs(secs)))
                .unwrap_or(defaults.idle_timeout),
            wait_timeout: parse_var("PCACHE_WAIT_TIMEOUT_MS")
                .map(|ms| Some(Duration::from_millis(ms)))
                .unwrap_or(defaults.wait_timeout),
            ..defaults
        }
    }

    /// Returns a copy targeting another database index.
    pub fn with_database(&self, database: u32) -> Self {
        ClientConfig {
            database,
            ..self.clone()
        }
    }

    pub(crate) fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            addr: self.addr.clone(),
            password: self.password.clone(),
            database: self.database,
            max_idle: self.max_idle,
            max_active: self.max_active,
            idle_timeout: self.idle_timeout,
            wait_timeout: self.wait_timeout,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}
