//! # Error Taxonomy
//!
//! Purpose: Give every crate in the workspace one error type whose variants
//! keep cache-contract outcomes (miss, not stored) apart from transport,
//! store, and codec failures.
//!
//! ## Design Principles
//! 1. **Stable Kinds**: `ErrorKind` groups variants so cache-aside callers can
//!    branch on "miss" vs "not stored" vs "broken" without matching every case.
//! 2. **No Retries**: Errors are plain values; nothing here retries or wraps.
//! 3. **Source Chains**: IO and codec failures keep their original source.

use std::error::Error as StdError;

use thiserror::Error;

/// Result type shared across the workspace.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache client.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key absent where presence was required.
    #[error("cache miss")]
    CacheMiss,
    /// Conditional write precondition failed.
    #[error("not stored")]
    NotStored,
    /// Network or IO failure while dialing, reading, or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Address could not be resolved into a socket address.
    #[error("invalid address")]
    InvalidAddress,
    /// No connection became available before the acquire deadline.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// The pool was closed while the caller waited or after it was closed.
    #[error("connection pool closed")]
    PoolClosed,
    /// Store returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },
    /// Reply type did not match the command that was sent.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Value could not be encoded or decoded by the codec.
    #[error("serialization error: {0}")]
    Serialization(#[source] Box<dyn StdError + Send + Sync>),
    /// Caller input cannot be expressed as a store command.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Coarse classification of [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Miss,
    NotStored,
    Connection,
    Server,
    Serialization,
    InvalidArgument,
}

impl CacheError {
    /// Builds a `Server` error from a raw RESP error payload.
    pub fn server(message: &[u8]) -> Self {
        CacheError::Server {
            message: String::from_utf8_lossy(message).into_owned(),
        }
    }

    /// Wraps a codec failure.
    pub fn serialization<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CacheError::Serialization(Box::new(err))
    }

    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::CacheMiss => ErrorKind::Miss,
            CacheError::NotStored => ErrorKind::NotStored,
            CacheError::Io(_)
            | CacheError::Protocol
            | CacheError::InvalidAddress
            | CacheError::PoolExhausted
            | CacheError::PoolClosed => ErrorKind::Connection,
            CacheError::Server { .. } | CacheError::UnexpectedResponse => ErrorKind::Server,
            CacheError::Serialization(_) => ErrorKind::Serialization,
            CacheError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::CacheMiss)
    }

    pub fn is_not_stored(&self) -> bool {
        matches!(self, CacheError::NotStored)
    }

    /// True when the connection that produced this error must not be reused.
    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Io(_) | CacheError::Protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_kinds_stay_distinct() {
        assert_eq!(CacheError::CacheMiss.kind(), ErrorKind::Miss);
        assert_eq!(CacheError::NotStored.kind(), ErrorKind::NotStored);
        assert_eq!(CacheError::PoolExhausted.kind(), ErrorKind::Connection);
        assert_ne!(CacheError::CacheMiss.kind(), CacheError::NotStored.kind());
    }

    #[test]
    fn server_error_keeps_message() {
        let err = CacheError::server(b"WRONGTYPE bad");
        assert_eq!(err.to_string(), "server error: WRONGTYPE bad");
        assert_eq!(err.kind(), ErrorKind::Server);
    }

    #[test]
    fn io_errors_are_transport() {
        let err: CacheError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_transport());
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!CacheError::CacheMiss.is_transport());
    }

    #[test]
    fn serialization_keeps_source() {
        let source = serde_json::from_slice::<u32>(b"nope").unwrap_err();
        let err = CacheError::serialization(source);
        assert!(StdError::source(&err).is_some());
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }
}
