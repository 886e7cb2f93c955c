// pcache-common - Shared types for the PoolCache client
//
// This crate defines the error taxonomy, expiration sentinels, and the value
// codec boundary used by the client and its tooling.

pub mod codec;
pub mod error;
pub mod expiration;

// Re-export for convenience
pub use codec::*;
pub use error::*;
pub use expiration::*;
