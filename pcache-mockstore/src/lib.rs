//! In-process RESP2 store used to exercise the cache client.
//!
//! Implements the subset of commands the client issues, with per-database
//! keyspaces, lazy expiry and optional AUTH.

pub mod commands;
pub mod protocol;
pub mod server;
pub mod store;

pub use server::{serve, MockStore, MockStoreConfig, Shared};
pub use store::{Store, DB_COUNT};
