//! The key-value store capability the caching core is built on.
//!
//! The backing store is the single source of truth shared by all process
//! instances: both report payloads and refresh locks live there, which is
//! what makes the single-flight guarantee hold across multiple servers and
//! not just across threads of one process.
//!
//! Two adapters are provided: [`RedisStore`] for production deployments, and
//! [`MemoryStore`], an in-process stand-in with real TTL semantics that is
//! used by the test suite and for local development without a Redis.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// An error talking to the backing store.
///
/// The caching core treats these conservatively: a failed read behaves like a
/// miss, a failed try-lock behaves like "not acquired", and a failed write
/// discards the build result rather than claiming success.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reachable but the operation failed or the payload could
    /// not be encoded.
    #[error("store operation failed: {0}")]
    Operation(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A remote store supporting per-key expiry and an atomic conditional set.
///
/// `set_if_absent` is the try-lock primitive: it must be atomic with respect
/// to concurrent callers across all processes sharing the store.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Reads the raw bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()>;

    /// Writes `value` under `key` only if the key does not already exist.
    ///
    /// Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool>;

    /// Removes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}
