use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Value};

use super::{KeyValueStore, StoreError, StoreResult};

/// A [`KeyValueStore`] backed by Redis.
///
/// Report payloads are written with `SET .. EX`, and the refresh lock uses
/// `SET .. NX EX`, which is atomic on the server and therefore correct across
/// multiple dashboard processes sharing one Redis.
///
/// The [`ConnectionManager`] reconnects on its own; individual commands still
/// fail while the connection is down, and those failures surface as
/// [`StoreError`] for the caching core to degrade on.
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connects to the Redis at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager })
    }
}

/// Rounds a TTL up to whole seconds, which is the granularity of `EX`.
///
/// Sub-second TTLs are clamped up to one second rather than down to zero,
/// since `SET .. EX 0` is a Redis error.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn map_err(err: RedisError) -> StoreError {
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Operation(err.to_string())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        // `SET NX` replies with OK when the key was written and nil when it
        // already existed.
        let reply: Value = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}
