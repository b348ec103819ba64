use std::future::Future;
use std::time::Duration;

use moka::future::Cache;

/// An in-process memoizer with single-flight semantics.
///
/// Concurrent callers for the same key share one execution of the supplied
/// computation instead of racing: the first caller's future runs, everyone
/// else awaits its result. Results stay memoized for the configured TTL.
///
/// This is independent of the store-backed report cache; it is the right
/// tool for short-lived, purely in-process values (resolved symbol metadata,
/// session lookups) where a remote round-trip per caller would be wasteful.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    cache: Cache<String, T>,
}

impl<T: Clone + Send + Sync + 'static> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Returns the memoized value for `key`, computing it if necessary.
    ///
    /// The computation is deduplicated between concurrent callers: `init` is
    /// only polled by the one caller that gets to populate the entry.
    pub async fn get_or_compute(&self, key: &str, init: impl Future<Output = T>) -> T {
        self.cache
            .entry_by_ref(key)
            .or_insert_with(init)
            .await
            .into_value()
    }

    /// Drops the memoized value for `key`, forcing the next caller to
    /// recompute.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }
}
