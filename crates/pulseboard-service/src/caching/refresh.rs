use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::types::{Freshness, ReportBuilder};

use super::store::ReportStore;

/// Schedules background report builds, at most one in flight per key.
///
/// Exclusivity comes from the store's atomic try-lock, so it holds across
/// every process sharing the backing store. The worker pool only bounds how
/// many builds execute concurrently: a trigger that wins the lock while all
/// workers are busy still counts as "this key is being refreshed" and its
/// task queues, trading staleness for never doing duplicate work.
pub struct RefreshOrchestrator {
    store: Arc<ReportStore>,
    builder: Arc<dyn ReportBuilder>,
    workers: Arc<Semaphore>,
}

impl Clone for RefreshOrchestrator {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            builder: Arc::clone(&self.builder),
            workers: Arc::clone(&self.workers),
        }
    }
}

impl RefreshOrchestrator {
    pub fn new(store: Arc<ReportStore>, builder: Arc<dyn ReportBuilder>, max_workers: usize) -> Self {
        // A pool of zero workers would silently never build anything.
        let workers = Arc::new(Semaphore::new(max_workers.max(1)));
        Self {
            store,
            builder,
            workers,
        }
    }

    /// Schedules a background rebuild of `key` unless one is already in
    /// flight.
    ///
    /// Returns whether a build was actually scheduled. `false` is the
    /// expected common case under concurrent readers of a hot key: someone
    /// else holds the refresh lock. A store failure also yields `false`,
    /// refusing to schedule rather than risking uncoordinated duplicate
    /// builds.
    ///
    /// This never waits on the build itself; the caller has already been
    /// answered from cache (or with a placeholder) by the time this runs.
    pub async fn trigger_refresh(&self, key: &str) -> bool {
        let key = ReportStore::canonical_key(key);

        match self.store.try_lock(&key).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!(key, "refresh already in flight, not scheduling");
                return false;
            }
            Err(err) => {
                tracing::warn!(
                    key,
                    error = &err as &dyn std::error::Error,
                    "store unreachable while acquiring refresh lock, not scheduling",
                );
                return false;
            }
        }

        tracing::debug!(key, "scheduling background report build");
        let this = self.clone();
        tokio::spawn(async move {
            this.run_build(&key).await;
        });
        true
    }

    /// Triggers a refresh for every key, returning how many builds were
    /// actually scheduled.
    ///
    /// Each key's trigger is independent; duplicates within the batch are
    /// absorbed by the per-key lock like any other concurrent trigger.
    pub async fn trigger_refresh_many<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut scheduled = 0;
        for key in keys {
            if self.trigger_refresh(key.as_ref()).await {
                scheduled += 1;
            }
        }
        scheduled
    }

    /// The build task body. `key` is canonical and the lock for it is held.
    ///
    /// The lock is released after the persist attempt no matter how the
    /// build went; a failed build must not leave the key locked out of
    /// future refreshes beyond the TTL bound. Errors stop here: the readers
    /// that triggered this were answered long ago.
    async fn run_build(&self, key: &str) {
        // Queue for a worker slot. The semaphore is never closed, so this
        // only fails during runtime shutdown, at which point the lock TTL
        // takes over.
        let _permit = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        match self.builder.build(key).await {
            Ok(mut report) => {
                report.key = key.to_owned();
                report.generated_at = Some(Utc::now());
                report.freshness = Freshness::Fresh;

                if let Err(err) = self.store.set(&report).await {
                    tracing::error!(
                        key,
                        error = &err as &dyn std::error::Error,
                        "failed to persist rebuilt report, discarding the result",
                    );
                } else {
                    tracing::debug!(key, "report rebuilt");
                }
            }
            Err(err) => {
                tracing::error!(
                    key,
                    error = &err as &dyn std::error::Error,
                    "report build failed, keeping the previous entry",
                );
            }
        }

        self.store.release_lock(key).await;
    }
}
