//! The top-level service facade tying the report store and the refresh
//! orchestrator together.
//!
//! Dashboard handlers call [`ReportService::get_or_placeholder`] and always
//! get *something* renderable back immediately. A fresh report is returned
//! as-is, a stale one is returned while a background rebuild is kicked off,
//! and a miss yields a `building` placeholder while the first build runs.

use std::sync::Arc;

use crate::caching::{RefreshOrchestrator, ReportStore};
use crate::config::Config;
use crate::kvstore::KeyValueStore;
use crate::types::{Classification, Report, ReportBuilder};

pub struct ReportService {
    store: Arc<ReportStore>,
    refresher: RefreshOrchestrator,
}

impl ReportService {
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        builder: Arc<dyn ReportBuilder>,
    ) -> Self {
        let store = Arc::new(ReportStore::new(store, config.cache.clone()));
        let refresher =
            RefreshOrchestrator::new(Arc::clone(&store), builder, config.max_refresh_workers);
        Self { store, refresher }
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    pub fn refresher(&self) -> &RefreshOrchestrator {
        &self.refresher
    }

    /// Serves the report for `key` without ever blocking on a build.
    ///
    /// A stale or missing entry triggers a background refresh, but the call
    /// itself returns immediately with whatever is servable right now. A
    /// store outage degrades to a placeholder response rather than an error:
    /// the dashboard keeps rendering and the next poll retries naturally.
    pub async fn get_or_placeholder(&self, key: &str) -> (Report, Classification) {
        let (report, classification) = match self.store.get(key).await {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(key, %error, "report lookup failed, serving placeholder");
                (None, Classification::Miss)
            }
        };

        match (report, classification) {
            (Some(report), Classification::Fresh) => (report, Classification::Fresh),
            (Some(report), _) => {
                self.refresher.trigger_refresh(key).await;
                (report, Classification::Stale)
            }
            (None, _) => {
                self.refresher.trigger_refresh(key).await;
                (self.store.building_placeholder(key), Classification::Miss)
            }
        }
    }

    /// Proactively schedules a refresh for `key`, for example from a
    /// dashboard's "refresh now" control. Returns whether a build was
    /// actually started.
    pub async fn trigger_refresh(&self, key: &str) -> bool {
        self.refresher.trigger_refresh(key).await
    }

    /// Schedules refreshes for a batch of keys and returns how many builds
    /// were started. Duplicates and keys already being built are skipped.
    pub async fn trigger_refresh_many<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.refresher.trigger_refresh_many(keys).await
    }
}
