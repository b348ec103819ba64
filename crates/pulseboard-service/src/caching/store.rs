use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::config::CachePolicy;
use crate::kvstore::{KeyValueStore, StoreError, StoreResult};
use crate::types::{Classification, Freshness, Report};

use super::freshness;

/// The payload written under a lock key carries no meaning beyond existence.
const LOCK_SENTINEL: &[u8] = b"1";

/// Wraps the key-value store with serialization, key construction, and
/// freshness classification.
///
/// Report entries and lock entries live under distinct prefixes of the same
/// namespace-versioned key scheme, so they can never collide and bumping
/// [`CachePolicy::namespace_version`] re-addresses both at once.
pub struct ReportStore {
    store: Arc<dyn KeyValueStore>,
    policy: CachePolicy,
}

impl ReportStore {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: CachePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// The canonical form of a report key: trimmed and case-normalized.
    pub fn canonical_key(key: &str) -> String {
        key.trim().to_uppercase()
    }

    /// The storage key for a report.
    pub fn cache_key(&self, key: &str) -> String {
        format!(
            "report:{}:{}",
            self.policy.namespace_version,
            Self::canonical_key(key)
        )
    }

    /// The storage key for a report's refresh lock.
    pub fn lock_key(&self, key: &str) -> String {
        format!(
            "lock:{}:{}",
            self.policy.namespace_version,
            Self::canonical_key(key)
        )
    }

    /// Reads and classifies the report stored for `key`.
    ///
    /// Absent, undecodable, or too-old entries all uniformly come back as
    /// `(None, Miss)`; a corrupt payload is logged but never surfaced as an
    /// error. The returned report's `freshness` field is stamped from the
    /// computed classification, never trusted from storage.
    pub async fn get(&self, key: &str) -> StoreResult<(Option<Report>, Classification)> {
        let Some(bytes) = self.store.get(&self.cache_key(key)).await? else {
            return Ok((None, Classification::Miss));
        };

        let mut report: Report = match serde_json::from_slice(&bytes) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(
                    key,
                    error = &err as &dyn std::error::Error,
                    "discarding undecodable report cache entry",
                );
                return Ok((None, Classification::Miss));
            }
        };

        match freshness::classify(&report, &self.policy, Utc::now()) {
            Classification::Fresh => {
                report.freshness = Freshness::Fresh;
                Ok((Some(report), Classification::Fresh))
            }
            Classification::Stale => {
                report.freshness = Freshness::Stale;
                Ok((Some(report), Classification::Stale))
            }
            // Outlived even the stale window; the caller has to rebuild.
            Classification::Miss => Ok((None, Classification::Miss)),
        }
    }

    /// Persists a report with a storage TTL of freshness window plus stale
    /// window, so the store self-evicts the entry exactly when [`Self::get`]
    /// would classify it as a miss anyway.
    pub async fn set(&self, report: &Report) -> StoreResult<()> {
        let bytes = serde_json::to_vec(report)
            .map_err(|err| StoreError::Operation(format!("failed to encode report: {err}")))?;
        let ttl = freshness::effective_fresh_window(report, &self.policy) + self.policy.stale_window;
        self.store.set(&self.cache_key(&report.key), bytes, ttl).await
    }

    /// Attempts to claim the refresh slot for `key`.
    ///
    /// Returns `true` when the caller now owns the slot. The lock expires on
    /// its own after [`CachePolicy::lock_duration`].
    pub async fn try_lock(&self, key: &str) -> StoreResult<bool> {
        self.store
            .set_if_absent(
                &self.lock_key(key),
                LOCK_SENTINEL.to_vec(),
                self.policy.lock_duration,
            )
            .await
    }

    /// Releases the refresh slot for `key`.
    ///
    /// Best-effort: a failed delete merely delays the next refresh until the
    /// lock's TTL runs out, so the failure is logged and swallowed.
    pub async fn release_lock(&self, key: &str) {
        if let Err(err) = self.store.delete(&self.lock_key(key)).await {
            tracing::warn!(
                key,
                error = &err as &dyn std::error::Error,
                "failed to release refresh lock, it will expire on its own",
            );
        }
    }

    /// A transient report-shaped value for keys that have nothing serveable
    /// yet. Never persisted.
    pub fn building_placeholder(&self, key: &str) -> Report {
        Report {
            key: Self::canonical_key(key),
            generated_at: None,
            fresh_window_seconds: None,
            freshness: Freshness::Building,
            body: Value::Null,
        }
    }
}
