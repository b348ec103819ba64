use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The freshness tag stamped onto a [`Report`] by the report store before it
/// is handed to callers.
///
/// This field is never trusted from storage: whatever a stored blob claims
/// about itself is overwritten at read time based on its actual age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    /// A synthesized placeholder for a report that is still being built.
    Building,
}

/// Read-time classification of a cache lookup.
///
/// Classification is computed from a report's age on every read and is never
/// persisted, so policy changes take effect immediately without any cache
/// invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Young enough to serve as-is.
    Fresh,
    /// Still serveable, but a background refresh should be triggered.
    Stale,
    /// Absent, undecodable, or too old to serve.
    Miss,
}

/// A derived analytics report for a single dashboard key.
///
/// The `body` is opaque to the caching core; its shape is owned entirely by
/// the [`ReportBuilder`] that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Canonical, case-normalized key this report was built for.
    pub key: String,

    /// Wall-clock time the builder finished producing this report.
    ///
    /// `None` only ever appears on synthesized placeholders; a stored report
    /// missing this field is treated as infinitely old.
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,

    /// Optional per-report override for the policy-wide freshness window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fresh_window_seconds: Option<u64>,

    /// See [`Freshness`]. Set on read, not trusted from storage.
    pub freshness: Freshness,

    /// Builder-defined payload.
    #[serde(default)]
    pub body: Value,
}

/// An error produced by a [`ReportBuilder`].
///
/// The caching core treats every variant uniformly: the failure is logged at
/// the orchestrator boundary, nothing is persisted, and the previously cached
/// (possibly stale) report keeps being served.
#[derive(Debug, Error)]
pub enum BuildError {
    /// An upstream data source (price feed, sentiment model, ...) failed.
    #[error("upstream source failed: {0}")]
    Upstream(String),

    /// The builder produced something it considers unusable.
    #[error("malformed report: {0}")]
    Malformed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The expensive recomputation capability the caching core orchestrates.
///
/// Implementations may block for seconds (model inference, multi-source
/// aggregation); builds only ever run on the refresh worker pool and never on
/// a request-handling task. Retry and timeout behavior belong to the builder
/// itself, not to the cache.
#[async_trait]
pub trait ReportBuilder: Send + Sync + 'static {
    /// Produces a report for the given canonical key.
    async fn build(&self, key: &str) -> Result<Report, BuildError>;
}
