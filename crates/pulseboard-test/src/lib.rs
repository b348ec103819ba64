//! Helpers for testing the caching core and the report service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Builds triggered through the orchestrator run on spawned tasks. Tests that assert on
//!    build counts need to give those tasks a chance to finish, either by sleeping past the
//!    builder delay or by polling the store until the refreshed report appears.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use pulseboard_service::kvstore::{KeyValueStore, StoreError, StoreResult};
use pulseboard_service::types::{BuildError, Freshness, Report, ReportBuilder};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `pulseboard_service` crate
///    and mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("pulseboard_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A builder that counts invocations and optionally sleeps to simulate an
/// expensive computation.
///
/// The produced body records the key and the invocation ordinal, so tests can
/// tell rebuilds apart from the originally cached payload.
pub struct CountingBuilder {
    builds: AtomicUsize,
    delay: Duration,
}

impl CountingBuilder {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
            delay,
        })
    }

    /// The number of builds that have *started* so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportBuilder for CountingBuilder {
    async fn build(&self, key: &str) -> Result<Report, BuildError> {
        let ordinal = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Report {
            key: key.to_owned(),
            generated_at: Some(Utc::now()),
            fresh_window_seconds: None,
            freshness: Freshness::Fresh,
            body: serde_json::json!({ "key": key, "build": ordinal }),
        })
    }
}

/// A builder whose every invocation fails with an upstream error.
pub struct FailingBuilder {
    builds: AtomicUsize,
}

impl FailingBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
        })
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportBuilder for FailingBuilder {
    async fn build(&self, _key: &str) -> Result<Report, BuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Err(BuildError::Upstream("sentiment feed timed out".into()))
    }
}

/// A store wrapper that can be switched into a failing state at runtime.
///
/// While broken, every operation returns [`StoreError::Unavailable`]. Used to
/// verify the conservative degradation paths: reads become misses, try-locks
/// are not acquired, and writes are discarded.
pub struct FlakyStore {
    inner: Arc<dyn KeyValueStore>,
    broken: AtomicBool,
}

impl FlakyStore {
    pub fn wrap(inner: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            broken: AtomicBool::new(false),
        })
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }
}
