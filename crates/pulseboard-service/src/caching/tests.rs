use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::future::join_all;

use pulseboard_test::{setup, CountingBuilder, FailingBuilder, FlakyStore};

use pulseboard_service::caching::ReportStore;
use pulseboard_service::config::{CachePolicy, Config};
use pulseboard_service::kvstore::{KeyValueStore, MemoryStore};
use pulseboard_service::service::ReportService;
use pulseboard_service::types::{Classification, Freshness, Report};

/// A policy with sub-second windows so expiry is observable in tests.
fn short_policy() -> CachePolicy {
    CachePolicy {
        fresh_window: Duration::from_millis(50),
        stale_window: Duration::from_millis(50),
        ..CachePolicy::default()
    }
}

fn report_aged(key: &str, age: TimeDelta) -> Report {
    Report {
        key: key.to_owned(),
        generated_at: Some(Utc::now() - age),
        fresh_window_seconds: None,
        freshness: Freshness::Fresh,
        body: serde_json::json!({ "seeded": true }),
    }
}

/// Polls `cond` until it holds, panicking after one second.
async fn wait_until<F, Fut>(what: &str, mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn test_cold_start_serves_placeholder() {
    setup();
    let builder = CountingBuilder::new();
    let service = ReportService::new(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        builder.clone(),
    );

    let (report, classification) = service.get_or_placeholder("aapl").await;
    assert_eq!(classification, Classification::Miss);
    assert_eq!(report.freshness, Freshness::Building);
    assert_eq!(report.key, "AAPL");
    assert_eq!(report.generated_at, None);

    wait_until("first build", || async { builder.builds() == 1 }).await;
    // The placeholder itself must never end up in the store; only the
    // built report may.
    wait_until("built report visible", || async {
        service
            .store()
            .get("aapl")
            .await
            .map(|(report, _)| report.is_some())
            .unwrap_or(false)
    })
    .await;

    let (report, classification) = service.get_or_placeholder("aapl").await;
    assert_eq!(classification, Classification::Fresh);
    assert_eq!(report.freshness, Freshness::Fresh);
    assert!(report.generated_at.is_some());
    assert_eq!(builder.builds(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_triggers_build_once() {
    setup();
    let builder = CountingBuilder::with_delay(Duration::from_millis(150));
    let service = Arc::new(ReportService::new(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        builder.clone(),
    ));

    let triggers = (0..8).map(|_| {
        let service = Arc::clone(&service);
        async move { service.trigger_refresh("hot-key").await }
    });
    let scheduled = join_all(triggers)
        .await
        .into_iter()
        .filter(|&s| s)
        .count();

    assert_eq!(scheduled, 1);
    wait_until("the single build", || async { builder.builds() == 1 }).await;
}

#[tokio::test]
async fn test_stale_report_served_and_refreshed() {
    setup();
    let builder = CountingBuilder::new();
    let config = Config::default();
    let service = ReportService::new(&config, Arc::new(MemoryStore::new()), builder.clone());

    // Aged past the freshness window but well within the stale window.
    let seeded = report_aged("tsla", TimeDelta::seconds(301));
    service.store().set(&seeded).await.unwrap();

    let (report, classification) = service.get_or_placeholder("tsla").await;
    assert_eq!(classification, Classification::Stale);
    assert_eq!(report.freshness, Freshness::Stale);
    assert_eq!(report.body, serde_json::json!({ "seeded": true }));

    wait_until("background rebuild", || async { builder.builds() == 1 }).await;
    wait_until("rebuilt report visible", || async {
        service.get_or_placeholder("tsla").await.1 == Classification::Fresh
    })
    .await;

    // Once fresh again, further reads must not rebuild.
    let (report, classification) = service.get_or_placeholder("tsla").await;
    assert_eq!(classification, Classification::Fresh);
    assert_ne!(report.body, serde_json::json!({ "seeded": true }));
    assert_eq!(builder.builds(), 1);
}

#[tokio::test]
async fn test_failed_build_releases_lock() {
    setup();
    let builder = FailingBuilder::new();
    let store = Arc::new(MemoryStore::new());
    let service = ReportService::new(&Config::default(), store.clone(), builder.clone());

    assert!(service.trigger_refresh("doomed").await);
    wait_until("first failing build", || async { builder.builds() == 1 }).await;
    wait_until("lock release", || async {
        let key = service.store().lock_key("doomed");
        store
            .get(&key)
            .await
            .map(|held| held.is_none())
            .unwrap_or(false)
    })
    .await;

    // Eligible for refresh again well before the lock TTL.
    assert!(service.trigger_refresh("doomed").await);
    wait_until("second failing build", || async { builder.builds() == 2 }).await;

    // Nothing was ever persisted for the key.
    let (report, classification) = service.store().get("doomed").await.unwrap();
    assert!(report.is_none());
    assert_eq!(classification, Classification::Miss);
}

#[tokio::test]
async fn test_refresh_allowed_again_after_completion() {
    setup();
    let builder = CountingBuilder::new();
    let service = ReportService::new(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        builder.clone(),
    );

    assert!(service.trigger_refresh("msft").await);
    wait_until("first build", || async { builder.builds() == 1 }).await;
    wait_until("lock release", || async {
        service.trigger_refresh("msft").await
    })
    .await;
    wait_until("second build", || async { builder.builds() == 2 }).await;
}

#[tokio::test]
async fn test_store_outage_degrades_to_placeholder() {
    setup();
    let builder = CountingBuilder::new();
    let flaky = FlakyStore::wrap(Arc::new(MemoryStore::new()));
    let service = ReportService::new(&Config::default(), flaky.clone(), builder.clone());

    flaky.set_broken(true);
    let (report, classification) = service.get_or_placeholder("nvda").await;
    assert_eq!(classification, Classification::Miss);
    assert_eq!(report.freshness, Freshness::Building);

    // With the store down no lock can be taken, so no build may start.
    assert!(!service.trigger_refresh("nvda").await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(builder.builds(), 0);

    flaky.set_broken(false);
    assert!(service.trigger_refresh("nvda").await);
    wait_until("build after recovery", || async { builder.builds() == 1 }).await;
}

#[tokio::test]
async fn test_undecodable_entry_is_a_miss() {
    setup();
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let store = ReportStore::new(Arc::clone(&kv), CachePolicy::default());

    kv.set(
        &store.cache_key("garbled"),
        b"not json at all".to_vec(),
        Duration::from_secs(60),
    )
    .await
    .unwrap();

    let (report, classification) = store.get("garbled").await.unwrap();
    assert!(report.is_none());
    assert_eq!(classification, Classification::Miss);
}

#[tokio::test]
async fn test_stored_freshness_is_not_trusted() {
    setup();
    let store = ReportStore::new(Arc::new(MemoryStore::new()), CachePolicy::default());

    // A just-generated report that claims to be stale on disk.
    let mut seeded = report_aged("spy", TimeDelta::zero());
    seeded.freshness = Freshness::Stale;
    store.set(&seeded).await.unwrap();

    let (report, classification) = store.get("spy").await.unwrap();
    assert_eq!(classification, Classification::Fresh);
    assert_eq!(report.unwrap().freshness, Freshness::Fresh);
}

#[tokio::test]
async fn test_entry_self_evicts_after_stale_window() {
    setup();
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let store = ReportStore::new(Arc::clone(&kv), short_policy());

    store.set(&report_aged("vix", TimeDelta::zero())).await.unwrap();
    assert!(kv.get(&store.cache_key("vix")).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    // The raw entry is gone from the store, not just classified away.
    assert!(kv.get(&store.cache_key("vix")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_per_report_window_override() {
    setup();
    let store = ReportStore::new(Arc::new(MemoryStore::new()), CachePolicy::default());

    // Aged past the policy window, but the report carries a wider one.
    let mut seeded = report_aged("slow-mover", TimeDelta::seconds(600));
    seeded.fresh_window_seconds = Some(3600);
    store.set(&seeded).await.unwrap();

    let (_, classification) = store.get("slow-mover").await.unwrap();
    assert_eq!(classification, Classification::Fresh);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_key_canonicalization_dedupes_triggers() {
    setup();
    let builder = CountingBuilder::with_delay(Duration::from_millis(150));
    let service = ReportService::new(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        builder.clone(),
    );

    assert!(service.trigger_refresh("aapl").await);
    // Spellings of the same key share one lock.
    assert!(!service.trigger_refresh("  AAPL ").await);
    assert!(!service.trigger_refresh("Aapl").await);

    wait_until("the single build", || async { builder.builds() == 1 }).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_trigger_skips_duplicates() {
    setup();
    let builder = CountingBuilder::with_delay(Duration::from_millis(150));
    let service = ReportService::new(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        builder.clone(),
    );

    let scheduled = service
        .trigger_refresh_many(["btc", "eth", "btc"])
        .await;
    assert_eq!(scheduled, 2);

    wait_until("both builds", || async { builder.builds() == 2 }).await;
}

#[tokio::test]
async fn test_namespace_bump_readdresses_entries() {
    setup();
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let v1 = ReportStore::new(Arc::clone(&kv), CachePolicy::default());
    let v2 = ReportStore::new(
        Arc::clone(&kv),
        CachePolicy {
            namespace_version: "v2".into(),
            ..CachePolicy::default()
        },
    );

    v1.set(&report_aged("gold", TimeDelta::zero())).await.unwrap();

    let (report, _) = v1.get("gold").await.unwrap();
    assert!(report.is_some());
    // Entries written under the old version are invisible, no flush needed.
    let (report, classification) = v2.get("gold").await.unwrap();
    assert!(report.is_none());
    assert_eq!(classification, Classification::Miss);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_pool_bounds_concurrency() {
    setup();
    let builder = CountingBuilder::with_delay(Duration::from_millis(100));
    let config = Config {
        max_refresh_workers: 1,
        ..Config::default()
    };
    let service = ReportService::new(&config, Arc::new(MemoryStore::new()), builder.clone());

    // Distinct keys both win their lock; with one worker the second build
    // queues behind the first instead of running in parallel.
    let scheduled = service.trigger_refresh_many(["one", "two"]).await;
    assert_eq!(scheduled, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(builder.builds(), 1);

    wait_until("queued build", || async { builder.builds() == 2 }).await;
}
