use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use chrono::Utc;
use tokio::task::JoinSet;
use venue_cache::prelude::*;
use venue_cache::test::FakeMetricsApi;
use venue_cache::test::RecordingObserver;

const TTL: Duration = Duration::from_secs(300);

fn metrics_cache(api: &Arc<FakeMetricsApi>, backend: &Arc<MemoryStore>) -> Arc<MetricsCache<FakeMetricsApi>> {
    MetricsCache::builder()
        .source(Arc::clone(api))
        .store(PersistentStore::new(Arc::clone(backend) as Arc<dyn EntryStore>, "metrics"))
        .ttl(TTL)
        .capacity(100)
        .build()
        .expect("cache builds")
}

fn snapshot(total_bookings: u64) -> MetricsSnapshot {
    MetricsSnapshot {
        metrics:             DashboardMetrics {
            total_bookings,
            ..Default::default()
        },
        recent_transactions: vec![],
    }
}

async fn put_aged(cache: &Arc<MetricsCache<FakeMetricsApi>>, scope: ScopeKey, value: MetricsSnapshot, age: TimeDelta) {
    let entry = Entry::with_stored_at(scope.to_string(), value, Utc::now() - age);
    cache.scoped().put_entry(scope, entry).await;
}

// Background refreshes are detached; give them a moment to land.
async fn settle<F, Fut>(mut done: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if done().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("background work did not settle in time");
}

#[tokio::test]
async fn load_fetches_once_then_serves_cached() {
    let api = Arc::new(FakeMetricsApi::new());
    let cache = metrics_cache(&api, &Arc::new(MemoryStore::new()));
    let scope = ScopeKey::location(DashboardKind::Manager, 17);

    assert!(!cache.has(&scope).await);
    assert_eq!(cache.load(scope).await.expect("loaded").metrics.total_bookings, 1);
    assert_eq!(cache.load(scope).await.expect("cached").metrics.total_bookings, 1);

    assert_eq!(api.calls(&scope), 1);
    assert!(cache.has(&scope).await);
}

#[tokio::test]
async fn concurrent_loads_share_a_fetch_per_scope() {
    let api = Arc::new(FakeMetricsApi::new().with_delay(Duration::from_millis(40)));
    let cache = metrics_cache(&api, &Arc::new(MemoryStore::new()));
    let owner = ScopeKey::all(DashboardKind::Owner);
    let staff = ScopeKey::location(DashboardKind::Staff, 3);

    let mut set = JoinSet::new();
    for i in 0..12 {
        let cache = cache.clone();
        let scope = if i % 2 == 0 { owner } else { staff };
        set.spawn(async move { cache.load(scope).await });
    }
    while let Some(res) = set.join_next().await {
        res.expect("task joined").expect("loaded");
    }

    assert_eq!(api.calls(&owner), 1);
    assert_eq!(api.calls(&staff), 1);
    assert_eq!(api.total_calls(), 2);
}

#[tokio::test]
async fn stale_snapshot_is_served_while_refreshing() {
    let api = Arc::new(FakeMetricsApi::new().with_delay(Duration::from_millis(20)));
    let cache = metrics_cache(&api, &Arc::new(MemoryStore::new()));
    let scope = ScopeKey::location(DashboardKind::Manager, 5);
    put_aged(&cache, scope, snapshot(42), TimeDelta::minutes(6)).await;

    assert_eq!(cache.load(scope).await.expect("stale served").metrics.total_bookings, 42);
    assert!(cache.is_refreshing(&scope));

    settle(|| {
        let cache = cache.clone();
        async move { cache.get(&scope).await.is_some() }
    })
    .await;
    assert_eq!(api.calls(&scope), 1);
    assert_eq!(cache.load(scope).await.expect("fresh").metrics.total_bookings, 1);
}

#[tokio::test]
async fn get_drops_expired_snapshots_but_has_sees_them_first() {
    let api = Arc::new(FakeMetricsApi::new());
    let cache = metrics_cache(&api, &Arc::new(MemoryStore::new()));
    let scope = ScopeKey::all(DashboardKind::Owner);
    put_aged(&cache, scope, snapshot(7), TimeDelta::minutes(30)).await;

    assert!(cache.has(&scope).await);
    assert!(cache.get(&scope).await.is_none());
    assert!(!cache.has(&scope).await);
    assert_eq!(api.total_calls(), 0);
}

#[tokio::test]
async fn refresh_replaces_a_fresh_snapshot() {
    let api = Arc::new(FakeMetricsApi::new());
    let cache = metrics_cache(&api, &Arc::new(MemoryStore::new()));
    let scope = ScopeKey::all(DashboardKind::Owner);

    cache.load(scope).await.expect("loaded");
    assert_eq!(cache.refresh(scope).await.expect("refreshed").metrics.total_bookings, 2);
    assert_eq!(
        cache.get(&scope).await.map(|e| e.into_payload().metrics.total_bookings),
        Some(2)
    );
}

#[tokio::test]
async fn failures_surface_only_without_cached_data() {
    let api = Arc::new(FakeMetricsApi::new());
    let cache = metrics_cache(&api, &Arc::new(MemoryStore::new()));
    let observer = Arc::new(RecordingObserver::default());
    cache.set_observer(observer.clone());
    let empty = ScopeKey::location(DashboardKind::Staff, 1);
    let cached = ScopeKey::location(DashboardKind::Staff, 2);
    put_aged(&cache, cached, snapshot(9), TimeDelta::minutes(10)).await;
    api.set_failing(true);

    let err = cache.load(empty).await.expect_err("nothing to fall back on");
    assert!(matches!(*err, CacheError::FetchFailed(_)));

    let outcome = cache
        .refresh_in_background(cached)
        .await
        .expect("task joined");
    assert!(outcome.is_err());
    assert_eq!(observer.errors().len(), 1);
    assert_eq!(cache.load(cached).await.expect("stale kept").metrics.total_bookings, 9);
}

#[tokio::test]
async fn durable_tier_survives_a_new_cache_instance() {
    let api = Arc::new(FakeMetricsApi::new());
    let backend = Arc::new(MemoryStore::new());
    let scope = ScopeKey::location(DashboardKind::Manager, 17);

    metrics_cache(&api, &backend).put(scope, snapshot(5)).await;

    let reloaded = metrics_cache(&api, &backend);
    assert_eq!(reloaded.load(scope).await.expect("from durable tier").metrics.total_bookings, 5);
    assert_eq!(api.total_calls(), 0);
}

#[tokio::test]
async fn invalidate_all_discards_an_in_flight_refresh() {
    let api = Arc::new(FakeMetricsApi::new().with_delay(Duration::from_millis(40)));
    let backend = Arc::new(MemoryStore::new());
    let cache = metrics_cache(&api, &backend);
    let scope = ScopeKey::all(DashboardKind::Owner);

    let handle = cache.refresh_in_background(scope);
    cache.invalidate_all().await;
    handle.await.expect("task joined").expect("fetch itself succeeded");

    assert!(!cache.has(&scope).await);
    assert!(backend.is_empty("metrics"));
}

#[tokio::test]
async fn load_after_invalidate_all_fetches_anew() {
    let api = Arc::new(FakeMetricsApi::new().with_delay(Duration::from_millis(40)));
    let backend = Arc::new(MemoryStore::new());
    let cache = metrics_cache(&api, &backend);
    let scope = ScopeKey::location(DashboardKind::Manager, 2);

    let detached = cache.refresh_in_background(scope);
    cache.invalidate_all().await;
    assert!(!cache.is_refreshing(&scope));

    let loaded = cache.load(scope).await.expect("loaded after invalidation");
    assert_eq!(loaded.metrics.total_bookings, 2);
    assert_eq!(api.calls(&scope), 2);
    assert!(cache.has(&scope).await);

    detached.await.expect("task joined").expect("fetch itself succeeded");
    assert_eq!(
        cache.get(&scope).await.map(|e| e.into_payload().metrics.total_bookings),
        Some(2)
    );
    assert_eq!(backend.len("metrics"), 1);
}

#[tokio::test]
async fn invalidate_discards_the_refresh_of_that_scope_only() {
    let api = Arc::new(FakeMetricsApi::new().with_delay(Duration::from_millis(40)));
    let cache = metrics_cache(&api, &Arc::new(MemoryStore::new()));
    let dropped = ScopeKey::location(DashboardKind::Staff, 4);
    let kept = ScopeKey::location(DashboardKind::Staff, 5);

    let first = cache.refresh_in_background(dropped);
    let second = cache.refresh_in_background(kept);
    cache.invalidate(&dropped).await;

    first.await.expect("task joined").expect("fetch itself succeeded");
    second.await.expect("task joined").expect("fetch itself succeeded");
    assert!(!cache.has(&dropped).await);
    assert!(cache.has(&kept).await);
}
