//! Integration tests for regen-kit
//!
//! End-to-end behavior through the public API: registration, reads,
//! expiry, locking under concurrency, hook dispatch and the worker.

use regen_kit::backend::{CacheBackend, InMemoryBackend};
use regen_kit::{
    CacheConfig, ChannelWorker, Error, LocalHooks, Modifier, Modifiers, RegenOutcome, Registry,
    StaleRefresh,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct Forecast {
    city: String,
    high: i32,
    revision: usize,
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Weather definition whose callback counts its invocations.
fn weather(calls: &Arc<AtomicUsize>) -> CacheConfig {
    let calls = Arc::clone(calls);
    CacheConfig::new().callback(move |city: Modifier| {
        let calls = Arc::clone(&calls);
        async move {
            let revision = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Forecast {
                city: city.to_string(),
                high: 21,
                revision,
            })
        }
    })
}

async fn wait_for(calls: &AtomicUsize, expected: usize) {
    for _ in 0..100 {
        if calls.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_weather_nyc_regenerates_once_then_hits() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder
        .register("weather", weather(&calls).expiration(Duration::from_secs(3600)))
        .expect("Failed to register weather");
    let registry = builder.build();

    let first: Forecast = registry
        .get_transient("weather", "nyc")
        .await
        .expect("Failed to read weather")
        .expect("value regenerated inline");
    assert_eq!(first.city, "nyc");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second: Option<Forecast> = registry.get_transient("weather", "nyc").await.unwrap();
    assert_eq!(second, Some(first));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_modifiers_are_independent_entries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder.register("weather", weather(&calls)).unwrap();
    let registry = builder.build();

    let nyc: Option<Forecast> = registry.get_transient("weather", "nyc").await.unwrap();
    let sfo: Option<Forecast> = registry.get_transient("weather", "sfo").await.unwrap();

    assert_eq!(nyc.unwrap().city, "nyc");
    assert_eq!(sfo.unwrap().city, "sfo");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_hard_expired_behaves_like_empty() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder
        .register("weather", weather(&calls).expiration(Duration::from_millis(40)))
        .unwrap();
    let registry = builder.build();

    let first: Forecast = registry.get_transient("weather", "nyc").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    let second: Forecast = registry.get_transient("weather", "nyc").await.unwrap().unwrap();

    assert_eq!(first.revision, 1);
    assert_eq!(second.revision, 2);
}

#[tokio::test]
async fn test_soft_expired_serves_stale_and_refreshes_once() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder
        .register(
            "weather",
            weather(&calls)
                .expiration(Duration::from_millis(40))
                .soft_expiration(true)
                .stale_window(Duration::from_secs(60)),
        )
        .unwrap();
    let registry = builder.build();

    let _: Option<Forecast> = registry.get_transient("weather", "nyc").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Several stale reads at once: all see the old value, one refresh runs
    let reads = (0..5).map(|_| registry.get_transient::<Forecast>("weather", "nyc"));
    let values = futures::future::join_all(reads).await;
    for value in values {
        assert_eq!(value.unwrap().unwrap().revision, 1);
    }

    wait_for(&calls, 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let fresh: Forecast = registry.get_transient("weather", "nyc").await.unwrap().unwrap();
    assert_eq!(fresh.revision, 2);
}

#[tokio::test]
async fn test_stale_refresh_through_worker() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (worker, mut jobs) = ChannelWorker::channel();
    let mut builder = Registry::builder(InMemoryBackend::new()).with_worker(Arc::new(worker));
    builder
        .register(
            "weather",
            weather(&calls)
                .expiration(Duration::from_millis(30))
                .soft_expiration(true)
                .stale_refresh(StaleRefresh::Worker),
        )
        .unwrap();
    let registry = builder.build();

    let _: Option<Forecast> = registry.get_transient("weather", "nyc").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stale: Forecast = registry.get_transient("weather", "nyc").await.unwrap().unwrap();
    assert_eq!(stale.revision, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let job = jobs.recv().await.expect("stale refresh queued");
    assert_eq!(job.modifier, Modifier::from("nyc"));
    assert_eq!(registry.run_job(&job).await.unwrap(), RegenOutcome::Regenerated);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Locking
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_regenerate_runs_callback_once() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder
        .register(
            "slow",
            CacheConfig::new().callback(move |_m: Modifier| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok("done".to_string())
                }
            }),
        )
        .unwrap();
    let registry = builder.build();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.regenerate("slow", "x").await
        }));
    }

    let mut regenerated = 0;
    let mut contended = 0;
    for handle in handles {
        match handle.await.expect("task panicked").expect("regenerate failed") {
            RegenOutcome::Regenerated => regenerated += 1,
            RegenOutcome::Contended => contended += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(regenerated, 1);
    assert_eq!(contended, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lock_released_after_failure() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder
        .register(
            "flaky",
            CacheConfig::new().callback(move |_m: Modifier| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::Other("first attempt fails".to_string()))
                    } else {
                        Ok(7u32)
                    }
                }
            }),
        )
        .unwrap();
    let registry = builder.build();

    let first = registry.get_transient::<u32>("flaky", "a").await;
    assert!(matches!(first, Err(Error::RegenerationError { .. })));

    let entry = registry.entry("flaky", "a").unwrap();
    assert!(!entry.is_locked().await.unwrap());

    let second = registry.get_transient::<u32>("flaky", "a").await.unwrap();
    assert_eq!(second, Some(7));
}

#[tokio::test]
async fn test_get_with_foreign_lock_and_no_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder.register("weather", weather(&calls)).unwrap();
    let registry = builder.build();

    let holder = registry.entry("weather", "nyc").unwrap();
    assert!(holder.lock_update().await.unwrap());

    let value: Option<Forecast> = registry.get_transient("weather", "nyc").await.unwrap();
    assert_eq!(value, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    holder.unlock_update().await.unwrap();
    let value: Option<Forecast> = registry.get_transient("weather", "nyc").await.unwrap();
    assert!(value.is_some());
}

// =============================================================================
// Event triggers
// =============================================================================

#[tokio::test]
async fn test_post_updated_regenerates_inline() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let backend = InMemoryBackend::new();

    let mut builder = Registry::builder(backend.clone());
    builder
        .register(
            "related_posts",
            CacheConfig::new()
                .callback(move |post: Modifier| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        post.as_str()
                            .parse::<u64>()
                            .map(|id| vec![id + 1, id + 2])
                            .map_err(|e| Error::Other(e.to_string()))
                    }
                })
                .update_hook("post_updated", |args: &[Value]| {
                    args.first().and_then(Modifier::from_value)
                }),
        )
        .unwrap();
    let registry = builder.build();

    let hooks = LocalHooks::new();
    let bound = registry.bind_hooks(&hooks);
    assert_eq!(bound.len(), 1);

    // Regeneration completes before fire returns
    hooks.fire("post_updated", vec![json!(42), json!({"status": "publish"})]).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(backend.get("related_posts:42").await.unwrap().is_some());

    let related: Option<Vec<u64>> = registry.get_transient("related_posts", 42u64).await.unwrap();
    assert_eq!(related, Some(vec![43, 44]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_policy_skip_and_many() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder
        .register(
            "weather",
            weather(&calls).update_hook("cities_changed", |args: &[Value]| {
                let cities: Vec<Modifier> = args.iter().filter_map(Modifier::from_value).collect();
                if cities.is_empty() {
                    Modifiers::Skip
                } else {
                    Modifiers::Many(cities)
                }
            }),
        )
        .unwrap();
    let registry = builder.build();
    let hooks = LocalHooks::new();
    registry.bind_hooks(&hooks);

    hooks.fire("cities_changed", vec![json!(null)]).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    hooks
        .fire("cities_changed", vec![json!("nyc"), json!("sfo"), json!("bos")])
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failing_regeneration_does_not_break_fire() {
    let mut builder = Registry::builder(InMemoryBackend::new());
    builder
        .register(
            "broken",
            CacheConfig::new()
                .callback(|_m: Modifier| async move { Err::<u8, _>(Error::Other("down".into())) })
                .update_hook_always("tick"),
        )
        .unwrap();
    let registry = builder.build();
    let hooks = LocalHooks::new();
    registry.bind_hooks(&hooks);

    assert_eq!(hooks.fire("tick", vec![]).await, 1);

    let report = registry.dispatch("broken", "tick", &[]).await.unwrap();
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn test_async_updates_go_through_worker() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let (worker, jobs) = ChannelWorker::channel();

    let mut builder = Registry::builder(InMemoryBackend::new()).with_worker(Arc::new(worker));
    builder
        .register(
            "weather",
            weather(&calls)
                .async_updates(true)
                .update_hook("forecast_published", |args: &[Value]| {
                    args.first().and_then(Modifier::from_value)
                }),
        )
        .unwrap();
    let registry = builder.build();
    let hooks = LocalHooks::new();
    registry.bind_hooks(&hooks);

    let handle = jobs.spawn(registry.clone());

    hooks.fire("forecast_published", vec![json!("nyc")]).await;
    wait_for(&calls, 1).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let forecast: Option<Forecast> = registry.get_transient("weather", "nyc").await.unwrap();
    assert_eq!(forecast.map(|f| f.revision), Some(1));

    handle.abort();
}
