//! Basic usage example of the regenerating cache.

use regen_kit::{
    backend::InMemoryBackend, error::Result, CacheConfig, ChannelWorker, LocalHooks, Modifier,
    Registry,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Example value: a city forecast
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Forecast {
    city: String,
    high_c: i32,
    summary: String,
}

/// Mock upstream service
async fn fetch_forecast(city: &str) -> Result<Forecast> {
    println!("  [API] Fetching forecast: {}", city);
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(Forecast {
        city: city.to_string(),
        high_c: 21,
        summary: "Sunny".to_string(),
    })
}

/// Mock related-posts query
async fn find_related(post_id: &str) -> Result<Vec<u64>> {
    println!("  [DB] Computing related posts for {}", post_id);
    let id: u64 = post_id.parse().unwrap_or(0);
    Ok(vec![id + 1, id + 7, id + 19])
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== regen-kit - Basic Example ===\n");

    // 1. Register definitions
    println!("1. Registering cache definitions...");
    let (worker, jobs) = ChannelWorker::channel();
    let mut builder = Registry::builder(InMemoryBackend::new()).with_worker(Arc::new(worker));

    builder.register(
        "weather",
        CacheConfig::new()
            .callback(|city: Modifier| async move { fetch_forecast(city.as_str()).await })
            .expiration(Duration::from_secs(2))
            .soft_expiration(true)
            .stale_window(Duration::from_secs(60)),
    )?;

    builder.register(
        "related_posts",
        CacheConfig::new()
            .callback(|post: Modifier| async move { find_related(post.as_str()).await })
            .expiration(Duration::from_secs(3600))
            .update_hook("post_updated", |args: &[Value]| {
                args.first().and_then(Modifier::from_value)
            }),
    )?;

    builder.register(
        "popular_posts",
        CacheConfig::new()
            .callback(|_m: Modifier| async move { Ok(vec![1u64, 2, 3]) })
            .async_updates(true)
            .update_hook_always("post_updated"),
    )?;

    let registry = builder.build();
    let worker_handle = jobs.spawn(registry.clone());

    let hooks = LocalHooks::new();
    let bound = registry.bind_hooks(&hooks);
    println!("   ✓ {} trigger(s) bound\n", bound.len());

    // 2. First read - miss, regenerated inline
    println!("2. First read of weather[nyc]:");
    if let Some(f) = registry.get_transient::<Forecast>("weather", "nyc").await? {
        println!("   ✓ {}: {}°C, {}\n", f.city, f.high_c, f.summary);
    }

    // 3. Second read - hit
    println!("3. Second read of weather[nyc] (should not call the API):");
    registry.get_transient::<Forecast>("weather", "nyc").await?;
    println!("   ✓ Served from cache\n");

    // 4. Soft expiry - stale value served, refresh in the background
    println!("4. Waiting for soft expiry...");
    tokio::time::sleep(Duration::from_millis(2100)).await;
    registry.get_transient::<Forecast>("weather", "nyc").await?;
    println!("   ✓ Stale value served immediately");
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("   ✓ Refreshed in the background\n");

    // 5. Event - related_posts regenerates inline, popular_posts via worker
    println!("5. Firing post_updated(42):");
    hooks.fire("post_updated", vec![json!(42)]).await;
    let related: Option<Vec<u64>> = registry.get_transient("related_posts", 42u64).await?;
    println!("   ✓ related_posts[42] = {:?}", related);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let popular: Option<Vec<u64>> = registry.get_transient("popular_posts", "").await?;
    println!("   ✓ popular_posts = {:?}\n", popular);

    // 6. Invalidate
    println!("6. Invalidating weather[nyc]:");
    registry.invalidate("weather", "nyc").await?;
    registry.get_transient::<Forecast>("weather", "nyc").await?;
    println!("   ✓ Regenerated after invalidation\n");

    worker_handle.abort();
    println!("=== Example Complete ===\n");
    Ok(())
}
