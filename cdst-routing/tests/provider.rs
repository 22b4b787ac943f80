use cdst_routing::{route_key, RouteCache, RouteProvider, RouteResult, RoutingSource};
use cdst_structs::config::Settings;
use cdst_structs::core::Coordinates;
use std::time::Duration;

fn unroutable_settings() -> Settings {
    let mut settings = Settings::default();
    // Nothing listens here, so every upstream request fails fast.
    settings.routing_base_url = "http://127.0.0.1:9".to_string();
    settings.routing_timeout_seconds = 1;
    settings
}

fn leaked_cache(ttl: Duration) -> &'static RouteCache {
    Box::leak(Box::new(RouteCache::new(ttl)))
}

#[test]
fn test_route_key_rounds_to_six_decimals() {
    let a = Coordinates::new(1.23456789, 2.3456789);
    let b = Coordinates::new(1.2345682, 2.3456788);
    assert_eq!(
        route_key(a, Coordinates::new(0.0, 0.0)),
        route_key(b, Coordinates::new(0.0, 0.0))
    );
}

#[test]
fn test_cache_insert_get_and_sweep() {
    let cache = RouteCache::new(Duration::from_secs(3600));
    let key = route_key(Coordinates::new(1.0, 2.0), Coordinates::new(3.0, 4.0));
    assert!(cache.get(&key).is_none());
    let result = RouteResult {
        distance_km: 12.0,
        duration_minutes: 18.0,
        source: RoutingSource::Osrm,
    };
    cache.insert(key, result);
    assert_eq!(cache.get(&key), Some(result));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.sweep(), 0);
}

#[test]
fn test_cache_expires_entries() {
    let cache = RouteCache::new(Duration::from_millis(0));
    let key = route_key(Coordinates::new(1.0, 2.0), Coordinates::new(3.0, 4.0));
    cache.insert(
        key,
        RouteResult {
            distance_km: 1.0,
            duration_minutes: 1.5,
            source: RoutingSource::Osrm,
        },
    );
    // TTL of zero expires immediately; the read lazily deletes.
    assert!(cache.get(&key).is_none());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_unreachable_router_falls_back_to_haversine() {
    let settings = unroutable_settings();
    let provider = RouteProvider::with_cache(&settings, leaked_cache(Duration::from_secs(3600)));
    let nairobi = Coordinates::new(-1.286389, 36.817223);
    let kisumu = Coordinates::new(-0.091702, 34.767956);
    let result = provider.route(nairobi, kisumu).await;
    assert_eq!(result.source, RoutingSource::Fallback);
    assert!((result.distance_km - 265.0).abs() < 5.0);
    // 40 km/h assumed speed.
    let expected_minutes = result.distance_km / 40.0 * 60.0;
    assert!((result.duration_minutes - expected_minutes).abs() < 1e-9);
}

#[tokio::test]
async fn test_batch_preserves_order_and_skips_caching_fallbacks() {
    let settings = unroutable_settings();
    let cache = leaked_cache(Duration::from_secs(3600));
    let provider = RouteProvider::with_cache(&settings, cache);
    let pairs: Vec<(Coordinates, Coordinates)> = (0..5)
        .map(|i| {
            (
                Coordinates::new(0.0, 0.0),
                Coordinates::new(0.0, 1.0 + i as f64),
            )
        })
        .collect();
    let results = provider.route_batch(&pairs).await;
    assert_eq!(results.len(), 5);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.source, RoutingSource::Fallback);
        // Distances grow with longitude offset, proving order is preserved.
        if i > 0 {
            assert!(result.distance_km > results[i - 1].distance_km);
        }
    }
    // Fallback results are never cached, so recovery of the upstream
    // service is observed within a TTL.
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_batch_serves_cached_entries_without_requests() {
    let settings = unroutable_settings();
    let cache = leaked_cache(Duration::from_secs(3600));
    let origin = Coordinates::new(1.0, 1.0);
    let destination = Coordinates::new(2.0, 2.0);
    let cached = RouteResult {
        distance_km: 42.0,
        duration_minutes: 55.0,
        source: RoutingSource::Osrm,
    };
    cache.insert(route_key(origin, destination), cached);
    let provider = RouteProvider::with_cache(&settings, cache);
    let results = provider.route_batch(&[(origin, destination)]).await;
    assert_eq!(results[0], cached);
}
