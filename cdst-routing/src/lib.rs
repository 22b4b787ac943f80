mod cache;
pub use cache::{route_key, RouteCache, RouteKey};

use anyhow::{anyhow, Result};
use cdst_structs::config::Settings;
use cdst_structs::core::Coordinates;
use cdst_utils::{dejsonify, haversine_km};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// How many coordinate pairs go into one upstream request. Keeps URLs short
/// while amortizing request overhead for matrix builds.
const PAIRS_PER_REQUEST: usize = 25;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoutingSource {
    Osrm,
    Fallback,
}

impl std::fmt::Display for RoutingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingSource::Osrm => write!(f, "osrm"),
            RoutingSource::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct RouteResult {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub source: RoutingSource,
}

#[derive(Deserialize)]
struct RouteLeg {
    km: f64,
    min: f64,
}

/// Routing client with a great-circle fallback. Every failure mode of the
/// upstream service degrades to the fallback; `route` never fails.
pub struct RouteProvider {
    base_url: String,
    timeout: Duration,
    fallback_speed_kmh: f64,
    outstanding: Arc<Semaphore>,
    cache: &'static RouteCache,
}

impl RouteProvider {
    pub fn new(settings: &Settings) -> Self {
        let cache = RouteCache::global(Duration::from_secs(settings.cache_ttl_hours * 3600));
        Self::with_cache(settings, cache)
    }

    pub fn with_cache(settings: &Settings, cache: &'static RouteCache) -> Self {
        Self {
            base_url: settings.routing_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(settings.routing_timeout_seconds),
            fallback_speed_kmh: settings.routing_fallback_speed_kmh,
            outstanding: Arc::new(Semaphore::new(settings.routing_max_outstanding)),
            cache,
        }
    }

    pub async fn route(&self, origin: Coordinates, destination: Coordinates) -> RouteResult {
        self.route_batch(&[(origin, destination)]).await[0]
    }

    /// Resolves every pair, cache first, then the upstream service in
    /// bounded-concurrency chunks. Output order matches input order.
    pub async fn route_batch(&self, pairs: &[(Coordinates, Coordinates)]) -> Vec<RouteResult> {
        let mut results: Vec<Option<RouteResult>> = vec![None; pairs.len()];
        let mut misses = Vec::new();
        for (i, (origin, destination)) in pairs.iter().enumerate() {
            match self.cache.get(&route_key(*origin, *destination)) {
                Some(hit) => results[i] = Some(hit),
                None => misses.push(i),
            }
        }

        let fetches = misses.chunks(PAIRS_PER_REQUEST).map(|chunk| async move {
            let _permit = self
                .outstanding
                .acquire()
                .await
                .expect("routing semaphore closed");
            let chunk_pairs: Vec<(Coordinates, Coordinates)> =
                chunk.iter().map(|&i| pairs[i]).collect();
            (chunk, self.fetch(&chunk_pairs).await)
        });

        for (indices, outcome) in join_all(fetches).await {
            match outcome {
                Ok(legs) => {
                    for (&i, leg) in indices.iter().zip(legs) {
                        let result = RouteResult {
                            distance_km: leg.km,
                            duration_minutes: leg.min,
                            source: RoutingSource::Osrm,
                        };
                        let (origin, destination) = pairs[i];
                        self.cache.insert(route_key(origin, destination), result);
                        results[i] = Some(result);
                    }
                }
                Err(e) => {
                    log::warn!(
                        "routing request failed ({} pairs), using great-circle fallback: {}",
                        indices.len(),
                        e
                    );
                    for &i in indices {
                        let (origin, destination) = pairs[i];
                        results[i] = Some(self.fallback(origin, destination));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.expect("every pair is resolved"))
            .collect()
    }

    /// Probes the upstream service with a degenerate request.
    pub async fn healthcheck(&self) -> bool {
        let probe = Coordinates::new(0.0, 0.0);
        self.fetch(&[(probe, probe)]).await.is_ok()
    }

    pub fn fallback(&self, origin: Coordinates, destination: Coordinates) -> RouteResult {
        let distance_km = haversine_km(origin.as_pair(), destination.as_pair());
        RouteResult {
            distance_km,
            duration_minutes: distance_km / self.fallback_speed_kmh * 60.0,
            source: RoutingSource::Fallback,
        }
    }

    async fn fetch(&self, pairs: &[(Coordinates, Coordinates)]) -> Result<Vec<RouteLeg>> {
        let query = pairs
            .iter()
            .map(|(o, d)| {
                format!(
                    "{},{};{},{}",
                    o.latitude, o.longitude, d.latitude, d.longitude
                )
            })
            .collect::<Vec<String>>()
            .join("|");
        let url = format!("{}/route?pairs={}", self.base_url, query);
        let body = cdst_utils::get::<String>(&url, None, Some(self.timeout)).await?;
        let legs = dejsonify::<Vec<RouteLeg>>(&body)
            .map_err(|e| anyhow!("malformed routing response: {}", e))?;
        if legs.len() != pairs.len() {
            return Err(anyhow!(
                "routing response has {} legs for {} pairs",
                legs.len(),
                pairs.len()
            ));
        }
        Ok(legs)
    }
}
