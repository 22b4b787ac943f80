use crate::core::ObjectiveWeights;
use std::env;
use std::str::FromStr;

/// Process configuration, environment-variable driven with sane defaults.
#[derive(Clone, Debug)]
pub struct Settings {
    pub population_size: usize,
    pub max_generations: u32,
    pub optimization_timeout_seconds: u64,
    pub default_weights: ObjectiveWeights,
    pub routing_base_url: String,
    pub routing_timeout_seconds: u64,
    pub routing_max_outstanding: usize,
    pub routing_fallback_speed_kmh: f64,
    pub cache_ttl_hours: u64,
    pub cache_cleanup_interval_hours: u64,
    pub cost_per_km: f64,
    pub max_acceptable_distance_km: f64,
    pub max_running_per_user: usize,
    pub max_queued_per_user: usize,
    pub scenario_slots: usize,
    pub checkpoint_interval: u32,
    pub checkpoint_dir: String,
    pub eval_worker_cap: usize,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            population_size: 200,
            max_generations: 500,
            optimization_timeout_seconds: 900,
            default_weights: ObjectiveWeights::default(),
            routing_base_url: "http://router.project-osrm.org".to_string(),
            routing_timeout_seconds: 30,
            routing_max_outstanding: 8,
            routing_fallback_speed_kmh: 40.0,
            cache_ttl_hours: 24,
            cache_cleanup_interval_hours: 6,
            cost_per_km: 0.5,
            max_acceptable_distance_km: 50.0,
            max_running_per_user: 3,
            max_queued_per_user: 10,
            scenario_slots: 4,
            checkpoint_interval: 50,
            checkpoint_dir: "./checkpoints".to_string(),
            eval_worker_cap: 8,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            population_size: env_or("OPTIMIZATION_POPULATION_SIZE", defaults.population_size),
            max_generations: env_or("OPTIMIZATION_MAX_GENERATIONS", defaults.max_generations),
            optimization_timeout_seconds: env_or(
                "OPTIMIZATION_TIMEOUT",
                defaults.optimization_timeout_seconds,
            ),
            default_weights: defaults.default_weights,
            routing_base_url: env_or("ROUTING_BASE_URL", defaults.routing_base_url),
            routing_timeout_seconds: env_or("ROUTING_TIMEOUT", defaults.routing_timeout_seconds),
            routing_max_outstanding: env_or(
                "ROUTING_MAX_OUTSTANDING",
                defaults.routing_max_outstanding,
            ),
            routing_fallback_speed_kmh: env_or(
                "ROUTING_FALLBACK_SPEED_KMH",
                defaults.routing_fallback_speed_kmh,
            ),
            cache_ttl_hours: env_or("ROUTING_CACHE_TTL_HOURS", defaults.cache_ttl_hours),
            cache_cleanup_interval_hours: env_or(
                "ROUTING_CACHE_CLEANUP_HOURS",
                defaults.cache_cleanup_interval_hours,
            ),
            cost_per_km: env_or("TRANSPORT_COST_PER_KM", defaults.cost_per_km),
            max_acceptable_distance_km: env_or(
                "MAX_ACCEPTABLE_DISTANCE_KM",
                defaults.max_acceptable_distance_km,
            ),
            max_running_per_user: env_or(
                "SCHEDULER_MAX_RUNNING_PER_USER",
                defaults.max_running_per_user,
            ),
            max_queued_per_user: env_or(
                "SCHEDULER_MAX_QUEUED_PER_USER",
                defaults.max_queued_per_user,
            ),
            scenario_slots: env_or("SCHEDULER_SCENARIO_SLOTS", defaults.scenario_slots),
            checkpoint_interval: env_or("CHECKPOINT_INTERVAL", defaults.checkpoint_interval),
            checkpoint_dir: env_or("CHECKPOINT_DIR", defaults.checkpoint_dir),
            eval_worker_cap: env_or("EVAL_WORKER_CAP", defaults.eval_worker_cap),
        }
    }
}
