use crate::RouteResult;
use cdst_structs::core::Coordinates;
use cdst_utils::microdegrees;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const SHARD_COUNT: usize = 16;

/// Origin/destination coordinates in microdegrees (6-decimal precision).
pub type RouteKey = (i64, i64, i64, i64);

pub fn route_key(origin: Coordinates, destination: Coordinates) -> RouteKey {
    (
        microdegrees(origin.latitude),
        microdegrees(origin.longitude),
        microdegrees(destination.latitude),
        microdegrees(destination.longitude),
    )
}

struct CacheEntry {
    result: RouteResult,
    inserted_at: Instant,
}

/// Process-wide route cache, sharded by key hash. Entries expire after the
/// TTL; expired entries are dropped lazily on read and by the periodic
/// sweeper.
pub struct RouteCache {
    shards: Vec<RwLock<HashMap<RouteKey, CacheEntry>>>,
    ttl: Duration,
}

static GLOBAL_CACHE: OnceCell<RouteCache> = OnceCell::new();

impl RouteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            ttl,
        }
    }

    /// The process-wide cache. The TTL is fixed by whoever gets here first.
    pub fn global(ttl: Duration) -> &'static RouteCache {
        GLOBAL_CACHE.get_or_init(|| RouteCache::new(ttl))
    }

    fn shard(&self, key: &RouteKey) -> &RwLock<HashMap<RouteKey, CacheEntry>> {
        let hash = (key.0 ^ key.1.rotate_left(16) ^ key.2.rotate_left(32) ^ key.3.rotate_left(48))
            as usize;
        &self.shards[hash % SHARD_COUNT]
    }

    pub fn get(&self, key: &RouteKey) -> Option<RouteResult> {
        let expired = {
            let shard = self.shard(key).read().expect("route cache shard poisoned");
            match shard.get(key) {
                None => return None,
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                    return Some(entry.result)
                }
                Some(_) => true,
            }
        };
        if expired {
            let mut shard = self.shard(key).write().expect("route cache shard poisoned");
            shard.remove(key);
        }
        None
    }

    pub fn insert(&self, key: RouteKey, result: RouteResult) {
        let mut shard = self.shard(&key).write().expect("route cache shard poisoned");
        shard.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.write().expect("route cache shard poisoned");
            let before = shard.len();
            shard.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
            removed += before - shard.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().expect("route cache shard poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns a background task sweeping expired entries on an interval.
    /// Aborting the returned handle stops the sweeper.
    pub fn spawn_sweeper(
        cache: &'static RouteCache,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = cache.sweep();
                if removed > 0 {
                    log::info!("route cache sweep removed {} expired entries", removed);
                }
            }
        })
    }
}
