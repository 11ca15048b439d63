//! Best-effort cache of hot key-to-shard mappings.
//!
//! The cache has no correctness requirement: a miss or a backend failure
//! falls back to resolving through the entity's strategy, so every error
//! here is absorbed as a log line instead of surfacing to callers.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use redis::{AsyncCommands as _, aio::ConnectionManager};

const DEFAULT_NAMESPACE: &str = "hms:shard";

/// Shard-mapping cache backend.
///
/// Two known backends: Redis for deployments, an in-process map for tests
/// and single-node setups.
pub enum MappingCache {
    Redis(RedisCache),
    Memory(MemoryCache),
}

impl MappingCache {
    /// Connects a Redis-backed cache.
    ///
    /// Keys are namespaced `{namespace}:{entity}:{key}`; `None` uses the
    /// default namespace.
    pub async fn redis(url: &str, namespace: Option<&str>) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::Redis(RedisCache {
            manager,
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
        }))
    }

    /// An in-process cache with the same TTL semantics as the Redis backend.
    pub fn memory() -> Self {
        Self::Memory(MemoryCache::default())
    }

    pub(crate) async fn get(&self, entity: &str, key: &str) -> Option<u32> {
        match self {
            Self::Redis(cache) => cache.get(entity, key).await,
            Self::Memory(cache) => cache.get(entity, key),
        }
    }

    pub(crate) async fn set(&self, entity: &str, key: &str, shard: u32, ttl: Duration) {
        match self {
            Self::Redis(cache) => cache.set(entity, key, shard, ttl).await,
            Self::Memory(cache) => cache.set(entity, key, shard, ttl),
        }
    }
}

/// Redis backend over an async [`ConnectionManager`], which reconnects on
/// its own; transient failures surface as cache misses.
pub struct RedisCache {
    manager: ConnectionManager,
    namespace: String,
}

impl RedisCache {
    fn cache_key(&self, entity: &str, key: &str) -> String {
        format!("{}:{}:{}", self.namespace, entity, key)
    }

    async fn get(&self, entity: &str, key: &str) -> Option<u32> {
        let mut conn = self.manager.clone();
        let cache_key = self.cache_key(entity, key);
        match conn.get::<_, Option<u32>>(&cache_key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, cache_key, "shard-mapping cache read failed");
                None
            }
        }
    }

    async fn set(&self, entity: &str, key: &str, shard: u32, ttl: Duration) {
        let mut conn = self.manager.clone();
        let cache_key = self.cache_key(entity, key);
        let result = conn
            .set_ex::<_, _, ()>(&cache_key, shard, ttl.as_secs().max(1))
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, cache_key, "shard-mapping cache write failed");
        }
    }
}

/// In-process backend mirroring the Redis TTL behavior.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (u32, Instant)>>,
}

impl MemoryCache {
    fn cache_key(entity: &str, key: &str) -> String {
        format!("{entity}:{key}")
    }

    fn get(&self, entity: &str, key: &str) -> Option<u32> {
        let mut entries = self.entries.lock().expect("mapping cache poisoned");
        let cache_key = Self::cache_key(entity, key);
        match entries.get(&cache_key) {
            Some((shard, expires_at)) if Instant::now() < *expires_at => Some(*shard),
            Some(_) => {
                entries.remove(&cache_key);
                None
            }
            None => None,
        }
    }

    fn set(&self, entity: &str, key: &str, shard: u32, ttl: Duration) {
        let mut entries = self.entries.lock().expect("mapping cache poisoned");
        entries.insert(Self::cache_key(entity, key), (shard, Instant::now() + ttl));
    }
}
