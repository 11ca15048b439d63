//! Entity-aware shard routing over per-endpoint connection pools.
//!
//! A [`ShardManager`] owns one [`DbPool`] per distinct connection URL and
//! one [`ShardResolver`] per logical entity type. Callers route single-shard
//! access through [`client_for_shard`](ShardManager::client_for_shard) and
//! run cross-shard fan-outs through
//! [`execute_across_shards`](ShardManager::execute_across_shards). Hot
//! key-to-shard mappings can be cached in an external store; the cache is
//! best-effort and a miss simply resolves again.
//!
//! All registries are built once at
//! [`initialize`](ShardManager::initialize) and read-only afterwards;
//! resharding a live entity requires a restart.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use db_pool::{DbPool, PoolConfig};
use futures::future::join_all;
use monitoring::telemetry::metrics::Meter;
use tracing::instrument;
use url::Url;

mod cache;
mod config;
mod error;
mod key;
mod metrics;
mod registry;
mod resolver;

pub use self::{
    cache::MappingCache,
    config::{EntityShardConfig, KeyRange, RoutingFn, ShardConnection, ShardStrategy},
    error::{ConfigError, Error, InitError, RoutingError},
    key::ShardKey,
    metrics::RouterMetrics,
    registry::{EndpointId, PoolRegistry},
    resolver::ShardResolver,
};
use self::registry::{EndpointInterner, ShardEndpoints};

/// Routes entities to shards and owns every connection pool.
pub struct ShardManager {
    registry: PoolRegistry,
    entities: HashMap<String, EntityRouter>,
    cache: Option<MappingCache>,
    metrics: Option<RouterMetrics>,
    closed: AtomicBool,
}

/// Resolver and shard table for one entity.
struct EntityRouter {
    resolver: ShardResolver,
    /// Indexed by shard; validation guarantees one entry per index.
    shards: Vec<ShardEndpoints>,
}

impl ShardManager {
    /// Builds resolvers, deduplicates endpoints, and connects one pool per
    /// distinct connection URL.
    ///
    /// Every configuration problem, including strategy fields missing for
    /// the chosen algorithm, is rejected here rather than at first use.
    /// `pool_config` applies to every endpoint pool; `cache` enables the
    /// best-effort shard-mapping cache.
    #[instrument(skip_all, err)]
    pub async fn initialize(
        configs: Vec<EntityShardConfig>,
        pool_config: PoolConfig,
        cache: Option<MappingCache>,
        meter: Option<&Meter>,
    ) -> Result<Self, InitError> {
        let mut interner = EndpointInterner::default();
        let mut entities = HashMap::with_capacity(configs.len());

        for config in &configs {
            config.validate()?;
            if entities.contains_key(&config.entity) {
                return Err(ConfigError::DuplicateEntity {
                    entity: config.entity.clone(),
                }
                .into());
            }

            let mut writable = vec![None; config.shard_count as usize];
            let mut read_only = vec![None; config.shard_count as usize];
            for conn in &config.connections {
                let id = interner.intern(&conn.url);
                let slot = conn.shard as usize;
                if conn.read_only {
                    // First replica per shard wins; additional replicas are
                    // accepted but unused.
                    read_only[slot].get_or_insert(id);
                } else {
                    writable[slot] = Some(id);
                }
            }
            let shards = writable
                .into_iter()
                .zip(read_only)
                .map(|(writable, read_only)| ShardEndpoints {
                    // Validation guarantees exactly one writable per shard.
                    writable: writable.expect("validated writable connection"),
                    read_only,
                })
                .collect();

            entities.insert(
                config.entity.clone(),
                EntityRouter {
                    resolver: ShardResolver::new(config),
                    shards,
                },
            );
        }

        let urls = interner.into_urls();
        let pools = futures::future::try_join_all(urls.iter().map(|url| {
            let pool_config = pool_config.clone();
            async move {
                DbPool::connect(url, pool_config, meter)
                    .await
                    .map_err(|source| InitError::PoolConnect {
                        endpoint: endpoint_label(url),
                        source,
                    })
            }
        }))
        .await?;

        tracing::info!(
            entities = entities.len(),
            endpoints = pools.len(),
            "shard manager initialized"
        );

        Ok(Self {
            registry: PoolRegistry::new(pools),
            entities,
            cache,
            metrics: meter.map(RouterMetrics::new),
            closed: AtomicBool::new(false),
        })
    }

    /// Resolves `key` through the entity's strategy and returns the pool for
    /// its shard, preferring a registered read replica when
    /// `prefer_read_only` is set.
    pub fn client_for_shard(
        &self,
        entity: &str,
        key: &ShardKey,
        prefer_read_only: bool,
    ) -> Result<DbPool, Error> {
        self.ensure_open()?;
        let router = self.router(entity)?;
        let shard = self.resolve(router, entity, key)?;
        let endpoints = router.shards[shard as usize];
        Ok(self.registry.get(endpoints.select(prefer_read_only)).clone())
    }

    /// One pool per shard index of `entity`, in shard-index order.
    pub fn all_clients_for_entity(
        &self,
        entity: &str,
        prefer_read_only: bool,
    ) -> Result<Vec<DbPool>, Error> {
        self.ensure_open()?;
        let router = self.router(entity)?;
        Ok(router
            .shards
            .iter()
            .map(|endpoints| self.registry.get(endpoints.select(prefer_read_only)).clone())
            .collect())
    }

    /// Invokes `f` against every shard of `entity` concurrently.
    ///
    /// A failure on one shard is logged and reported in
    /// [`CrossShardResults::failures`] without aborting the other shards;
    /// successful rows are flattened in shard-index order. Fan-outs prefer
    /// read replicas by default since they are overwhelmingly reads; pass
    /// `prefer_read_only = false` for cross-shard writes.
    pub async fn execute_across_shards<T, E, F, Fut>(
        &self,
        entity: &str,
        prefer_read_only: bool,
        f: F,
    ) -> Result<CrossShardResults<T, E>, Error>
    where
        F: Fn(u32, DbPool) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: std::fmt::Display,
    {
        self.ensure_open()?;
        let router = self.router(entity)?;
        let started = Instant::now();

        let shard_futures = router.shards.iter().enumerate().map(|(shard, endpoints)| {
            let shard = shard as u32;
            let pool = self.registry.get(endpoints.select(prefer_read_only)).clone();
            f(shard, pool)
        });
        let outcomes = join_all(shard_futures).await;

        let mut results = CrossShardResults {
            rows: Vec::new(),
            failures: Vec::new(),
        };
        for (shard, outcome) in (0u32..).zip(outcomes) {
            match outcome {
                Ok(mut rows) => results.rows.append(&mut rows),
                Err(error) => {
                    tracing::warn!(
                        entity,
                        shard,
                        error = %error,
                        "shard failed during cross-shard execution"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_shard_failure(entity, shard);
                    }
                    results.failures.push(ShardFailure { shard, error });
                }
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_fanout(entity, started.elapsed().as_secs_f64());
        }
        Ok(results)
    }

    /// Resolves `key` and writes the mapping through to the external cache.
    ///
    /// The write is best-effort; a failing cache backend costs a log line,
    /// not an error.
    pub async fn cache_shard_mapping(
        &self,
        entity: &str,
        key: &ShardKey,
        ttl: Duration,
    ) -> Result<u32, Error> {
        self.ensure_open()?;
        let router = self.router(entity)?;
        let shard = self.resolve(router, entity, key)?;
        if let Some(cache) = &self.cache {
            cache.set(entity, &key.canonical(), shard, ttl).await;
        }
        Ok(shard)
    }

    /// Resolves `key`, preferring the cached mapping when one is present.
    ///
    /// On a cache hit the entity's resolver is not invoked at all; on a miss
    /// this falls back to resolving.
    pub async fn cached_shard_mapping(&self, entity: &str, key: &ShardKey) -> Result<u32, Error> {
        self.ensure_open()?;
        let router = self.router(entity)?;
        if let Some(cache) = &self.cache {
            if let Some(shard) = cache.get(entity, &key.canonical()).await {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit(entity);
                }
                return Ok(shard);
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_miss(entity);
            }
        }
        self.resolve(router, entity, key)
    }

    /// Number of distinct endpoint pools owned by this manager.
    pub fn endpoint_count(&self) -> usize {
        self.registry.len()
    }

    /// Shuts down every owned pool. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("shard manager already shut down");
            return;
        }
        for pool in self.registry.iter() {
            pool.shutdown().await;
        }
        tracing::info!("shard manager shut down");
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn router(&self, entity: &str) -> Result<&EntityRouter, Error> {
        self.entities.get(entity).ok_or_else(|| Error::UnknownEntity {
            entity: entity.to_string(),
        })
    }

    fn resolve(
        &self,
        router: &EntityRouter,
        entity: &str,
        key: &ShardKey,
    ) -> Result<u32, Error> {
        router.resolver.shard_index(key).map_err(|err| {
            tracing::warn!(entity, key = %key, error = %err, "key could not be routed");
            if let Some(metrics) = &self.metrics {
                metrics.record_routing_error(entity);
            }
            err.into()
        })
    }
}

/// Outcome of one cross-shard execution.
///
/// Failing shards contribute to `failures` instead of rows, so callers can
/// distinguish "zero rows on this shard" from "this shard errored" and
/// decide whether a partial answer is acceptable.
#[derive(Debug)]
pub struct CrossShardResults<T, E = db_pool::Error> {
    /// Successful rows from every responding shard, in shard-index order.
    pub rows: Vec<T>,
    /// Shards whose function failed, in shard-index order.
    pub failures: Vec<ShardFailure<E>>,
}

impl<T, E> CrossShardResults<T, E> {
    /// `true` when every shard responded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One shard's absorbed failure during a fan-out.
#[derive(Debug)]
pub struct ShardFailure<E> {
    pub shard: u32,
    pub error: E,
}

/// Credential-free label for error context.
fn endpoint_label(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("localhost");
            match parsed.port() {
                Some(port) => format!("{host}:{port}{}", parsed.path()),
                None => format!("{host}{}", parsed.path()),
            }
        }
        // Never echo the raw string; it may carry credentials.
        Err(_) => "<invalid-url>".to_string(),
    }
}
