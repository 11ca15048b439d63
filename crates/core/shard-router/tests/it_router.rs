// DB integration tests for routed access, fan-out, caching, and shutdown.
//
// These tests require system `initdb` and `postgres` binaries on PATH.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use db_pool::PoolConfig;
use pgtemp::PgTempDB;
use shard_router::{
    CrossShardResults, EntityShardConfig, Error, KeyRange, MappingCache, ShardConnection,
    ShardKey, ShardManager, ShardStrategy,
};
use sqlx::Row as _;

#[tokio::test]
async fn routed_read_hits_the_shard_owning_the_key() {
    //* Given
    let shards = ShardedDbs::new(3).await;
    let manager = initialize(vec![shards.range_entity("visits")], None).await;

    //* When
    let pool = manager
        .client_for_shard("visits", &ShardKey::Int(1500), false)
        .expect("Failed to route key");
    let rows = pool
        .query("SELECT shard FROM markers", &[])
        .await
        .expect("Failed to read marker");

    //* Then
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i32, _>("shard"), 1, "key 1500 lives on shard 1");

    manager.shutdown().await;
}

#[tokio::test]
async fn all_clients_come_back_in_shard_index_order() {
    //* Given
    let shards = ShardedDbs::new(3).await;
    let manager = initialize(vec![shards.range_entity("visits")], None).await;

    //* When
    let pools = manager
        .all_clients_for_entity("visits", false)
        .expect("Failed to list clients");

    //* Then
    assert_eq!(pools.len(), 3);
    for (shard, pool) in (0i32..).zip(&pools) {
        let rows = pool
            .query("SELECT shard FROM markers", &[])
            .await
            .expect("Failed to read marker");
        assert_eq!(rows[0].get::<i32, _>("shard"), shard);
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn fanout_aggregates_rows_in_shard_order() {
    //* Given
    let shards = ShardedDbs::new(3).await;
    let manager = initialize(vec![shards.range_entity("visits")], None).await;

    //* When
    let results: CrossShardResults<i32, String> = manager
        .execute_across_shards("visits", true, |_shard, pool| async move {
            let rows = pool
                .query("SELECT shard FROM markers", &[])
                .await
                .map_err(|err| err.to_string())?;
            Ok(rows.iter().map(|row| row.get::<i32, _>("shard")).collect())
        })
        .await
        .expect("Failed to fan out");

    //* Then
    assert!(results.is_complete());
    assert_eq!(results.rows, vec![0, 1, 2]);

    manager.shutdown().await;
}

/// Shard 1's function fails: shards 0 and 2 still contribute their rows and
/// the failure is reported per shard instead of aborting the fan-out.
#[tokio::test]
async fn fanout_absorbs_per_shard_failures() {
    //* Given
    let shards = ShardedDbs::new(3).await;
    let manager = initialize(vec![shards.range_entity("visits")], None).await;

    //* When
    let results = manager
        .execute_across_shards("visits", true, |shard, pool| async move {
            if shard == 1 {
                return Err("lab backend offline".to_string());
            }
            let rows = pool
                .query("SELECT shard FROM markers", &[])
                .await
                .map_err(|err| err.to_string())?;
            Ok(rows.iter().map(|row| row.get::<i32, _>("shard")).collect())
        })
        .await
        .expect("fan-out itself must not fail");

    //* Then
    assert_eq!(results.rows, vec![0, 2]);
    assert_eq!(results.failures.len(), 1);
    assert_eq!(results.failures[0].shard, 1);
    assert!(!results.is_complete());

    manager.shutdown().await;
}

#[tokio::test]
async fn shared_endpoints_are_pooled_once() {
    //* Given: two entities over the same three databases.
    let shards = ShardedDbs::new(3).await;
    let visits = shards.range_entity("visits");
    let patients = EntityShardConfig {
        entity: "patients".to_string(),
        strategy: ShardStrategy::Hash { routing_fn: None },
        shard_count: 3,
        connections: shards.connections(),
    };

    //* When
    let manager = initialize(vec![visits, patients], None).await;

    //* Then
    assert_eq!(manager.endpoint_count(), 3, "three URLs, three pools");

    manager.shutdown().await;
}

/// Caching a mapping means the resolver is not consulted again: observable
/// through a counting routing function.
#[tokio::test]
async fn cached_mapping_skips_the_resolver() {
    //* Given
    let shards = ShardedDbs::new(2).await;
    let resolver_calls = Arc::new(AtomicUsize::new(0));
    let entity = EntityShardConfig {
        entity: "patients".to_string(),
        strategy: ShardStrategy::Hash {
            routing_fn: Some(Arc::new({
                let resolver_calls = Arc::clone(&resolver_calls);
                move |key| {
                    resolver_calls.fetch_add(1, Ordering::SeqCst);
                    match key.as_number() {
                        Some(n) => (n % 2).unsigned_abs() as u32,
                        None => 0,
                    }
                }
            })),
        },
        shard_count: 2,
        connections: shards.connections(),
    };
    let manager = initialize(vec![entity], Some(MappingCache::memory())).await;
    let key = ShardKey::Int(7);

    //* When
    let cached = manager
        .cache_shard_mapping("patients", &key, Duration::from_secs(60))
        .await
        .expect("Failed to cache mapping");
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 1);

    let looked_up = manager
        .cached_shard_mapping("patients", &key)
        .await
        .expect("Failed to look up mapping");

    //* Then
    assert_eq!(looked_up, cached);
    assert_eq!(
        resolver_calls.load(Ordering::SeqCst),
        1,
        "cache hit must not invoke the resolver"
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn unknown_entity_is_a_configuration_error() {
    //* Given
    let shards = ShardedDbs::new(1).await;
    let manager = initialize(vec![shards.range_entity("visits")], None).await;

    //* When
    let err = manager
        .client_for_shard("imaging", &ShardKey::Int(1), false)
        .expect_err("unregistered entity should fail");

    //* Then
    assert!(matches!(err, Error::UnknownEntity { .. }));

    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_rejects_routing() {
    //* Given
    let shards = ShardedDbs::new(1).await;
    let manager = initialize(vec![shards.range_entity("visits")], None).await;

    //* When
    manager.shutdown().await;
    manager.shutdown().await;

    //* Then
    let err = manager
        .client_for_shard("visits", &ShardKey::Int(1), false)
        .expect_err("routing after shutdown should fail");
    assert!(matches!(err, Error::Closed));
}

/// A set of temporary databases, one per shard, each seeded with a marker
/// row recording its shard index.
struct ShardedDbs {
    dbs: Vec<PgTempDB>,
}

impl ShardedDbs {
    async fn new(count: u32) -> Self {
        let mut dbs = Vec::new();
        for shard in 0..count {
            let db = PgTempDB::new();
            seed_marker(&db, shard).await;
            dbs.push(db);
        }
        Self { dbs }
    }

    fn connections(&self) -> Vec<ShardConnection> {
        (0u32..)
            .zip(&self.dbs)
            .map(|(shard, db)| ShardConnection {
                url: db.connection_uri(),
                shard,
                read_only: false,
            })
            .collect()
    }

    /// Range-sharded entity: keys `[shard * 1000, shard * 1000 + 999]` live
    /// on `shard`.
    fn range_entity(&self, entity: &str) -> EntityShardConfig {
        let ranges = (0u32..self.dbs.len() as u32)
            .map(|shard| KeyRange {
                min: i64::from(shard) * 1000,
                max: i64::from(shard) * 1000 + 999,
                shard,
            })
            .collect();
        EntityShardConfig {
            entity: entity.to_string(),
            strategy: ShardStrategy::Range { ranges },
            shard_count: self.dbs.len() as u32,
            connections: self.connections(),
        }
    }
}

async fn seed_marker(db: &PgTempDB, shard: u32) {
    use sqlx::Connection as _;

    // The temporary server may still be starting up (57P03); retry briefly.
    for _ in 0..50 {
        match sqlx::PgConnection::connect(&db.connection_uri()).await {
            Ok(mut conn) => {
                sqlx::query("CREATE TABLE markers (shard int NOT NULL)")
                    .execute(&mut conn)
                    .await
                    .expect("Failed to create markers table");
                sqlx::query("INSERT INTO markers (shard) VALUES ($1)")
                    .bind(shard as i32)
                    .execute(&mut conn)
                    .await
                    .expect("Failed to seed marker");
                return;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    panic!("temporary database did not start in time");
}

async fn initialize(
    configs: Vec<EntityShardConfig>,
    cache: Option<MappingCache>,
) -> ShardManager {
    let pool_config = PoolConfig {
        min_size: 1,
        max_size: 2,
        monitor_interval: Duration::from_secs(3600),
        health_check_interval: Duration::from_secs(3600),
        ..PoolConfig::default()
    };
    ShardManager::initialize(configs, pool_config, cache, None)
        .await
        .expect("Failed to initialize shard manager")
}
