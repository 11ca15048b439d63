// DB integration tests for pool bookkeeping, scaling, and shutdown.
//
// These tests require system `initdb` and `postgres` binaries on PATH.

use std::time::Duration;

use db_pool::{DbPool, Error, PoolConfig, PoolPhase, SqlParam};
use pgtemp::PgTempDB;

#[tokio::test]
async fn acquire_and_release_updates_bookkeeping() {
    //* Given
    let temp_db = PgTempDB::new();
    let pool = connect_pool(&temp_db.connection_uri(), small_config()).await;

    //* When
    let conn = pool.acquire().await.expect("Failed to acquire connection");

    //* Then
    let stats = pool.stats();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.current_size, 2);
    assert_eq!(stats.phase, PoolPhase::Active);

    drop(conn);
    let stats = pool.stats();
    assert_eq!(stats.active, 0, "release should decrement active");

    pool.shutdown().await;
}

#[tokio::test]
async fn query_binds_params_and_returns_rows() {
    //* Given
    let temp_db = PgTempDB::new();
    let pool = connect_pool(&temp_db.connection_uri(), small_config()).await;
    pool.query(
        "CREATE TABLE visits (id bigint PRIMARY KEY, ward text NOT NULL)",
        &[],
    )
    .await
    .expect("Failed to create table");

    //* When
    pool.query(
        "INSERT INTO visits (id, ward) VALUES ($1, $2)",
        &[SqlParam::Int(1), SqlParam::from("icu")],
    )
    .await
    .expect("Failed to insert row");

    let rows = pool
        .query(
            "SELECT ward FROM visits WHERE id = $1",
            &[SqlParam::Int(1)],
        )
        .await
        .expect("Failed to select row");

    //* Then
    assert_eq!(rows.len(), 1);
    let ward: String = sqlx::Row::get(&rows[0], "ward");
    assert_eq!(ward, "icu");

    pool.shutdown().await;
}

#[tokio::test]
async fn unique_violation_surfaces_immediately() {
    //* Given
    let temp_db = PgTempDB::new();
    let pool = connect_pool(&temp_db.connection_uri(), small_config()).await;
    pool.query("CREATE TABLE mrns (mrn text PRIMARY KEY)", &[])
        .await
        .expect("Failed to create table");
    pool.query("INSERT INTO mrns VALUES ($1)", &[SqlParam::from("A-100")])
        .await
        .expect("Failed to insert row");

    //* When
    let err = pool
        .query("INSERT INTO mrns VALUES ($1)", &[SqlParam::from("A-100")])
        .await
        .expect_err("duplicate insert should fail");

    //* Then
    assert!(!err.is_retryable(), "constraint violations must not be retried");

    pool.shutdown().await;
}

/// Saturate a 5-connection pool with one caller waiting, then force a monitor
/// tick: the pool must grow by exactly one `scale_up_step`.
#[tokio::test]
async fn monitor_scales_up_under_load() {
    //* Given
    let temp_db = PgTempDB::new();
    let config = PoolConfig {
        min_size: 5,
        max_size: 20,
        scale_up_step: 5,
        scale_up_threshold: 0.8,
        acquire_timeout: Duration::from_secs(10),
        // Keep the timers out of the way; the test drives the monitor itself.
        monitor_interval: Duration::from_secs(3600),
        health_check_interval: Duration::from_secs(3600),
        ..PoolConfig::default()
    };
    let pool = connect_pool(&temp_db.connection_uri(), config).await;

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire().await.expect("Failed to acquire connection"));
    }

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    // Let the waiter block on the exhausted semaphore.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.stats().waiting, 1, "one caller should be waiting");

    //* When
    pool.monitor_pool_usage();

    //* Then
    assert_eq!(pool.stats().current_size, 10, "one scale-up step of 5");

    // The new capacity unblocks the waiting caller.
    let conn = waiter
        .await
        .expect("waiter task should not panic")
        .expect("waiter should acquire after scale-up");

    drop(conn);
    drop(held);
    pool.shutdown().await;
}

#[tokio::test]
async fn scaling_is_clamped_and_idempotent_at_bounds() {
    //* Given
    let temp_db = PgTempDB::new();
    let config = PoolConfig {
        min_size: 2,
        max_size: 3,
        ..small_config()
    };
    let pool = connect_pool(&temp_db.connection_uri(), config).await;

    //* When / Then
    pool.scale_up(10);
    assert_eq!(pool.stats().current_size, 3, "clamped to max_size");
    pool.scale_up(10);
    assert_eq!(pool.stats().current_size, 3, "no-op at max_size");

    pool.scale_down(10);
    assert_eq!(pool.stats().current_size, 2, "clamped to min_size");
    pool.scale_down(10);
    assert_eq!(pool.stats().current_size, 2, "no-op at min_size");

    pool.shutdown().await;
}

#[tokio::test]
async fn scale_down_releases_only_unclaimed_capacity() {
    //* Given
    let temp_db = PgTempDB::new();
    let config = PoolConfig {
        min_size: 1,
        max_size: 4,
        ..small_config()
    };
    let pool = connect_pool(&temp_db.connection_uri(), config).await;
    pool.scale_up(3);
    assert_eq!(pool.stats().current_size, 4);

    let first = pool.acquire().await.expect("Failed to acquire connection");
    let second = pool.acquire().await.expect("Failed to acquire connection");

    //* When
    pool.scale_down(10);

    //* Then
    let stats = pool.stats();
    assert_eq!(stats.active, 2);
    assert_eq!(
        stats.current_size, 2,
        "held connections must not be revoked"
    );

    drop(first);
    drop(second);
    pool.shutdown().await;
}

#[tokio::test]
async fn health_check_never_raises() {
    //* Given
    let temp_db = PgTempDB::new();
    let pool = connect_pool(&temp_db.connection_uri(), small_config()).await;

    //* When / Then: a passing probe and a probe against a shut-down pool both
    // return without error.
    pool.perform_health_check().await;
    pool.shutdown().await;
    pool.perform_health_check().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_rejects_new_acquires() {
    //* Given
    let temp_db = PgTempDB::new();
    let pool = connect_pool(&temp_db.connection_uri(), small_config()).await;

    //* When
    pool.shutdown().await;
    pool.shutdown().await;

    //* Then
    let err = pool
        .acquire()
        .await
        .expect_err("acquire after shutdown should fail");
    assert!(matches!(err, Error::Closed));
    assert_eq!(pool.stats().phase, PoolPhase::Closed);
}

#[tokio::test]
async fn shutdown_wakes_suspended_acquires() {
    //* Given
    let temp_db = PgTempDB::new();
    let config = PoolConfig {
        min_size: 1,
        max_size: 1,
        acquire_timeout: Duration::from_secs(30),
        ..small_config()
    };
    let pool = connect_pool(&temp_db.connection_uri(), config).await;
    let held = pool.acquire().await.expect("Failed to acquire connection");

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    //* When
    pool.shutdown().await;

    //* Then
    let err = waiter
        .await
        .expect("waiter task should not panic")
        .expect_err("suspended acquire should fail on shutdown");
    assert!(matches!(err, Error::Closed));

    drop(held);
}

/// Small pool with the background timers effectively disabled.
fn small_config() -> PoolConfig {
    PoolConfig {
        min_size: 2,
        max_size: 4,
        monitor_interval: Duration::from_secs(3600),
        health_check_interval: Duration::from_secs(3600),
        ..PoolConfig::default()
    }
}

/// Connect to a temporary database, retrying while it is still starting up
/// (PostgreSQL error code 57P03).
async fn connect_pool(url: &str, config: PoolConfig) -> DbPool {
    for _ in 0..50 {
        match DbPool::connect(url, config.clone(), None).await {
            Ok(pool) => return pool,
            Err(err) if is_starting_up(&err) => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(err) => panic!("Failed to connect pool: {err}"),
        }
    }
    panic!("temporary database did not start in time");
}

fn is_starting_up(err: &Error) -> bool {
    match err {
        Error::Connect(sqlx::Error::Database(db_err)) => {
            db_err.code().is_some_and(|code| code == "57P03")
        }
        Error::Connect(_) | Error::ConnectTimeout(_) => true,
        _ => false,
    }
}
