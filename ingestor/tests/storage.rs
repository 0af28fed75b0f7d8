//! Storage gateway tests against a real TimescaleDB.
//!
//! Run with `cargo test -p imu-ingestor --test storage -- --ignored` and the
//! `TEST_DB_HOST`, `TEST_DB_PORT`, `TEST_DB_NAME`, `TEST_DB_USER` and
//! `TEST_DB_PASSWORD` variables pointing at a disposable database. The gateway
//! always connects with `sslmode=require`, so that database must accept TLS
//! connections; a plain local Postgres without SSL fails in `connect`. The
//! tests truncate `sensor_data`.

use ingestor::config::DatabaseConfig;
use ingestor::db::{SampleSink, Storage};
use ingestor::model::Sample;
use sqlx::{Connection, PgConnection};
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};

fn lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn test_config() -> DatabaseConfig {
    let var = |key: &str, default: &str| env::var(key).unwrap_or_else(|_| default.to_string());
    DatabaseConfig {
        host: var("TEST_DB_HOST", "localhost"),
        port: var("TEST_DB_PORT", "5432").parse().unwrap(),
        name: var("TEST_DB_NAME", "tsdb"),
        user: var("TEST_DB_USER", "postgres"),
        password: var("TEST_DB_PASSWORD", "postgres"),
    }
}

/// Serialises the tests and hands out a gateway over an empty table.
async fn fresh_storage() -> (MutexGuard<'static, ()>, Storage) {
    let guard = lock().lock().await;
    let config = test_config();

    let storage = Storage::connect(&config).await.unwrap();
    storage.initialize_schema().await.unwrap();

    let mut conn = PgConnection::connect_with(&Storage::connect_options(&config))
        .await
        .unwrap();
    sqlx::query("TRUNCATE sensor_data")
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();

    (guard, storage)
}

fn sample(timestamp: i64) -> Sample {
    Sample {
        timestamp,
        accel: [0.1, -0.2, 9.81],
        gyro: [1.5, 0.0, -0.5],
    }
}

#[tokio::test]
#[ignore]
async fn test_example_row_round_trips() {
    let (_guard, storage) = fresh_storage().await;

    let batch = [Sample {
        timestamp: 1000,
        accel: [1.0, 2.0, 3.0],
        gyro: [4.0, 5.0, 6.0],
    }];
    assert_eq!(storage.save_samples(&batch).await.unwrap(), 1);

    let latest = storage.get_latest().await.unwrap().unwrap();
    assert_eq!(latest.timestamp, 1000);
    assert_eq!(
        (latest.ax, latest.ay, latest.az, latest.gx, latest.gy, latest.gz),
        (1.0, 2.0, 3.0, 4.0, 5.0, 6.0)
    );
    assert!(latest.received_at.is_some());

    storage.close().await;
}

#[tokio::test]
#[ignore]
async fn test_latest_is_max_timestamp_of_batch() {
    let (_guard, storage) = fresh_storage().await;

    let batch: Vec<Sample> = [5_000, 9_000, 1_000, 7_000].into_iter().map(sample).collect();
    assert_eq!(storage.save_samples(&batch).await.unwrap(), 4);

    let latest = storage.get_latest().await.unwrap().unwrap();
    assert_eq!(latest.timestamp, 9_000);

    storage.close().await;
}

#[tokio::test]
#[ignore]
async fn test_window_is_anchored_to_latest_timestamp() {
    let (_guard, storage) = fresh_storage().await;

    let batch: Vec<Sample> = [100, 400, 250, 500, 499].into_iter().map(sample).collect();
    storage.save_samples(&batch).await.unwrap();

    // max is 500, so the window keeps timestamp > 300
    let rows = storage.get_samples_since(200).await.unwrap();
    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![400, 499, 500]);

    storage.close().await;
}

#[tokio::test]
#[ignore]
async fn test_empty_table_reads() {
    let (_guard, storage) = fresh_storage().await;

    assert!(storage.get_samples_since(86_400_000).await.unwrap().is_empty());
    assert!(storage.get_latest().await.unwrap().is_none());
    assert!(storage.get_stats().await.unwrap().is_none());
    assert_eq!(storage.save_samples(&[]).await.unwrap(), 0);

    storage.close().await;
}

#[tokio::test]
#[ignore]
async fn test_duplicates_are_kept() {
    let (_guard, storage) = fresh_storage().await;

    storage.save_samples(&[sample(42), sample(42)]).await.unwrap();
    storage.save_samples(&[sample(42)]).await.unwrap();

    let stats = storage.get_stats().await.unwrap().unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.latest, 42);
    assert_eq!(stats.earliest, 42);

    storage.close().await;
}

#[tokio::test]
#[ignore]
async fn test_schema_initialization_is_idempotent() {
    let (_guard, storage) = fresh_storage().await;

    storage.initialize_schema().await.unwrap();
    storage.initialize_schema().await.unwrap();

    let mut conn = PgConnection::connect_with(&Storage::connect_options(&test_config()))
        .await
        .unwrap();
    let indexes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pg_indexes WHERE tablename = 'sensor_data' AND indexname = 'idx_sensor_timestamp'",
    )
    .fetch_one(&mut conn)
    .await
    .unwrap();
    assert_eq!(indexes, 1);
    conn.close().await.unwrap();

    storage.close().await;
}

#[tokio::test]
#[ignore]
async fn test_close_is_idempotent() {
    let (_guard, storage) = fresh_storage().await;

    storage.close().await;
    storage.close().await;

    assert!(storage.get_latest().await.is_err());
    assert!(storage.save_samples(&[sample(1)]).await.is_err());
}
