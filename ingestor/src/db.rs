use crate::config::DatabaseConfig;
use crate::errors::{Error, ReadError, Result};
use crate::metrics::{BATCH_SIZE, DB_FAILURES_TOTAL, INSERT_LATENCY_SECONDS, SAMPLES_INSERTED_TOTAL};
use crate::model::{Sample, Stats, StoredSample};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Chunk width of the hypertable, in the units of `timestamp` (ms).
const CHUNK_TIME_INTERVAL_MS: i64 = 8_640_000;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS sensor_data (
        id SERIAL,
        timestamp BIGINT NOT NULL,
        ax DOUBLE PRECISION NOT NULL,
        ay DOUBLE PRECISION NOT NULL,
        az DOUBLE PRECISION NOT NULL,
        gx DOUBLE PRECISION NOT NULL,
        gy DOUBLE PRECISION NOT NULL,
        gz DOUBLE PRECISION NOT NULL,
        received_at TIMESTAMPTZ DEFAULT NOW()
    )
    "#;

const CREATE_HYPERTABLE: &str = r#"
    SELECT create_hypertable('sensor_data', 'timestamp',
        chunk_time_interval => $1::bigint,
        if_not_exists => TRUE)
    "#;

const CREATE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_sensor_timestamp
    ON sensor_data (timestamp DESC)
    "#;

const SELECT_COLUMNS: &str = "id, timestamp, ax, ay, az, gx, gy, gz, received_at";

/// Destination for parsed sample batches.
#[async_trait]
pub trait SampleSink: Send + Sync {
    /// Persists the batch atomically and returns the number of rows written.
    async fn save_samples(&self, batch: &[Sample]) -> Result<u64>;
}

/// Gateway over a single exclusive TimescaleDB connection.
///
/// The connection is not safe for concurrent use, so every call holds the
/// mutex for its whole round-trip. Writes always run inside an explicit
/// transaction which rolls back if dropped before commit.
pub struct Storage {
    conn: Mutex<Option<PgConnection>>,
}

impl Storage {
    pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(PgSslMode::Require)
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(
            "Connecting to database {} at {}:{}...",
            config.name, config.host, config.port
        );

        let conn = PgConnection::connect_with(&Self::connect_options(config))
            .await
            .map_err(|e| {
                Error::Connection(format!(
                    "database {}:{} unavailable: {}",
                    config.host, config.port, e
                ))
            })?;

        info!("Database connection established");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Creates the table, hypertable and index if missing. Safe to run on
    /// every startup.
    pub async fn initialize_schema(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::NotConnected)?;

        let version: Option<String> = sqlx::query_scalar(
            "SELECT extversion FROM pg_extension WHERE extname = 'timescaledb'",
        )
        .fetch_optional(&mut *conn)
        .await?;
        match version {
            Some(v) => info!("TimescaleDB version: {}", v),
            None => warn!("TimescaleDB extension not installed"),
        }

        let mut tx = conn.begin().await?;
        sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
        tx.commit().await?;
        info!("Table sensor_data ready");

        let mut tx = conn.begin().await?;
        match sqlx::query(CREATE_HYPERTABLE)
            .bind(CHUNK_TIME_INTERVAL_MS)
            .execute(&mut *tx)
            .await
        {
            Ok(_) => {
                tx.commit().await?;
                info!("Hypertable sensor_data ready");
            }
            Err(e) if is_already_hypertable(&e) => {
                tx.rollback().await?;
                info!("sensor_data is already a hypertable");
            }
            Err(e) => {
                error!("Failed to create hypertable: {}", e);
                return Err(e.into());
            }
        }

        let mut tx = conn.begin().await?;
        sqlx::query(CREATE_INDEX).execute(&mut *tx).await?;
        tx.commit().await?;

        info!("Database schema initialized");
        Ok(())
    }

    /// Count, newest and oldest timestamp over the whole table. `None` when
    /// the table is empty.
    pub async fn get_stats(&self) -> std::result::Result<Option<Stats>, ReadError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ReadError::NotConnected)?;

        let (count, latest, earliest): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(timestamp), MIN(timestamp) FROM sensor_data",
        )
        .fetch_one(&mut *conn)
        .await?;

        Ok(match (latest, earliest) {
            (Some(latest), Some(earliest)) if count > 0 => Some(Stats {
                count,
                latest,
                earliest,
            }),
            _ => None,
        })
    }

    /// Rows with `timestamp > max(timestamp) - window_ms`, oldest first. The
    /// window is anchored to the newest stored sample, not the wall clock.
    pub async fn get_samples_since(
        &self,
        window_ms: i64,
    ) -> std::result::Result<Vec<StoredSample>, ReadError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ReadError::NotConnected)?;

        let query = format!(
            "SELECT {} FROM sensor_data
             WHERE timestamp > (SELECT MAX(timestamp) - $1 FROM sensor_data)
             ORDER BY timestamp ASC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, StoredSample>(&query)
            .bind(window_ms)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows)
    }

    pub async fn get_latest(&self) -> std::result::Result<Option<StoredSample>, ReadError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ReadError::NotConnected)?;

        let query = format!(
            "SELECT {} FROM sensor_data ORDER BY timestamp DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, StoredSample>(&query)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row)
    }

    /// Releases the connection. Calling it again is a no-op.
    pub async fn close(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            match conn.close().await {
                Ok(()) => info!("Database connection closed"),
                Err(e) => warn!("Error while closing database connection: {}", e),
            }
        }
    }

    async fn insert_batch(&self, batch: &[Sample]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::NotConnected)?;

        let columns = Columns::from(batch);
        let query = r#"
            INSERT INTO sensor_data (timestamp, ax, ay, az, gx, gy, gz)
            SELECT * FROM UNNEST($1::int8[], $2::float8[], $3::float8[], $4::float8[],
                                 $5::float8[], $6::float8[], $7::float8[])
            "#;

        let mut tx = conn.begin().await?;
        let inserted = sqlx::query(query)
            .bind(&columns.timestamps)
            .bind(&columns.ax)
            .bind(&columns.ay)
            .bind(&columns.az)
            .bind(&columns.gx)
            .bind(&columns.gy)
            .bind(&columns.gz)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(inserted)
    }
}

#[async_trait]
impl SampleSink for Storage {
    async fn save_samples(&self, batch: &[Sample]) -> Result<u64> {
        if batch.is_empty() {
            debug!("Empty batch, nothing to insert");
            return Ok(0);
        }

        BATCH_SIZE.set(batch.len() as f64);
        let start = Instant::now();

        match self.insert_batch(batch).await {
            Ok(inserted) => {
                INSERT_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                SAMPLES_INSERTED_TOTAL.inc_by(inserted as f64);
                info!("{} samples saved", inserted);
                Ok(inserted)
            }
            Err(e) => {
                DB_FAILURES_TOTAL.inc();
                error!(
                    "Failed to save batch, {} samples rolled back and dropped: {}",
                    batch.len(),
                    e
                );
                Err(e)
            }
        }
    }
}

/// Column-major view of a batch for the `UNNEST` insert.
#[derive(Debug, Default, PartialEq)]
struct Columns {
    timestamps: Vec<i64>,
    ax: Vec<f64>,
    ay: Vec<f64>,
    az: Vec<f64>,
    gx: Vec<f64>,
    gy: Vec<f64>,
    gz: Vec<f64>,
}

impl From<&[Sample]> for Columns {
    fn from(batch: &[Sample]) -> Self {
        let mut columns = Columns::default();
        for sample in batch {
            columns.timestamps.push(sample.timestamp);
            columns.ax.push(sample.accel[0]);
            columns.ay.push(sample.accel[1]);
            columns.az.push(sample.accel[2]);
            columns.gx.push(sample.gyro[0]);
            columns.gy.push(sample.gyro[1]);
            columns.gz.push(sample.gyro[2]);
        }
        columns
    }
}

fn is_already_hypertable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("already a hypertable"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_split() {
        let batch = [
            Sample {
                timestamp: 1000,
                accel: [1.0, 2.0, 3.0],
                gyro: [4.0, 5.0, 6.0],
            },
            Sample {
                timestamp: 1010,
                accel: [-1.0, -2.0, 9.8],
                gyro: [0.1, 0.2, 0.3],
            },
        ];

        let columns = Columns::from(&batch[..]);
        assert_eq!(columns.timestamps, vec![1000, 1010]);
        assert_eq!(columns.ax, vec![1.0, -1.0]);
        assert_eq!(columns.az, vec![3.0, 9.8]);
        assert_eq!(columns.gz, vec![6.0, 0.3]);
    }

    #[test]
    fn test_non_database_error_is_not_tolerated() {
        assert!(!is_already_hypertable(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_connect_options_require_tls() {
        let config = DatabaseConfig {
            host: "db.example.com".to_string(),
            port: 5433,
            name: "tsdb".to_string(),
            user: "tsdbadmin".to_string(),
            password: "secret".to_string(),
        };

        let options = Storage::connect_options(&config);
        assert_eq!(options.get_host(), "db.example.com");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("tsdb"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }
}
