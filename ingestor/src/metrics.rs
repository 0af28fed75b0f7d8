use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref DROPPED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_dropped_messages_total",
        "Total messages dropped because they could not be parsed or stored"
    ))
    .unwrap();
    pub static ref SAMPLES_INSERTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_samples_inserted_total",
        "Total samples committed to sensor_data"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_db_failures_total",
        "Total batches rolled back after an insert failure"
    ))
    .unwrap();
    pub static ref INSERT_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_insert_latency_seconds",
            "Time taken to insert one batch into the database"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref BATCH_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_batch_size",
        "Number of samples in the last batch handed to the database"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SAMPLES_INSERTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INSERT_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
