//! MPU6050 telemetry ingestion: an mTLS MQTT subscriber that stores sample
//! batches in a TimescaleDB hypertable, plus the read API the dashboard
//! polls.

pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod payload;
pub mod rest;
