use anyhow::Context;
use axum::{routing::get, Router};
use ingestor::config::Config;
use ingestor::db::Storage;
use ingestor::ingest::IngestHandler;
use ingestor::mqtt::Subscriber;
use ingestor::{metrics, rest};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting IMU ingestor");
    info!("MQTT broker: {}:{}", config.broker.endpoint, config.broker.port);
    info!("Topic: {}", config.broker.topic);
    info!("Dashboard API: {}:{}", config.dashboard.host, config.dashboard.port);

    metrics::init_metrics().context("failed to register metrics")?;

    let storage = Arc::new(
        Storage::connect(&config.database)
            .await
            .context("failed to connect to database")?,
    );
    storage
        .initialize_schema()
        .await
        .context("failed to initialize database schema")?;
    log_stats(&storage).await;

    // the dashboard gets its own connection so reads never wait on inserts
    let dashboard_storage = Arc::new(
        Storage::connect(&config.database)
            .await
            .context("failed to connect dashboard to database")?,
    );

    let mut subscriber = Subscriber::new(&config.broker);
    let handler = Arc::new(IngestHandler::new(storage.clone()));
    let session = match subscriber.connect().await {
        Ok(()) => subscriber.subscribe(&config.broker.topic, handler).await,
        Err(e) => Err(e),
    };
    if let Err(e) = session {
        subscriber.disconnect().await.ok();
        dashboard_storage.close().await;
        storage.close().await;
        return Err(e).context("MQTT session setup failed");
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(
            dashboard_storage.clone(),
            config.dashboard.update_interval_ms,
            config.dashboard.debug,
        ));

    let http_addr = format!("{}:{}", config.dashboard.host, config.dashboard.port);
    let listener = match tokio::net::TcpListener::bind(&http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            subscriber.disconnect().await.ok();
            dashboard_storage.close().await;
            storage.close().await;
            return Err(e).with_context(|| format!("failed to bind to {}", http_addr));
        }
    };

    info!("Dashboard API listening on {}", http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    if let Err(e) = subscriber.disconnect().await {
        warn!("MQTT disconnect did not complete cleanly: {}", e);
    }
    log_stats(&storage).await;
    dashboard_storage.close().await;
    storage.close().await;

    Ok(())
}

async fn log_stats(storage: &Storage) {
    match storage.get_stats().await {
        Ok(Some(stats)) => {
            info!("Total rows: {}", stats.count);
            info!("Latest timestamp: {} ms", stats.latest);
            info!("Earliest timestamp: {} ms", stats.earliest);
        }
        Ok(None) => info!("No data in sensor_data yet"),
        Err(e) => warn!("Could not read table statistics: {}", e),
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
