use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid MQTT endpoint: {0}")]
    Endpoint(String),

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("Subscription to {0} rejected by broker")]
    SubscriptionRejected(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Not connected")]
    NotConnected,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure on the dashboard read path. Callers decide how to degrade.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("database connection is closed")]
    NotConnected,

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
}
