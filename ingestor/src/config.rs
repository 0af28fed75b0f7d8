use crate::errors::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const REQUIRED: [&str; 4] = ["DB_HOST", "DB_USER", "DB_PASSWORD", "MQTT_ENDPOINT"];

/// Process configuration, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    pub dashboard: DashboardConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub credentials: CredentialConfig,
}

/// TLS material for the broker session: inline contents take precedence
/// over the file paths when all three are present.
#[derive(Clone, Default)]
pub struct CredentialConfig {
    pub root_ca_path: PathBuf,
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
    pub root_ca_content: Option<String>,
    pub certificate_content: Option<String>,
    pub private_key_content: Option<String>,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub update_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Empty
    /// values count as unset. Every missing required variable is reported in
    /// a single error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {} (check your .env file or the server environment)",
                missing.join(", ")
            )));
        }

        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| get(key).unwrap_or_default();

        let broker = BrokerConfig {
            endpoint: required("MQTT_ENDPOINT").trim().to_string(),
            port: parse_or(&get, "MQTT_PORT", 8883)?,
            client_id: string_or("MQTT_CLIENT_ID", "imu-ingestor"),
            topic: string_or("MQTT_TOPIC", "esp32/mpu6050/data"),
            credentials: CredentialConfig {
                root_ca_path: string_or("MQTT_ROOT_CA", "certs/root-CA.pem").into(),
                certificate_path: string_or("MQTT_CERTIFICATE", "certs/certificate.pem.crt")
                    .into(),
                private_key_path: string_or("MQTT_PRIVATE_KEY", "certs/private.pem.key").into(),
                root_ca_content: get("MQTT_ROOT_CA_CONTENT"),
                certificate_content: get("MQTT_CERTIFICATE_CONTENT"),
                private_key_content: get("MQTT_PRIVATE_KEY_CONTENT"),
            },
        };

        let database = DatabaseConfig {
            host: required("DB_HOST"),
            port: parse_or(&get, "DB_PORT", 5432)?,
            name: string_or("DB_NAME", "tsdb"),
            user: required("DB_USER"),
            password: required("DB_PASSWORD"),
        };

        let dashboard = DashboardConfig {
            host: string_or("DASHBOARD_HOST", "0.0.0.0"),
            port: parse_or(&get, "DASHBOARD_PORT", 8050)?,
            debug: parse_flag(get("DASHBOARD_DEBUG")),
            update_interval_ms: parse_or(&get, "UPDATE_INTERVAL_MS", 5000)?,
        };

        Ok(Self {
            broker,
            database,
            dashboard,
            log_level: string_or("LOG_LEVEL", "info"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", key, raw))),
        None => Ok(default),
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("CredentialConfig")
            .field("root_ca_path", &self.root_ca_path)
            .field("certificate_path", &self.certificate_path)
            .field("private_key_path", &self.private_key_path)
            .field("root_ca_content", &redact(&self.root_ca_content))
            .field("certificate_content", &redact(&self.certificate_content))
            .field("private_key_content", &redact(&self.private_key_content))
            .finish()
    }
}
