//! Application state
//!
//! Configuration loaded from the environment at startup, and the shared
//! state handed to the REST handlers.

use crate::detection_repository::DetectionRepository;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// MQTT connection parameters
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publish_timeout_secs: u64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the source detections database (read-only)
    pub database_path: PathBuf,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Path to the durable cursor file
    pub cursor_path: PathBuf,
    /// Bridge poll cadence
    pub poll_interval: Duration,
    /// Max detections fetched per cycle
    pub batch_size: u32,
    /// Seed the cursor at the current max id instead of delivering backlog
    pub skip_backlog: bool,
    /// Give up on a row after this many failed publish attempts
    /// (unset = unbounded retry)
    pub max_publish_attempts: Option<u32>,
    /// Read-only connection pool size
    pub db_pool_size: u32,
    /// MQTT bridge parameters; `None` runs the REST surface only
    pub mqtt: Option<MqttConfig>,
}

impl AppConfig {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let database_path = PathBuf::from(
            std::env::var("BIRDNET_DB_PATH")
                .map_err(|_| Error::Config("BIRDNET_DB_PATH is required".to_string()))?,
        );
        if !database_path.is_file() {
            return Err(Error::Config(format!(
                "database not found: {}",
                database_path.display()
            )));
        }

        let mqtt = match std::env::var("MQTT_ENABLED").as_deref() {
            Ok("true") | Ok("1") => Some(MqttConfig {
                host: std::env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: parse_env("MQTT_PORT", 1883)?,
                topic: std::env::var("MQTT_TOPIC")
                    .unwrap_or_else(|_| "birdnet/detections".to_string()),
                client_id: std::env::var("MQTT_CLIENT_ID")
                    .unwrap_or_else(|_| "birdnet-bridge".to_string()),
                username: std::env::var("MQTT_USERNAME").ok().filter(|s| !s.is_empty()),
                password: std::env::var("MQTT_PASSWORD").ok().filter(|s| !s.is_empty()),
                publish_timeout_secs: parse_env("MQTT_PUBLISH_TIMEOUT_SECS", 10)?,
            }),
            _ => None,
        };

        Ok(Self {
            database_path,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT", 8081)?,
            cursor_path: std::env::var("BRIDGE_CURSOR_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/birdnet-bridge/cursor.json")),
            poll_interval: Duration::from_secs(parse_env("BRIDGE_POLL_INTERVAL_SECS", 10)?),
            batch_size: parse_env("BRIDGE_BATCH_SIZE", 500)?,
            skip_backlog: std::env::var("BRIDGE_SKIP_BACKLOG")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            max_publish_attempts: match std::env::var("BRIDGE_MAX_PUBLISH_ATTEMPTS") {
                Ok(v) => Some(v.parse().map_err(|_| {
                    Error::Config(format!("invalid BRIDGE_MAX_PUBLISH_ATTEMPTS: {v}"))
                })?),
                Err(_) => None,
            },
            db_pool_size: parse_env("DB_POOL_SIZE", 4)?,
            mqtt,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| Error::Config(format!("invalid {key}: {v}"))),
        Err(_) => Ok(default),
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Read-only query surface over the source database
    pub repository: Arc<DetectionRepository>,
}
