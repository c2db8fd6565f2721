//! Configuration parsing for Chatlog.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Defaults matching a local broker and a file-backed store

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::pool::PoolConfig;
use crate::subscriber::dispatch::IngestRules;
use crate::subscriber::BrokerConfig;

/// Chatlog: persists chat messages from an MQTT topic and serves the latest ones.
#[derive(Parser, Debug, Clone)]
#[command(name = "chatlog")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address the read API binds to
    #[arg(long, env = "CHATLOG_HTTP_HOST", default_value = "0.0.0.0")]
    pub http_host: String,

    /// Port the read API listens on
    #[arg(long, env = "CHATLOG_HTTP_PORT", default_value_t = 8000)]
    pub http_port: u16,

    /// MQTT broker host
    #[arg(long, env = "CHATLOG_MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, env = "CHATLOG_MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Topic carrying chat message events
    #[arg(long, env = "CHATLOG_MQTT_TOPIC", default_value = "chat/messages")]
    pub mqtt_topic: String,

    /// Client identifier presented to the broker
    #[arg(long, env = "CHATLOG_MQTT_CLIENT_ID", default_value = "mqtt_logger")]
    pub mqtt_client_id: String,

    /// MQTT keep-alive interval in seconds
    #[arg(long, env = "CHATLOG_MQTT_KEEP_ALIVE_SECS", default_value_t = 60)]
    pub mqtt_keep_alive_secs: u64,

    /// Upper bound for the reconnect backoff in seconds
    #[arg(long, env = "CHATLOG_RECONNECT_MAX_SECS", default_value_t = 60)]
    pub reconnect_max_secs: u64,

    /// Path to the SQLite database file
    #[arg(long, env = "CHATLOG_DB_PATH", default_value = "./data/chatlog.db")]
    pub db_path: PathBuf,

    /// Maximum number of outstanding store connections
    #[arg(long, env = "CHATLOG_POOL_SIZE", default_value_t = 5)]
    pub pool_size: u32,

    /// How long to wait for a pooled connection before giving up (ms)
    #[arg(long, env = "CHATLOG_POOL_TIMEOUT_MS", default_value_t = 5000)]
    pub pool_timeout_ms: u64,

    /// Nickname stored when an event carries none
    #[arg(long, env = "CHATLOG_DEFAULT_NICKNAME", default_value = "unknown sender")]
    pub default_nickname: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Pool settings derived from this configuration.
    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.pool_size,
            connection_timeout: Duration::from_millis(self.pool_timeout_ms),
        }
    }

    /// Broker settings derived from this configuration.
    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            topic: self.mqtt_topic.clone(),
            client_id: self.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            reconnect_max: Duration::from_secs(self.reconnect_max_secs.max(1)),
        }
    }

    /// Field normalization rules derived from this configuration.
    pub fn ingest_rules(&self) -> IngestRules {
        IngestRules {
            default_nickname: self.default_nickname.clone(),
            ..IngestRules::default()
        }
    }

    /// Create a loopback configuration for testing.
    pub fn test_config(db_path: PathBuf) -> Self {
        Self {
            http_host: "127.0.0.1".into(),
            http_port: 0, // Random port
            mqtt_host: "127.0.0.1".into(),
            db_path,
            pool_timeout_ms: 500,
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".into(),
            http_port: 8000,
            mqtt_host: "localhost".into(),
            mqtt_port: 1883,
            mqtt_topic: "chat/messages".into(),
            mqtt_client_id: "mqtt_logger".into(),
            mqtt_keep_alive_secs: 60,
            reconnect_max_secs: 60,
            db_path: PathBuf::from("./data/chatlog.db"),
            pool_size: 5,
            pool_timeout_ms: 5000,
            default_nickname: "unknown sender".into(),
            log_level: "info".into(),
            otel_endpoint: None,
        }
    }
}
