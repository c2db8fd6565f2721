//! Chatlog: persists chat messages from an MQTT topic and serves the latest ones.
//!
//! # Usage
//!
//! ```bash
//! chatlog --mqtt-host localhost --db-path ./data/chatlog.db --http-port 8000
//! ```
//!
//! Environment variables can also be used:
//! - `CHATLOG_MQTT_HOST` / `CHATLOG_MQTT_PORT`: Broker address
//! - `CHATLOG_DB_PATH`: SQLite database file
//! - `CHATLOG_HTTP_PORT`: Read API port
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use chatlog::config::Config;
use chatlog::observability::metrics::init_metrics_with_endpoint;
use chatlog::observability::tracing::init_tracing;
use chatlog::server::run_server;
use std::fs;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Chatlog v{} - MQTT chat logger

  Configuration:
    Broker:     {}:{} (topic {})
    Database:   {} (pool size {})
    Read API:   {}:{}
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.mqtt_host,
        config.mqtt_port,
        config.mqtt_topic,
        config.db_path.display(),
        config.pool_size,
        config.http_host,
        config.http_port,
        config.log_level
    );
}

/// Resolve when SIGINT or SIGTERM arrives.
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown...");
                    }
                }
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    }

    if let Err(e) = ctrl_c.await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, initiating shutdown...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    init_tracing(&config.log_level);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    // Ensure the database directory exists
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    print_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = run_server(config, shutdown_rx).await {
        tracing::error!(error = ?e, "Chatlog failed to start");
        return Err(e);
    }

    tracing::info!("Chatlog shutdown complete");
    Ok(())
}
