//! Chatlog: chat message ingestion from an MQTT topic into SQLite.
//!
//! Every valid event published on the chat topic is persisted exactly once
//! from the pipeline's point of view (at-most-once delivery), and the most
//! recent messages are served over HTTP.
//!
//! # Architecture
//!
//! - **Subscriber**: MQTT link with subscribe-on-connect and reconnection
//! - **Dispatch**: pure decode/validate step followed by a persist step
//! - **Pooled storage**: bounded r2d2 pool over SQLite connections
//! - **Read API**: `GET /messages`, fail-open on store errors
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`observability`]: Metrics and tracing setup
//! - [`server`]: Composition root and lifecycle
//! - [`service`]: Query service and HTTP read API
//! - [`storage`]: Connection pool and message store
//! - [`subscriber`]: Broker client and per-message dispatch

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::sqlite::SqliteMessageStore is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::struct_excessive_bools,     // Config structs may have flags
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod observability;
pub mod server;
pub mod service;
pub mod storage;
pub mod subscriber;

/// Get the current Unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
