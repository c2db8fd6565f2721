//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via `tracing-subscriber`
//! - OpenTelemetry metrics for ingestion and reads

pub mod metrics;
pub mod tracing;
