//! OpenTelemetry metrics for the ingestion pipeline.
//!
//! Key metrics:
//! - chatlog_messages_received_total: Payloads delivered by the broker
//! - chatlog_messages_persisted_total: Rows written to the store
//! - chatlog_messages_dropped_total: Payloads dropped, labeled by reason
//! - chatlog_store_latency_seconds: Store operation latency, labeled by op
//! - chatlog_query_total: Read API requests, labeled by outcome

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Chatlog metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Payloads received from the broker.
    pub received_total: Counter<u64>,
    /// Messages persisted to the store.
    pub persisted_total: Counter<u64>,
    /// Payloads dropped before or during persistence.
    pub dropped_total: Counter<u64>,
    /// Latency of store operations in seconds.
    pub store_latency: Histogram<f64>,
    /// Read API requests served.
    pub query_total: Counter<u64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            received_total: meter
                .u64_counter("chatlog_messages_received_total")
                .with_description("Payloads delivered by the broker")
                .with_unit("1")
                .init(),
            persisted_total: meter
                .u64_counter("chatlog_messages_persisted_total")
                .with_description("Chat messages written to the store")
                .with_unit("1")
                .init(),
            dropped_total: meter
                .u64_counter("chatlog_messages_dropped_total")
                .with_description("Payloads dropped, by reason")
                .with_unit("1")
                .init(),
            store_latency: meter
                .f64_histogram("chatlog_store_latency_seconds")
                .with_description("Latency of store operations including pool acquisition")
                .with_unit("s")
                .init(),
            query_total: meter
                .u64_counter("chatlog_query_total")
                .with_description("Recent-messages queries, by outcome")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_manual_reader();
                }
            }
        } else {
            // Metrics are recorded but not exported
            install_manual_reader();
        }

        let meter = global::meter("chatlog");
        Metrics::new(&meter)
    });
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Record a payload delivered by the broker.
pub fn record_received(topic: &str) {
    if let Some(m) = METRICS.get() {
        m.received_total
            .add(1, &[KeyValue::new("topic", topic.to_string())]);
    }
}

/// Record a successfully persisted message.
pub fn record_persisted() {
    if let Some(m) = METRICS.get() {
        m.persisted_total.add(1, &[]);
    }
}

/// Record a dropped payload with a short reason label.
pub fn record_dropped(reason: &'static str) {
    if let Some(m) = METRICS.get() {
        m.dropped_total.add(1, &[KeyValue::new("reason", reason)]);
    }
}

/// Record the latency of a store operation (`insert` or `select`).
pub fn record_store_latency(op: &'static str, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        m.store_latency
            .record(latency_seconds, &[KeyValue::new("op", op)]);
    }
}

/// Record a served query (`ok` or `fail_open`).
pub fn record_query(outcome: &'static str) {
    if let Some(m) = METRICS.get() {
        m.query_total.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}
