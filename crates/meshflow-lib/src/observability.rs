//! Observability infrastructure for the collector
//!
//! Provides:
//! - Prometheus metrics (ingestion, delivery, cache size, usage table size)
//! - Structured lifecycle logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

const BROADCAST_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5];

static GLOBAL_METRICS: OnceLock<FlowMetricsInner> = OnceLock::new();

struct FlowMetricsInner {
    records_ingested: IntCounterVec,
    text_segments_dropped: IntCounter,
    records_exported: IntCounterVec,
    broadcast_failures: IntCounterVec,
    broadcast_duration_seconds: HistogramVec,
    subscribers: IntGaugeVec,
    identity_entries: IntGaugeVec,
    watch_errors: IntCounterVec,
    usage_buckets: IntGauge,
    classifier_batches: IntCounter,
    classifier_connected: IntGauge,
}

impl FlowMetricsInner {
    fn new() -> Self {
        Self {
            records_ingested: register_int_counter_vec!(
                "meshflow_records_ingested_total",
                "Records accepted by the collector, by ingestion path",
                &["source"]
            )
            .expect("Failed to register records_ingested"),

            text_segments_dropped: register_int_counter!(
                "meshflow_text_segments_dropped_total",
                "Text-dump segments skipped for missing or short payloads"
            )
            .expect("Failed to register text_segments_dropped"),

            records_exported: register_int_counter_vec!(
                "meshflow_records_exported_total",
                "Records handed to subscribers, by stream category",
                &["category"]
            )
            .expect("Failed to register records_exported"),

            broadcast_failures: register_int_counter_vec!(
                "meshflow_broadcast_failures_total",
                "Subscriber deliveries that failed after all retries",
                &["category"]
            )
            .expect("Failed to register broadcast_failures"),

            broadcast_duration_seconds: register_histogram_vec!(
                "meshflow_broadcast_duration_seconds",
                "Time spent fanning one record out to all subscribers",
                &["category"],
                BROADCAST_BUCKETS.to_vec()
            )
            .expect("Failed to register broadcast_duration_seconds"),

            subscribers: register_int_gauge_vec!(
                "meshflow_subscribers",
                "Currently registered subscribers, by stream category",
                &["category"]
            )
            .expect("Failed to register subscribers"),

            identity_entries: register_int_gauge_vec!(
                "meshflow_identity_entries",
                "Addresses indexed by the identity cache",
                &["kind"]
            )
            .expect("Failed to register identity_entries"),

            watch_errors: register_int_counter_vec!(
                "meshflow_watch_errors_total",
                "Failed pod/service watch events",
                &["kind"]
            )
            .expect("Failed to register watch_errors"),

            usage_buckets: register_int_gauge!(
                "meshflow_usage_buckets",
                "Live buckets in the API usage aggregate"
            )
            .expect("Failed to register usage_buckets"),

            classifier_batches: register_int_counter!(
                "meshflow_classifier_batches_total",
                "Path batches sent to the classification service"
            )
            .expect("Failed to register classifier_batches"),

            classifier_connected: register_int_gauge!(
                "meshflow_classifier_connected",
                "1 while the classification stream is open"
            )
            .expect("Failed to register classifier_connected"),
        }
    }
}

/// Handle to the process-wide metrics. Clones share the same collectors.
#[derive(Clone)]
pub struct FlowMetrics {
    _private: (),
}

impl Default for FlowMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FlowMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FlowMetricsInner {
        GLOBAL_METRICS.get_or_init(FlowMetricsInner::new)
    }

    pub fn inc_records_ingested(&self, source: &str, count: u64) {
        self.inner()
            .records_ingested
            .with_label_values(&[source])
            .inc_by(count);
    }

    pub fn inc_segments_dropped(&self, count: u64) {
        self.inner().text_segments_dropped.inc_by(count);
    }

    pub fn inc_records_exported(&self, category: &str) {
        self.inner()
            .records_exported
            .with_label_values(&[category])
            .inc();
    }

    pub fn inc_broadcast_failures(&self, category: &str, count: u64) {
        self.inner()
            .broadcast_failures
            .with_label_values(&[category])
            .inc_by(count);
    }

    pub fn observe_broadcast(&self, category: &str, duration_secs: f64) {
        self.inner()
            .broadcast_duration_seconds
            .with_label_values(&[category])
            .observe(duration_secs);
    }

    pub fn set_subscribers(&self, category: &str, count: i64) {
        self.inner()
            .subscribers
            .with_label_values(&[category])
            .set(count);
    }

    pub fn set_identity_entries(&self, pods: i64, services: i64) {
        let gauge = &self.inner().identity_entries;
        gauge.with_label_values(&["Pod"]).set(pods);
        gauge.with_label_values(&["Service"]).set(services);
    }

    pub fn inc_watch_errors(&self, kind: &str) {
        self.inner().watch_errors.with_label_values(&[kind]).inc();
    }

    pub fn set_usage_buckets(&self, count: i64) {
        self.inner().usage_buckets.set(count);
    }

    pub fn inc_classifier_batches(&self) {
        self.inner().classifier_batches.inc();
    }

    pub fn set_classifier_connected(&self, connected: bool) {
        self.inner().classifier_connected.set(i64::from(connected));
    }
}

/// Lifecycle events with a fixed `event` field, for log-based alerting
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, collector_addr: &str, exporter_addr: &str) {
        info!(
            event = "collector_started",
            instance = %self.instance,
            version = %version,
            collector_addr = %collector_addr,
            exporter_addr = %exporter_addr,
            "MeshFlow started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            instance = %self.instance,
            reason = %reason,
            "MeshFlow shutting down"
        );
    }

    pub fn log_cache_seeded(&self, pods: usize, services: usize) {
        info!(
            event = "identity_cache_seeded",
            instance = %self.instance,
            pods = pods,
            services = services,
            "Identity cache ready"
        );
    }

    pub fn log_subscriber_connected(&self, category: &str, hostname: &str, ip_address: &str) {
        info!(
            event = "subscriber_connected",
            instance = %self.instance,
            category = %category,
            hostname = %hostname,
            ip_address = %ip_address,
            "Subscriber registered"
        );
    }

    pub fn log_subscriber_disconnected(&self, category: &str, hostname: &str, reason: &str) {
        info!(
            event = "subscriber_disconnected",
            instance = %self.instance,
            category = %category,
            hostname = %hostname,
            reason = %reason,
            "Subscriber removed"
        );
    }

    pub fn log_broadcast_failure(&self, category: &str, failed: usize, total: usize) {
        warn!(
            event = "broadcast_failed",
            instance = %self.instance,
            category = %category,
            failed = failed,
            total = total,
            "Unable to deliver record to every subscriber"
        );
    }

    pub fn log_classifier_status(&self, endpoint: &str, connected: bool) {
        if connected {
            info!(
                event = "classifier_connected",
                instance = %self.instance,
                endpoint = %endpoint,
                "Connected to classification service"
            );
        } else {
            warn!(
                event = "classifier_disconnected",
                instance = %self.instance,
                endpoint = %endpoint,
                "Classification service unavailable, dropping batches"
            );
        }
    }
}
