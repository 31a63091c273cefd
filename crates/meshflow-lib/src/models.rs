//! Canonical records shared by the collector, pipeline and exporter

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder namespace/name reported for addresses the cache does not know
pub const UNKNOWN: &str = "Unknown";

/// Kind of cluster resource an address resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkloadKind {
    Pod,
    Service,
    #[default]
    Unknown,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Service => "Service",
            WorkloadKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who owns an address: a pod, a service, or nobody we know of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadIdentity {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl WorkloadIdentity {
    pub fn unknown() -> Self {
        Self {
            kind: WorkloadKind::Unknown,
            namespace: UNKNOWN.to_string(),
            name: UNKNOWN.to_string(),
            labels: BTreeMap::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == WorkloadKind::Unknown
    }

    /// Labels rendered as sorted `k:v` pairs joined by `,`
    pub fn label_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for WorkloadIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

/// One side of an observed request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: String,
    pub identity: WorkloadIdentity,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: port.into(),
            identity: WorkloadIdentity::unknown(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.identity.namespace
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }
}

/// One observed API call between two workloads
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiLogRecord {
    /// Zero until the exporter assigns one
    pub sequence_id: u64,
    pub timestamp: String,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub protocol: String,
    pub method: String,
    pub path: String,
    pub response_code: i32,
}

/// Prometheus-style metric family type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "COUNTER",
            MetricKind::Gauge => "GAUGE",
            MetricKind::Histogram => "HISTOGRAM",
            MetricKind::Summary => "SUMMARY",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics reported by one proxy in one message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: i64,
    pub address: String,
    pub identity: WorkloadIdentity,
    pub metrics: BTreeMap<MetricKind, BTreeMap<String, f64>>,
}

impl MetricsSnapshot {
    pub fn insert(&mut self, kind: MetricKind, name: impl Into<String>, value: f64) {
        self.metrics.entry(kind).or_default().insert(name.into(), value);
    }

    pub fn get(&self, kind: MetricKind, name: &str) -> Option<f64> {
        self.metrics.get(&kind).and_then(|m| m.get(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-path invocation counts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiMetricsSnapshot {
    pub per_api_counts: BTreeMap<String, u64>,
}

/// Category of outbound stream a subscriber registers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordCategory {
    ApiLog,
    ApiMetrics,
    EnvoyMetrics,
}

impl RecordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCategory::ApiLog => "api_log",
            RecordCategory::ApiMetrics => "api_metrics",
            RecordCategory::EnvoyMetrics => "envoy_metrics",
        }
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_identity() {
        let identity = WorkloadIdentity::unknown();
        assert!(identity.is_unknown());
        assert_eq!(identity.namespace, "Unknown");
        assert_eq!(identity.name, "Unknown");
        assert!(identity.labels.is_empty());
        assert_eq!(identity.kind.to_string(), "Unknown");
    }

    #[test]
    fn test_label_string_is_sorted() {
        let mut identity = WorkloadIdentity::unknown();
        identity.labels.insert("version".into(), "v2".into());
        identity.labels.insert("app".into(), "checkout".into());

        assert_eq!(identity.label_string(), "app:checkout,version:v2");
    }

    #[test]
    fn test_metrics_snapshot_last_write_wins() {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.insert(MetricKind::Counter, "envoy_cluster_upstream_rq", 3.0);
        snapshot.insert(MetricKind::Counter, "envoy_cluster_upstream_rq", 7.0);
        snapshot.insert(MetricKind::Gauge, "envoy_server_live", 1.0);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get(MetricKind::Counter, "envoy_cluster_upstream_rq"),
            Some(7.0)
        );
        assert_eq!(snapshot.get(MetricKind::Summary, "missing"), None);
    }
}
