//! Proxy metrics path: Prometheus families to one snapshot per message

use crate::models::{MetricKind, MetricsSnapshot};
use crate::proto::envoy::{Metric, MetricFamily, MetricType, StreamMetricsMessage};

/// Address field of a sidecar node id (`type~address~pod.namespace~domain`)
pub fn node_address(node_id: &str) -> Option<&str> {
    node_id
        .split('~')
        .nth(1)
        .filter(|address| !address.is_empty())
}

fn kind_of(family: &MetricFamily) -> Option<MetricKind> {
    match MetricType::try_from(family.r#type).ok()? {
        MetricType::Counter => Some(MetricKind::Counter),
        MetricType::Gauge => Some(MetricKind::Gauge),
        MetricType::Histogram | MetricType::GaugeHistogram => Some(MetricKind::Histogram),
        MetricType::Summary => Some(MetricKind::Summary),
        MetricType::Untyped => None,
    }
}

fn sample_value(kind: MetricKind, metric: &Metric) -> Option<f64> {
    match kind {
        MetricKind::Counter => metric.counter.as_ref().map(|c| c.value),
        MetricKind::Gauge => metric.gauge.as_ref().map(|g| g.value),
        MetricKind::Histogram => metric.histogram.as_ref().map(|h| h.sample_count as f64),
        MetricKind::Summary => metric.summary.as_ref().map(|s| s.sample_count as f64),
    }
}

/// Sidecar address carried by the message. Envoy sends the identifier
/// only on the first message of a stream.
pub fn message_address(message: &StreamMetricsMessage) -> Option<&str> {
    message
        .identifier
        .as_ref()
        .and_then(|i| i.node.as_ref())
        .and_then(|n| node_address(&n.id))
}

/// Build the snapshot for one message, before identity enrichment.
/// When a family has several label sets the last one wins.
pub fn snapshot_from_message(
    message: &StreamMetricsMessage,
    address: &str,
    timestamp: i64,
) -> MetricsSnapshot {
    let mut snapshot = MetricsSnapshot {
        timestamp,
        address: address.to_string(),
        ..Default::default()
    };

    for family in &message.envoy_metrics {
        let Some(kind) = kind_of(family) else {
            continue;
        };
        for metric in &family.metric {
            if let Some(value) = sample_value(kind, metric) {
                snapshot.insert(kind, family.name.clone(), value);
            }
        }
    }
    snapshot
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::proto::envoy::{Counter, Gauge, Histogram, MetricsIdentifier, Node, Untyped};

    pub(crate) fn metrics_message(node_id: &str, families: Vec<MetricFamily>) -> StreamMetricsMessage {
        StreamMetricsMessage {
            identifier: Some(MetricsIdentifier {
                node: Some(Node {
                    id: node_id.into(),
                    cluster: "checkout.shop".into(),
                }),
            }),
            envoy_metrics: families,
        }
    }

    pub(crate) fn counter(name: &str, values: &[f64]) -> MetricFamily {
        MetricFamily {
            name: name.into(),
            help: String::new(),
            r#type: MetricType::Counter as i32,
            metric: values
                .iter()
                .map(|v| Metric {
                    counter: Some(Counter { value: *v }),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_node_address() {
        assert_eq!(
            node_address("sidecar~10.0.0.5~checkout-7d9f.shop~shop.svc.cluster.local"),
            Some("10.0.0.5")
        );
        assert_eq!(node_address("router~~gw.istio-system~local"), None);
        assert_eq!(node_address("plain-id"), None);
    }

    #[test]
    fn test_families_grouped_by_kind() {
        let message = metrics_message(
            "sidecar~10.0.0.5~checkout.shop~cluster.local",
            vec![
                counter("envoy_cluster_upstream_rq", &[3.0, 9.0]),
                MetricFamily {
                    name: "envoy_server_live".into(),
                    r#type: MetricType::Gauge as i32,
                    metric: vec![Metric {
                        gauge: Some(Gauge { value: 1.0 }),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                MetricFamily {
                    name: "envoy_cluster_upstream_rq_time".into(),
                    r#type: MetricType::Histogram as i32,
                    metric: vec![Metric {
                        histogram: Some(Histogram {
                            sample_count: 42,
                            sample_sum: 900.0,
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                MetricFamily {
                    name: "envoy_untyped".into(),
                    r#type: MetricType::Untyped as i32,
                    metric: vec![Metric {
                        untyped: Some(Untyped { value: 5.0 }),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
        );

        let address = message_address(&message).unwrap();
        let snapshot = snapshot_from_message(&message, address, 1_714_557_600);

        assert_eq!(snapshot.address, "10.0.0.5");
        assert_eq!(snapshot.timestamp, 1_714_557_600);
        assert_eq!(
            snapshot.get(MetricKind::Counter, "envoy_cluster_upstream_rq"),
            Some(9.0)
        );
        assert_eq!(snapshot.get(MetricKind::Gauge, "envoy_server_live"), Some(1.0));
        assert_eq!(
            snapshot.get(MetricKind::Histogram, "envoy_cluster_upstream_rq_time"),
            Some(42.0)
        );
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_message_without_identifier() {
        let message = StreamMetricsMessage {
            identifier: None,
            envoy_metrics: vec![counter("c", &[1.0])],
        };
        assert_eq!(message_address(&message), None);
        let snapshot = snapshot_from_message(&message, "10.0.0.5", 0);
        assert_eq!(snapshot.address, "10.0.0.5");
        assert_eq!(snapshot.len(), 1);
    }
}
