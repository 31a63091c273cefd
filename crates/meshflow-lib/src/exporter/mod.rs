//! Exporter: subscriber fan-out and the rolling API usage aggregate
//!
//! Three record categories are streamed to subscribers:
//! - API logs, one message per observed request
//! - API metrics, periodic path totals from the usage aggregate and the classifier
//! - Envoy metrics, one message per proxy metrics envelope

mod registry;
mod service;
mod usage;

pub use registry::{
    BroadcastReport, CloseReason, RecordSink, SinkError, SubscriberInfo, SubscriberRegistry,
    Subscription,
};
pub use service::{ExporterService, GrpcSink};
pub use usage::{ApiUsage, UsageBucket, UsageTable};

use crate::models::{ApiLogRecord, ApiMetricsSnapshot, MetricsSnapshot, RecordCategory};
use crate::observability::{FlowMetrics, StructuredLogger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Exporter tuning
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Queue depth behind each subscriber stream
    pub subscriber_buffer: usize,
    /// Longest a single delivery attempt may wait for queue space
    pub send_timeout: Duration,
    /// Delivery attempts per subscriber per record
    pub max_attempts: u32,
    /// How often the usage aggregate is summed and broadcast
    pub aggregation_period: Duration,
    /// How often stale usage buckets are swept
    pub cleanup_period: Duration,
    /// Age past which a usage bucket is evicted
    pub stale_after: Duration,
    /// Prune subscribers with no successful delivery for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            send_timeout: Duration::from_millis(500),
            max_attempts: 3,
            aggregation_period: Duration::from_secs(10),
            cleanup_period: Duration::from_secs(60),
            stale_after: Duration::from_secs(60),
            idle_timeout: None,
        }
    }
}

/// Monotonic record ids, seeded from the process start time
#[derive(Debug)]
pub struct SequenceGenerator {
    base: u64,
    counter: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_micros().max(1) as u64)
    }

    pub fn starting_at(base: u64) -> Self {
        Self {
            base,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.base + self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    config: ExporterConfig,
    sequence: SequenceGenerator,
    api_logs: Arc<SubscriberRegistry<ApiLogRecord>>,
    api_metrics: Arc<SubscriberRegistry<ApiMetricsSnapshot>>,
    envoy_metrics: Arc<SubscriberRegistry<MetricsSnapshot>>,
    usage: UsageTable,
    metrics: FlowMetrics,
    logger: StructuredLogger,
}

/// Shared exporter handle. Clones refer to the same subscriber lists and aggregate.
#[derive(Clone)]
pub struct Exporter {
    inner: Arc<Inner>,
}

impl Exporter {
    pub fn new(config: ExporterConfig, logger: StructuredLogger) -> Self {
        let attempts = config.max_attempts;
        Self {
            inner: Arc::new(Inner {
                sequence: SequenceGenerator::new(),
                api_logs: Arc::new(SubscriberRegistry::new(RecordCategory::ApiLog, attempts)),
                api_metrics: Arc::new(SubscriberRegistry::new(
                    RecordCategory::ApiMetrics,
                    attempts,
                )),
                envoy_metrics: Arc::new(SubscriberRegistry::new(
                    RecordCategory::EnvoyMetrics,
                    attempts,
                )),
                usage: UsageTable::new(),
                metrics: FlowMetrics::new(),
                logger,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.inner.config
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.inner.logger
    }

    /// Assign a sequence id if the record has none, then fan it out
    pub async fn publish_api_log(&self, mut record: ApiLogRecord) -> BroadcastReport {
        if record.sequence_id == 0 {
            record.sequence_id = self.inner.sequence.next();
        }
        let report = self.broadcast(&self.inner.api_logs, &record).await;
        debug!(
            sequence_id = record.sequence_id,
            delivered = report.attempted - report.failed,
            "API log broadcast"
        );
        report
    }

    pub async fn publish_api_metrics(&self, snapshot: ApiMetricsSnapshot) -> BroadcastReport {
        self.broadcast(&self.inner.api_metrics, &snapshot).await
    }

    pub async fn publish_envoy_metrics(&self, snapshot: MetricsSnapshot) -> BroadcastReport {
        self.broadcast(&self.inner.envoy_metrics, &snapshot).await
    }

    async fn broadcast<M: Send + Sync + 'static>(
        &self,
        registry: &SubscriberRegistry<M>,
        message: &M,
    ) -> BroadcastReport {
        let category = registry.category().as_str();
        let started = std::time::Instant::now();
        let report = registry.broadcast(message).await;
        self.inner
            .metrics
            .observe_broadcast(category, started.elapsed().as_secs_f64());

        if report.attempted > 0 {
            self.inner.metrics.inc_records_exported(category);
        }
        if !report.is_success() {
            self.inner
                .metrics
                .inc_broadcast_failures(category, report.failed as u64);
            self.inner
                .logger
                .log_broadcast_failure(category, report.failed, report.attempted);
        }
        report
    }

    /// Count one call of `path` by the workload identified by namespace and labels
    pub fn update_usage(&self, namespace: &str, labels: &str, path: &str) {
        self.inner.usage.update(namespace, labels, path);
        self.inner
            .metrics
            .set_usage_buckets(self.inner.usage.len() as i64);
    }

    pub fn usage(&self) -> &UsageTable {
        &self.inner.usage
    }

    /// Sum the aggregate per path and broadcast it. Nothing is sent when it is empty.
    pub async fn aggregate_and_emit(&self) -> Option<BroadcastReport> {
        let per_api_counts = self.inner.usage.totals();
        if per_api_counts.is_empty() {
            return None;
        }
        Some(
            self.publish_api_metrics(ApiMetricsSnapshot { per_api_counts })
                .await,
        )
    }

    /// Drop usage buckets older than `stale_after`
    pub fn evict_stale(&self) -> usize {
        let removed = self.inner.usage.evict_stale(self.inner.config.stale_after);
        self.inner
            .metrics
            .set_usage_buckets(self.inner.usage.len() as i64);
        if removed > 0 {
            debug!(removed = removed, "Evicted stale usage buckets");
        }
        removed
    }

    async fn prune_idle(&self, timeout: Duration) -> usize {
        self.inner.api_logs.prune_idle(timeout).await
            + self.inner.api_metrics.prune_idle(timeout).await
            + self.inner.envoy_metrics.prune_idle(timeout).await
    }

    pub async fn subscribe_api_logs(
        &self,
        info: SubscriberInfo,
        sink: Arc<dyn RecordSink<ApiLogRecord>>,
    ) -> Subscription<ApiLogRecord> {
        self.subscribe(&self.inner.api_logs, info, sink).await
    }

    pub async fn subscribe_api_metrics(
        &self,
        info: SubscriberInfo,
        sink: Arc<dyn RecordSink<ApiMetricsSnapshot>>,
    ) -> Subscription<ApiMetricsSnapshot> {
        self.subscribe(&self.inner.api_metrics, info, sink).await
    }

    pub async fn subscribe_envoy_metrics(
        &self,
        info: SubscriberInfo,
        sink: Arc<dyn RecordSink<MetricsSnapshot>>,
    ) -> Subscription<MetricsSnapshot> {
        self.subscribe(&self.inner.envoy_metrics, info, sink).await
    }

    async fn subscribe<M: Send + Sync + 'static>(
        &self,
        registry: &Arc<SubscriberRegistry<M>>,
        info: SubscriberInfo,
        sink: Arc<dyn RecordSink<M>>,
    ) -> Subscription<M> {
        self.inner.logger.log_subscriber_connected(
            registry.category().as_str(),
            &info.hostname,
            &info.ip_address,
        );
        registry.register(info, sink).await
    }

    pub async fn subscriber_count(&self, category: RecordCategory) -> usize {
        match category {
            RecordCategory::ApiLog => self.inner.api_logs.len().await,
            RecordCategory::ApiMetrics => self.inner.api_metrics.len().await,
            RecordCategory::EnvoyMetrics => self.inner.envoy_metrics.len().await,
        }
    }

    /// Release every subscriber's streaming call
    pub async fn close_all(&self, reason: CloseReason) {
        self.inner.api_logs.close_all(reason).await;
        self.inner.api_metrics.close_all(reason).await;
        self.inner.envoy_metrics.close_all(reason).await;
    }

    /// Periodic aggregation and eviction until shutdown
    pub async fn run_periodic(self, mut shutdown: broadcast::Receiver<()>) {
        let config = self.inner.config.clone();
        let mut aggregate_tick = interval_at(
            Instant::now() + config.aggregation_period,
            config.aggregation_period,
        );
        aggregate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_tick =
            interval_at(Instant::now() + config.cleanup_period, config.cleanup_period);
        cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            aggregation_period_secs = config.aggregation_period.as_secs(),
            cleanup_period_secs = config.cleanup_period.as_secs(),
            stale_after_secs = config.stale_after.as_secs(),
            "Starting exporter sweeps"
        );

        loop {
            tokio::select! {
                _ = aggregate_tick.tick() => {
                    self.aggregate_and_emit().await;
                }
                _ = cleanup_tick.tick() => {
                    self.evict_stale();
                    if let Some(timeout) = config.idle_timeout {
                        let pruned = self.prune_idle(timeout).await;
                        if pruned > 0 {
                            info!(pruned = pruned, "Pruned idle subscribers");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Exporter sweeps stopping");
                    self.close_all(CloseReason::Shutdown).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endpoint, WorkloadIdentity, WorkloadKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder<M> {
        received: Mutex<Vec<M>>,
    }

    #[async_trait]
    impl<M: Clone + Send + Sync> RecordSink<M> for Recorder<M> {
        async fn send(&self, message: &M) -> Result<(), SinkError> {
            self.received.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    impl<M: Clone> Recorder<M> {
        fn received(&self) -> Vec<M> {
            self.received.lock().unwrap().clone()
        }
    }

    fn exporter() -> Exporter {
        Exporter::new(ExporterConfig::default(), StructuredLogger::new("test"))
    }

    fn identity(kind: WorkloadKind, namespace: &str, name: &str) -> WorkloadIdentity {
        WorkloadIdentity {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            labels: Default::default(),
        }
    }

    fn cart_request() -> ApiLogRecord {
        let mut src = Endpoint::new("10.0.0.5", "8080");
        src.identity = identity(WorkloadKind::Pod, "shop", "checkout");
        let mut dst = Endpoint::new("10.0.0.9", "9090");
        dst.identity = identity(WorkloadKind::Service, "shop", "payments");

        ApiLogRecord {
            src,
            dst,
            method: "GET".into(),
            path: "/cart".into(),
            protocol: "HTTP11".into(),
            response_code: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_sequence_ids_increase() {
        let sequence = SequenceGenerator::starting_at(1_000);
        assert_eq!(sequence.next(), 1_000);
        assert_eq!(sequence.next(), 1_001);
        assert!(SequenceGenerator::new().next() > 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_one_copy_with_fresh_id() {
        let exporter = exporter();
        let first = Arc::new(Recorder::<ApiLogRecord>::default());
        let second = Arc::new(Recorder::<ApiLogRecord>::default());
        let _a = exporter
            .subscribe_api_logs(SubscriberInfo::new("a", "10.1.0.1"), first.clone())
            .await;
        let _b = exporter
            .subscribe_api_logs(SubscriberInfo::new("b", "10.1.0.2"), second.clone())
            .await;

        exporter.publish_api_log(cart_request()).await;
        exporter.publish_api_log(cart_request()).await;

        let got = first.received();
        assert_eq!(got.len(), 2);
        assert_eq!(second.received(), got);
        assert!(got[0].sequence_id > 0);
        assert!(got[1].sequence_id > got[0].sequence_id);
        assert_eq!(got[0].src.name(), "checkout");
        assert_eq!(got[0].dst.name(), "payments");
    }

    #[tokio::test]
    async fn test_existing_sequence_id_is_kept() {
        let exporter = exporter();
        let sink = Arc::new(Recorder::<ApiLogRecord>::default());
        let _s = exporter
            .subscribe_api_logs(SubscriberInfo::default(), sink.clone())
            .await;

        let mut record = cart_request();
        record.sequence_id = 7;
        exporter.publish_api_log(record).await;

        assert_eq!(sink.received()[0].sequence_id, 7);
    }

    #[tokio::test]
    async fn test_aggregate_skipped_when_empty() {
        let exporter = exporter();
        let sink = Arc::new(Recorder::<ApiMetricsSnapshot>::default());
        let _s = exporter
            .subscribe_api_metrics(SubscriberInfo::default(), sink.clone())
            .await;

        assert!(exporter.aggregate_and_emit().await.is_none());
        assert!(sink.received().is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_reports_usage_counts() {
        let exporter = exporter();
        let sink = Arc::new(Recorder::<ApiMetricsSnapshot>::default());
        let _s = exporter
            .subscribe_api_metrics(SubscriberInfo::default(), sink.clone())
            .await;

        for _ in 0..4 {
            exporter.update_usage("shop", "app:checkout", "/cart");
        }
        exporter.update_usage("shop", "app:web", "/cart");

        let report = exporter.aggregate_and_emit().await.unwrap();
        assert!(report.is_success());

        let snapshots = sink.received();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].per_api_counts.get("/cart"), Some(&5));
    }

    #[tokio::test]
    async fn test_recent_buckets_survive_eviction() {
        let exporter = exporter();
        exporter.update_usage("shop", "app:checkout", "/cart");

        assert_eq!(exporter.evict_stale(), 0);
        assert_eq!(exporter.usage().len(), 1);
    }

    #[tokio::test]
    async fn test_envoy_metrics_reach_only_their_category() {
        let exporter = exporter();
        let logs = Arc::new(Recorder::<ApiLogRecord>::default());
        let metrics = Arc::new(Recorder::<MetricsSnapshot>::default());
        let _l = exporter
            .subscribe_api_logs(SubscriberInfo::default(), logs.clone())
            .await;
        let _m = exporter
            .subscribe_envoy_metrics(SubscriberInfo::default(), metrics.clone())
            .await;

        exporter
            .publish_envoy_metrics(MetricsSnapshot::default())
            .await;

        assert_eq!(metrics.received().len(), 1);
        assert!(logs.received().is_empty());
        assert_eq!(exporter.subscriber_count(RecordCategory::EnvoyMetrics).await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_subscribers() {
        let exporter = exporter();
        let subscription = exporter
            .subscribe_api_logs(
                SubscriberInfo::default(),
                Arc::new(Recorder::<ApiLogRecord>::default()),
            )
            .await;

        let (tx, rx) = broadcast::channel(1);
        let sweeps = tokio::spawn(exporter.clone().run_periodic(rx));
        tx.send(()).unwrap();

        assert_eq!(subscription.wait().await, CloseReason::Shutdown);
        sweeps.await.unwrap();
        assert_eq!(exporter.subscriber_count(RecordCategory::ApiLog).await, 0);
    }
}
