//! Pipeline: one dispatcher per record category between collector and exporter
//!
//! Queues are bounded, so a stalled exporter slows ingestion instead of
//! growing memory without limit.

use crate::classifier::ClassifierHandle;
use crate::error::{Error, Result};
use crate::exporter::Exporter;
use crate::models::{ApiLogRecord, MetricsSnapshot};
use crate::store::UsageStore;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of each category queue
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_depth: 1024 }
    }
}

/// Producer side, held by the collector
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    logs: mpsc::Sender<ApiLogRecord>,
    metrics: mpsc::Sender<MetricsSnapshot>,
}

impl PipelineHandle {
    /// Queue an API log, waiting while the queue is full
    pub async fn insert_api_log(&self, record: ApiLogRecord) -> Result<()> {
        self.logs
            .send(record)
            .await
            .map_err(|_| Error::PipelineClosed("api_log"))
    }

    /// Queue a metrics snapshot, waiting while the queue is full
    pub async fn insert_envoy_metrics(&self, snapshot: MetricsSnapshot) -> Result<()> {
        self.metrics
            .send(snapshot)
            .await
            .map_err(|_| Error::PipelineClosed("envoy_metrics"))
    }
}

/// Consumer side: owns the queues and runs the dispatchers
pub struct Pipeline {
    exporter: Exporter,
    classifier: Option<ClassifierHandle>,
    store: Option<Arc<dyn UsageStore>>,
    logs: mpsc::Receiver<ApiLogRecord>,
    metrics: mpsc::Receiver<MetricsSnapshot>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, exporter: Exporter) -> (Self, PipelineHandle) {
        let depth = config.queue_depth.max(1);
        let (logs_tx, logs_rx) = mpsc::channel(depth);
        let (metrics_tx, metrics_rx) = mpsc::channel(depth);

        let pipeline = Self {
            exporter,
            classifier: None,
            store: None,
            logs: logs_rx,
            metrics: metrics_rx,
        };
        let handle = PipelineHandle {
            logs: logs_tx,
            metrics: metrics_tx,
        };
        (pipeline, handle)
    }

    /// Also hand every API path to the classification service
    pub fn with_classifier(mut self, classifier: ClassifierHandle) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Also record every API log in the side-store
    pub fn with_store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run both dispatchers until shutdown or until every producer is gone
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        let Pipeline {
            exporter,
            classifier,
            store,
            logs,
            metrics,
        } = self;

        let log_dispatcher = ApiLogDispatcher {
            exporter: exporter.clone(),
            classifier,
            store,
        };

        info!("Starting pipeline dispatchers");
        tokio::join!(
            log_dispatcher.run(logs, shutdown.resubscribe()),
            run_metrics_dispatcher(exporter, metrics, shutdown),
        );
        info!("Pipeline dispatchers stopped");
    }
}

#[cfg(test)]
impl Pipeline {
    pub(crate) fn into_api_log_queue(self) -> mpsc::Receiver<ApiLogRecord> {
        self.logs
    }

    pub(crate) fn into_metrics_queue(self) -> mpsc::Receiver<MetricsSnapshot> {
        self.metrics
    }
}

struct ApiLogDispatcher {
    exporter: Exporter,
    classifier: Option<ClassifierHandle>,
    store: Option<Arc<dyn UsageStore>>,
}

impl ApiLogDispatcher {
    async fn run(
        self,
        mut queue: mpsc::Receiver<ApiLogRecord>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                record = queue.recv() => match record {
                    Some(record) => self.dispatch(record).await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        debug!("API log dispatcher stopped");
    }

    async fn dispatch(&self, record: ApiLogRecord) {
        let namespace = record.src.namespace().to_string();
        let labels = record.src.identity.label_string();

        self.exporter.update_usage(&namespace, &labels, &record.path);

        if let Some(classifier) = &self.classifier {
            if !classifier.submit(&record.path) {
                debug!(path = %record.path, "Classifier queue full, path skipped");
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.insert(&namespace, &labels, &record).await {
                warn!(error = %e, "Failed to store API log");
            }
        }

        let report = self.exporter.publish_api_log(record).await;
        if let Err(e) = report.into_result() {
            debug!(error = %e, "API log partially delivered");
        }
    }
}

async fn run_metrics_dispatcher(
    exporter: Exporter,
    mut queue: mpsc::Receiver<MetricsSnapshot>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            snapshot = queue.recv() => match snapshot {
                Some(snapshot) => {
                    let report = exporter.publish_envoy_metrics(snapshot).await;
                    if let Err(e) = report.into_result() {
                        debug!(error = %e, "Envoy metrics partially delivered");
                    }
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    debug!("Envoy metrics dispatcher stopped");
}
