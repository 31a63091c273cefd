//! Client for the external API classification service
//!
//! Paths are batched and streamed to the classifier; its `path -> count`
//! answers are broadcast to API metrics subscribers. The classifier is
//! best-effort: while it is unreachable, paths are dropped.

use crate::exporter::Exporter;
use crate::health::{components, HealthRegistry};
use crate::models::ApiMetricsSnapshot;
use crate::observability::FlowMetrics;
use crate::proto::meshflow::{ApiClassifierClient, ApiClassifierRequest, ApiClassifierResponse};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

/// Classifier connection settings
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// `host:port` or full URI of the classification service
    pub endpoint: String,
    /// A batch is sent once it holds more than this many paths
    pub batch_size: usize,
    /// Wait between connection attempts
    pub reconnect_interval: Duration,
    /// Paths buffered between the pipeline and the classifier task
    pub queue_depth: usize,
}

impl ClassifierConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            batch_size: 5,
            reconnect_interval: Duration::from_secs(60),
            queue_depth: 1024,
        }
    }

    fn uri(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

/// Feeds paths to a running [`ApiClassifierTask`]
#[derive(Debug, Clone)]
pub struct ClassifierHandle {
    tx: mpsc::Sender<String>,
}

impl ClassifierHandle {
    /// Queue a path without waiting. Returns false when the queue is full or closed.
    pub fn submit(&self, path: &str) -> bool {
        self.tx.try_send(path.to_string()).is_ok()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Accumulates paths into request batches
#[derive(Debug, Default)]
struct Batcher {
    limit: usize,
    paths: Vec<String>,
}

impl Batcher {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            paths: Vec::new(),
        }
    }

    /// Add a path, returning a full batch once more than `limit` paths are held
    fn push(&mut self, path: String) -> Option<ApiClassifierRequest> {
        self.paths.push(path);
        if self.paths.len() > self.limit {
            Some(ApiClassifierRequest {
                api: std::mem::take(&mut self.paths),
            })
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.paths.clear();
    }
}

/// Long-lived task owning the classifier stream
pub struct ApiClassifierTask {
    config: ClassifierConfig,
    paths: mpsc::Receiver<String>,
    batcher: Batcher,
    exporter: Exporter,
    health: HealthRegistry,
    metrics: FlowMetrics,
}

impl ApiClassifierTask {
    pub fn new(
        config: ClassifierConfig,
        exporter: Exporter,
        health: HealthRegistry,
    ) -> (Self, ClassifierHandle) {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let task = Self {
            batcher: Batcher::new(config.batch_size),
            config,
            paths: rx,
            exporter,
            health,
            metrics: FlowMetrics::new(),
        };
        (task, ClassifierHandle { tx })
    }

    /// Connect, stream, and reconnect after failures until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(endpoint = %self.config.endpoint, "Starting API classifier client");

        loop {
            let end = match ApiClassifierClient::connect(self.config.uri()).await {
                Ok(client) => self.session(client, &mut shutdown).await,
                Err(e) => {
                    debug!(
                        endpoint = %self.config.endpoint,
                        error = %e,
                        "Classifier connect failed"
                    );
                    SessionEnd::Disconnected
                }
            };
            if end == SessionEnd::Shutdown {
                break;
            }

            self.mark_connected(false).await;
            if self.wait_for_retry(&mut shutdown).await == SessionEnd::Shutdown {
                break;
            }
        }

        self.metrics.set_classifier_connected(false);
        info!("API classifier client stopped");
    }

    async fn session(
        &mut self,
        mut client: ApiClassifierClient<Channel>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        let (requests, outbound) = mpsc::channel(self.config.queue_depth.max(1));
        let mut responses = match client.classify_apis(ReceiverStream::new(outbound)).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                warn!(error = %status, "Classifier refused the stream");
                return SessionEnd::Disconnected;
            }
        };
        self.mark_connected(true).await;
        self.batcher.clear();

        loop {
            tokio::select! {
                path = self.paths.recv() => {
                    let Some(path) = path else {
                        return SessionEnd::Shutdown;
                    };
                    if let Some(batch) = self.batcher.push(path) {
                        if requests.send(batch).await.is_err() {
                            return SessionEnd::Disconnected;
                        }
                        self.metrics.inc_classifier_batches();
                    }
                }
                message = responses.message() => {
                    if !self.handle_response(message).await {
                        return SessionEnd::Disconnected;
                    }
                }
                _ = shutdown.recv() => return SessionEnd::Shutdown,
            }
        }
    }

    /// Broadcast one classifier answer. Returns false once the stream is done.
    async fn handle_response(
        &self,
        message: Result<Option<ApiClassifierResponse>, tonic::Status>,
    ) -> bool {
        match message {
            Ok(Some(response)) => {
                if !response.apis.is_empty() {
                    self.exporter
                        .publish_api_metrics(ApiMetricsSnapshot {
                            per_api_counts: response.apis,
                        })
                        .await;
                }
                true
            }
            Ok(None) => {
                info!("Classifier closed the stream");
                false
            }
            Err(status) => {
                warn!(error = %status, "Classifier stream failed");
                false
            }
        }
    }

    /// Drop paths until the reconnect interval has passed
    async fn wait_for_retry(&mut self, shutdown: &mut broadcast::Receiver<()>) -> SessionEnd {
        let retry = tokio::time::sleep(self.config.reconnect_interval);
        tokio::pin!(retry);
        let mut dropped = 0u64;

        loop {
            tokio::select! {
                _ = &mut retry => break,
                path = self.paths.recv() => match path {
                    Some(_) => dropped += 1,
                    None => return SessionEnd::Shutdown,
                },
                _ = shutdown.recv() => return SessionEnd::Shutdown,
            }
        }

        if dropped > 0 {
            debug!(dropped = dropped, "Dropped paths while classifier was unavailable");
        }
        SessionEnd::Disconnected
    }

    async fn mark_connected(&self, connected: bool) {
        self.metrics.set_classifier_connected(connected);
        self.exporter
            .logger()
            .log_classifier_status(&self.config.endpoint, connected);
        if connected {
            self.health.set_healthy(components::CLASSIFIER).await;
        } else {
            self.health
                .set_degraded(components::CLASSIFIER, "classification service unreachable")
                .await;
        }
    }
}
