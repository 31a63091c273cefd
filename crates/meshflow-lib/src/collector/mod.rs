//! Collector: ingestion endpoints that normalize, enrich, and queue records
//!
//! Three wire formats arrive here:
//! - OTLP log export, read through the legacy text-dump parser
//! - Envoy access-log streams, read field by field
//! - Envoy metrics streams, one snapshot per message
//!
//! Every endpoint acknowledges what it received. Malformed entries are
//! dropped and counted, never rejected back to the sender.

pub mod access_log;
pub mod envoy_metrics;
pub mod text_dump;

pub use text_dump::{Decoded, LogDecoder, TextDumpDecoder};

use crate::identity::IdentityCache;
use crate::models::{ApiLogRecord, MetricsSnapshot};
use crate::observability::FlowMetrics;
use crate::pipeline::PipelineHandle;
use crate::proto::envoy::{
    AccessLogService, AccessLogServiceServer, MetricsService, MetricsServiceServer,
    StreamAccessLogsMessage, StreamAccessLogsResponse, StreamMetricsMessage,
    StreamMetricsResponse,
};
use crate::proto::otlp::{
    ExportLogsServiceRequest, ExportLogsServiceResponse, LogsService, LogsServiceServer,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

const SOURCE_OTLP: &str = "otlp";
const SOURCE_ACCESS_LOG: &str = "access_log";
const SOURCE_METRICS: &str = "envoy_metrics";

/// Shared ingestion state. Clones serve all three endpoints.
#[derive(Clone)]
pub struct Collector {
    cache: IdentityCache,
    pipeline: PipelineHandle,
    decoder: Arc<dyn LogDecoder>,
    metrics: FlowMetrics,
}

impl Collector {
    pub fn new(cache: IdentityCache, pipeline: PipelineHandle) -> Self {
        Self::with_decoder(cache, pipeline, Arc::new(TextDumpDecoder))
    }

    /// Use a different decoder for OTLP export payloads
    pub fn with_decoder(
        cache: IdentityCache,
        pipeline: PipelineHandle,
        decoder: Arc<dyn LogDecoder>,
    ) -> Self {
        Self {
            cache,
            pipeline,
            decoder,
            metrics: FlowMetrics::new(),
        }
    }

    pub fn logs_server(&self) -> LogsServiceServer<Collector> {
        LogsServiceServer::new(self.clone())
    }

    pub fn access_log_server(&self) -> AccessLogServiceServer<Collector> {
        AccessLogServiceServer::new(self.clone())
    }

    pub fn metrics_server(&self) -> MetricsServiceServer<Collector> {
        MetricsServiceServer::new(self.clone())
    }

    /// Attach point-in-time identities for both ends of the call
    pub fn enrich(&self, mut record: ApiLogRecord) -> ApiLogRecord {
        record.src.identity = self.cache.lookup(&record.src.address);
        record.dst.identity = self.cache.lookup(&record.dst.address);
        record
    }

    fn enrich_snapshot(&self, mut snapshot: MetricsSnapshot) -> MetricsSnapshot {
        snapshot.identity = self.cache.lookup(&snapshot.address);
        snapshot
    }

    async fn forward_logs(&self, source: &str, records: Vec<ApiLogRecord>) -> Result<(), Status> {
        if records.is_empty() {
            return Ok(());
        }
        self.metrics
            .inc_records_ingested(source, records.len() as u64);

        for record in records {
            self.pipeline
                .insert_api_log(self.enrich(record))
                .await
                .map_err(|e| Status::unavailable(e.to_string()))?;
        }
        Ok(())
    }

    /// Decode, enrich, and queue one OTLP export payload
    pub async fn ingest_export(&self, request: &ExportLogsServiceRequest) -> Result<(), Status> {
        let decoded = self.decoder.decode(request);
        if decoded.dropped > 0 {
            debug!(dropped = decoded.dropped, "Skipped malformed log segments");
            self.metrics.inc_segments_dropped(decoded.dropped as u64);
        }
        self.forward_logs(SOURCE_OTLP, decoded.records).await
    }

    /// Drain an access-log stream until the sender closes it
    pub async fn ingest_access_logs<S>(&self, mut stream: S) -> Result<(), Status>
    where
        S: Stream<Item = Result<StreamAccessLogsMessage, Status>> + Unpin,
    {
        while let Some(message) = stream.next().await {
            let message = message.map_err(|status| {
                warn!(error = %status, "Access log stream failed");
                status
            })?;

            if let Some(node) = message.identifier.as_ref().and_then(|i| i.node.as_ref()) {
                debug!(node = %node.id, cluster = %node.cluster, "Access log batch");
            }
            let records = access_log::records_from_message(&message);
            self.forward_logs(SOURCE_ACCESS_LOG, records).await?;
        }
        Ok(())
    }

    /// Drain a metrics stream until the sender closes it.
    /// Messages without an identifier belong to the last node seen on the stream.
    pub async fn ingest_metrics<S>(&self, mut stream: S) -> Result<(), Status>
    where
        S: Stream<Item = Result<StreamMetricsMessage, Status>> + Unpin,
    {
        let mut stream_address: Option<String> = None;

        while let Some(message) = stream.next().await {
            let message = message.map_err(|status| {
                warn!(error = %status, "Metrics stream failed");
                status
            })?;

            if let Some(address) = envoy_metrics::message_address(&message) {
                stream_address = Some(address.to_string());
            }
            let Some(address) = stream_address.as_deref() else {
                debug!("Skipped metrics message from an unidentified node");
                continue;
            };

            let snapshot = envoy_metrics::snapshot_from_message(
                &message,
                address,
                chrono::Utc::now().timestamp(),
            );
            self.metrics.inc_records_ingested(SOURCE_METRICS, 1);
            self.pipeline
                .insert_envoy_metrics(self.enrich_snapshot(snapshot))
                .await
                .map_err(|e| Status::unavailable(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl LogsService for Collector {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        self.ingest_export(request.get_ref()).await?;
        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}

#[async_trait]
impl AccessLogService for Collector {
    async fn stream_access_logs(
        &self,
        request: Request<Streaming<StreamAccessLogsMessage>>,
    ) -> Result<Response<StreamAccessLogsResponse>, Status> {
        self.ingest_access_logs(request.into_inner()).await?;
        Ok(Response::new(StreamAccessLogsResponse {}))
    }
}

#[async_trait]
impl MetricsService for Collector {
    async fn stream_metrics(
        &self,
        request: Request<Streaming<StreamMetricsMessage>>,
    ) -> Result<Response<StreamMetricsResponse>, Status> {
        self.ingest_metrics(request.into_inner()).await?;
        Ok(Response::new(StreamMetricsResponse {}))
    }
}
