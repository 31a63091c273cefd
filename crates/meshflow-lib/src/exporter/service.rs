//! `meshflow.v1.MeshFlow` server: each call registers a subscriber and streams to it

use super::{Exporter, RecordSink, SinkError, SubscriberInfo, Subscription};
use crate::models::{ApiLogRecord, ApiMetricsSnapshot, MetricsSnapshot, RecordCategory};
use crate::proto::meshflow::{
    ApiLog, ApiMetrics, ClientInfo, EnvoyMetrics, MeshFlow, MetricValue,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

/// Delivers records into a bounded gRPC response channel
pub struct GrpcSink<P> {
    tx: mpsc::Sender<Result<P, Status>>,
    timeout: Duration,
}

impl<P> GrpcSink<P> {
    pub fn new(tx: mpsc::Sender<Result<P, Status>>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }
}

#[async_trait]
impl<M, P> RecordSink<M> for GrpcSink<P>
where
    M: Sync,
    P: for<'a> From<&'a M> + Send + 'static,
{
    async fn send(&self, message: &M) -> Result<(), SinkError> {
        match self.tx.send_timeout(Ok(P::from(message)), self.timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::Timeout(self.timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

impl From<&ApiLogRecord> for ApiLog {
    fn from(record: &ApiLogRecord) -> Self {
        ApiLog {
            id: record.sequence_id,
            time_stamp: record.timestamp.clone(),
            src_namespace: record.src.identity.namespace.clone(),
            src_name: record.src.identity.name.clone(),
            src_label: record.src.identity.labels.clone(),
            src_ip: record.src.address.clone(),
            src_port: record.src.port.clone(),
            src_type: record.src.identity.kind.to_string(),
            dst_namespace: record.dst.identity.namespace.clone(),
            dst_name: record.dst.identity.name.clone(),
            dst_label: record.dst.identity.labels.clone(),
            dst_ip: record.dst.address.clone(),
            dst_port: record.dst.port.clone(),
            dst_type: record.dst.identity.kind.to_string(),
            protocol: record.protocol.clone(),
            method: record.method.clone(),
            path: record.path.clone(),
            response_code: record.response_code,
        }
    }
}

impl From<&ApiMetricsSnapshot> for ApiMetrics {
    fn from(snapshot: &ApiMetricsSnapshot) -> Self {
        ApiMetrics {
            per_api_counts: snapshot.per_api_counts.clone(),
        }
    }
}

impl From<&MetricsSnapshot> for EnvoyMetrics {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        EnvoyMetrics {
            time_stamp: snapshot.timestamp.to_string(),
            namespace: snapshot.identity.namespace.clone(),
            name: snapshot.identity.name.clone(),
            ip_address: snapshot.address.clone(),
            labels: snapshot.identity.labels.clone(),
            metrics: snapshot
                .metrics
                .iter()
                .map(|(kind, values)| {
                    (
                        kind.to_string(),
                        MetricValue {
                            value: values.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// gRPC front for the exporter's subscriber lists
#[derive(Clone)]
pub struct ExporterService {
    exporter: Exporter,
}

impl ExporterService {
    pub fn new(exporter: Exporter) -> Self {
        Self { exporter }
    }

    fn channel<P>(&self) -> (GrpcSink<P>, ReceiverStream<Result<P, Status>>) {
        let config = self.exporter.config();
        let (tx, rx) = mpsc::channel(config.subscriber_buffer.max(1));
        (
            GrpcSink::new(tx, config.send_timeout),
            ReceiverStream::new(rx),
        )
    }

    /// Keep the registration alive until the stream ends, off the request path
    fn park<M>(&self, subscription: Subscription<M>, category: RecordCategory)
    where
        M: Send + Sync + 'static,
    {
        let logger = self.exporter.logger().clone();
        tokio::spawn(async move {
            let hostname = subscription.info().hostname.clone();
            let reason = subscription.wait().await;
            logger.log_subscriber_disconnected(
                category.as_str(),
                &hostname,
                &reason.to_string(),
            );
        });
    }
}

fn subscriber_info(request: Request<ClientInfo>) -> SubscriberInfo {
    let peer = request.remote_addr();
    let client = request.into_inner();
    let ip_address = if client.ip_address.is_empty() {
        peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
    } else {
        client.ip_address
    };
    SubscriberInfo::new(client.hostname, ip_address)
}

#[async_trait]
impl MeshFlow for ExporterService {
    type GetApiLogStream = ReceiverStream<Result<ApiLog, Status>>;
    type GetApiMetricsStream = ReceiverStream<Result<ApiMetrics, Status>>;
    type GetEnvoyMetricsStream = ReceiverStream<Result<EnvoyMetrics, Status>>;

    async fn get_api_log(
        &self,
        request: Request<ClientInfo>,
    ) -> Result<Response<Self::GetApiLogStream>, Status> {
        let info = subscriber_info(request);
        let (sink, stream) = self.channel::<ApiLog>();
        let subscription = self
            .exporter
            .subscribe_api_logs(info, Arc::new(sink))
            .await;
        self.park(subscription, RecordCategory::ApiLog);
        Ok(Response::new(stream))
    }

    async fn get_api_metrics(
        &self,
        request: Request<ClientInfo>,
    ) -> Result<Response<Self::GetApiMetricsStream>, Status> {
        let info = subscriber_info(request);
        let (sink, stream) = self.channel::<ApiMetrics>();
        let subscription = self
            .exporter
            .subscribe_api_metrics(info, Arc::new(sink))
            .await;
        self.park(subscription, RecordCategory::ApiMetrics);
        Ok(Response::new(stream))
    }

    async fn get_envoy_metrics(
        &self,
        request: Request<ClientInfo>,
    ) -> Result<Response<Self::GetEnvoyMetricsStream>, Status> {
        let info = subscriber_info(request);
        let (sink, stream) = self.channel::<EnvoyMetrics>();
        let subscription = self
            .exporter
            .subscribe_envoy_metrics(info, Arc::new(sink))
            .await;
        self.park(subscription, RecordCategory::EnvoyMetrics);
        Ok(Response::new(stream))
    }
}
