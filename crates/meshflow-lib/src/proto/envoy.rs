//! Envoy access-log (ALS) and metrics service subsets

use prost::Message;

// --- envoy.config.core.v3 ---

#[derive(Clone, PartialEq, Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub cluster: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SocketAddress {
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(uint32, tag = "3")]
    pub port_value: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Address {
    #[prost(message, optional, tag = "1")]
    pub socket_address: Option<SocketAddress>,
}

impl Address {
    pub fn socket(address: impl Into<String>, port_value: u32) -> Self {
        Self {
            socket_address: Some(SocketAddress {
                address: address.into(),
                port_value,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestMethod {
    MethodUnspecified = 0,
    Get = 1,
    Head = 2,
    Post = 3,
    Put = 4,
    Delete = 5,
    Connect = 6,
    Options = 7,
    Trace = 8,
    Patch = 9,
}

impl RequestMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RequestMethod::MethodUnspecified => "METHOD_UNSPECIFIED",
            RequestMethod::Get => "GET",
            RequestMethod::Head => "HEAD",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Connect => "CONNECT",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Trace => "TRACE",
            RequestMethod::Patch => "PATCH",
        }
    }
}

// --- envoy.data.accesslog.v3 ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HttpVersion {
    ProtocolUnspecified = 0,
    Http10 = 1,
    Http11 = 2,
    Http2 = 3,
    Http3 = 4,
}

impl HttpVersion {
    pub fn name(&self) -> &'static str {
        match self {
            HttpVersion::ProtocolUnspecified => "PROTOCOL_UNSPECIFIED",
            HttpVersion::Http10 => "HTTP10",
            HttpVersion::Http11 => "HTTP11",
            HttpVersion::Http2 => "HTTP2",
            HttpVersion::Http3 => "HTTP3",
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct AccessLogCommon {
    #[prost(message, optional, tag = "2")]
    pub downstream_remote_address: Option<Address>,
    #[prost(message, optional, tag = "5")]
    pub start_time: Option<prost_types::Timestamp>,
    #[prost(message, optional, tag = "13")]
    pub upstream_remote_address: Option<Address>,
    #[prost(string, tag = "15")]
    pub upstream_cluster: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct HttpRequestProperties {
    #[prost(enumeration = "RequestMethod", tag = "1")]
    pub request_method: i32,
    #[prost(string, tag = "2")]
    pub scheme: String,
    #[prost(string, tag = "3")]
    pub authority: String,
    #[prost(string, tag = "5")]
    pub path: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct HttpResponseProperties {
    #[prost(message, optional, tag = "1")]
    pub response_code: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HttpAccessLogEntry {
    #[prost(message, optional, tag = "1")]
    pub common_properties: Option<AccessLogCommon>,
    #[prost(enumeration = "HttpVersion", tag = "2")]
    pub protocol_version: i32,
    #[prost(message, optional, tag = "3")]
    pub request: Option<HttpRequestProperties>,
    #[prost(message, optional, tag = "4")]
    pub response: Option<HttpResponseProperties>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TcpAccessLogEntry {
    #[prost(message, optional, tag = "1")]
    pub common_properties: Option<AccessLogCommon>,
}

// --- envoy.service.accesslog.v3 ---

#[derive(Clone, PartialEq, Message)]
pub struct AccessLogIdentifier {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(string, tag = "2")]
    pub log_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct HttpAccessLogEntries {
    #[prost(message, repeated, tag = "1")]
    pub log_entry: Vec<HttpAccessLogEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TcpAccessLogEntries {
    #[prost(message, repeated, tag = "1")]
    pub log_entry: Vec<TcpAccessLogEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamAccessLogsMessage {
    #[prost(message, optional, tag = "1")]
    pub identifier: Option<AccessLogIdentifier>,
    #[prost(oneof = "stream_access_logs_message::LogEntries", tags = "2, 3")]
    pub log_entries: Option<stream_access_logs_message::LogEntries>,
}

pub mod stream_access_logs_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum LogEntries {
        #[prost(message, tag = "2")]
        HttpLogs(super::HttpAccessLogEntries),
        #[prost(message, tag = "3")]
        TcpLogs(super::TcpAccessLogEntries),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamAccessLogsResponse {}

// --- io.prometheus.client ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Counter = 0,
    Gauge = 1,
    Summary = 2,
    Untyped = 3,
    Histogram = 4,
    GaugeHistogram = 5,
}

#[derive(Clone, PartialEq, Message)]
pub struct LabelPair {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Gauge {
    #[prost(double, tag = "1")]
    pub value: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Counter {
    #[prost(double, tag = "1")]
    pub value: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Summary {
    #[prost(uint64, tag = "1")]
    pub sample_count: u64,
    #[prost(double, tag = "2")]
    pub sample_sum: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Untyped {
    #[prost(double, tag = "1")]
    pub value: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Histogram {
    #[prost(uint64, tag = "1")]
    pub sample_count: u64,
    #[prost(double, tag = "2")]
    pub sample_sum: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metric {
    #[prost(message, repeated, tag = "1")]
    pub label: Vec<LabelPair>,
    #[prost(message, optional, tag = "2")]
    pub gauge: Option<Gauge>,
    #[prost(message, optional, tag = "3")]
    pub counter: Option<Counter>,
    #[prost(message, optional, tag = "4")]
    pub summary: Option<Summary>,
    #[prost(message, optional, tag = "5")]
    pub untyped: Option<Untyped>,
    #[prost(int64, tag = "6")]
    pub timestamp_ms: i64,
    #[prost(message, optional, tag = "7")]
    pub histogram: Option<Histogram>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricFamily {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub help: String,
    #[prost(enumeration = "MetricType", tag = "3")]
    pub r#type: i32,
    #[prost(message, repeated, tag = "4")]
    pub metric: Vec<Metric>,
}

// --- envoy.service.metrics.v3 ---

#[derive(Clone, PartialEq, Message)]
pub struct MetricsIdentifier {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamMetricsMessage {
    #[prost(message, optional, tag = "1")]
    pub identifier: Option<MetricsIdentifier>,
    #[prost(message, repeated, tag = "2")]
    pub envoy_metrics: Vec<MetricFamily>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamMetricsResponse {}

pub mod access_log_service_server {
    use super::{StreamAccessLogsMessage, StreamAccessLogsResponse};
    use tonic::codegen::*;

    #[async_trait]
    pub trait AccessLogService: Send + Sync + 'static {
        async fn stream_access_logs(
            &self,
            request: tonic::Request<tonic::Streaming<StreamAccessLogsMessage>>,
        ) -> std::result::Result<tonic::Response<StreamAccessLogsResponse>, tonic::Status>;
    }

    pub struct AccessLogServiceServer<T: AccessLogService> {
        inner: Arc<T>,
    }

    impl<T: AccessLogService> AccessLogServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: AccessLogService> Clone for AccessLogServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T, B> Service<http::Request<B>> for AccessLogServiceServer<T>
    where
        T: AccessLogService,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/envoy.service.accesslog.v3.AccessLogService/StreamAccessLogs" => {
                    struct StreamAccessLogsSvc<T: AccessLogService>(Arc<T>);

                    impl<T: AccessLogService>
                        tonic::server::ClientStreamingService<StreamAccessLogsMessage>
                        for StreamAccessLogsSvc<T>
                    {
                        type Response = StreamAccessLogsResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<StreamAccessLogsMessage>>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { inner.stream_access_logs(request).await })
                        }
                    }

                    let inner = Arc::clone(&self.inner);
                    Box::pin(async move {
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.client_streaming(StreamAccessLogsSvc(inner), req).await)
                    })
                }
                _ => Box::pin(async move { Ok(crate::proto::unimplemented_response()) }),
            }
        }
    }

    impl<T: AccessLogService> tonic::server::NamedService for AccessLogServiceServer<T> {
        const NAME: &'static str = "envoy.service.accesslog.v3.AccessLogService";
    }
}

pub mod metrics_service_server {
    use super::{StreamMetricsMessage, StreamMetricsResponse};
    use tonic::codegen::*;

    #[async_trait]
    pub trait MetricsService: Send + Sync + 'static {
        async fn stream_metrics(
            &self,
            request: tonic::Request<tonic::Streaming<StreamMetricsMessage>>,
        ) -> std::result::Result<tonic::Response<StreamMetricsResponse>, tonic::Status>;
    }

    pub struct MetricsServiceServer<T: MetricsService> {
        inner: Arc<T>,
    }

    impl<T: MetricsService> MetricsServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: MetricsService> Clone for MetricsServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T, B> Service<http::Request<B>> for MetricsServiceServer<T>
    where
        T: MetricsService,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/envoy.service.metrics.v3.MetricsService/StreamMetrics" => {
                    struct StreamMetricsSvc<T: MetricsService>(Arc<T>);

                    impl<T: MetricsService>
                        tonic::server::ClientStreamingService<StreamMetricsMessage>
                        for StreamMetricsSvc<T>
                    {
                        type Response = StreamMetricsResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<StreamMetricsMessage>>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { inner.stream_metrics(request).await })
                        }
                    }

                    let inner = Arc::clone(&self.inner);
                    Box::pin(async move {
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.client_streaming(StreamMetricsSvc(inner), req).await)
                    })
                }
                _ => Box::pin(async move { Ok(crate::proto::unimplemented_response()) }),
            }
        }
    }

    impl<T: MetricsService> tonic::server::NamedService for MetricsServiceServer<T> {
        const NAME: &'static str = "envoy.service.metrics.v3.MetricsService";
    }
}

pub mod access_log_service_client {
    use super::{StreamAccessLogsMessage, StreamAccessLogsResponse};
    use tonic::codegen::*;

    /// Client side of the ALS stream, as a proxy would open it
    #[derive(Debug, Clone)]
    pub struct AccessLogServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl AccessLogServiceClient<tonic::transport::Channel> {
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> AccessLogServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self {
                inner: tonic::client::Grpc::new(inner),
            }
        }

        pub async fn stream_access_logs(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = StreamAccessLogsMessage>,
        ) -> Result<tonic::Response<StreamAccessLogsResponse>, tonic::Status> {
            self.inner.ready().await.map_err(crate::proto::not_ready)?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/envoy.service.accesslog.v3.AccessLogService/StreamAccessLogs",
            );
            self.inner
                .client_streaming(request.into_streaming_request(), path, codec)
                .await
        }
    }
}

pub use access_log_service_client::AccessLogServiceClient;
pub use access_log_service_server::{AccessLogService, AccessLogServiceServer};
pub use metrics_service_server::{MetricsService, MetricsServiceServer};
