//! `meshflow.v1`: subscriber streams and the API classification service

use prost::Message;
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, Message)]
pub struct ClientInfo {
    #[prost(string, tag = "1")]
    pub hostname: String,
    #[prost(string, tag = "2")]
    pub ip_address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApiLog {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub time_stamp: String,
    #[prost(string, tag = "3")]
    pub src_namespace: String,
    #[prost(string, tag = "4")]
    pub src_name: String,
    #[prost(btree_map = "string, string", tag = "5")]
    pub src_label: BTreeMap<String, String>,
    #[prost(string, tag = "6")]
    pub src_ip: String,
    #[prost(string, tag = "7")]
    pub src_port: String,
    #[prost(string, tag = "8")]
    pub src_type: String,
    #[prost(string, tag = "9")]
    pub dst_namespace: String,
    #[prost(string, tag = "10")]
    pub dst_name: String,
    #[prost(btree_map = "string, string", tag = "11")]
    pub dst_label: BTreeMap<String, String>,
    #[prost(string, tag = "12")]
    pub dst_ip: String,
    #[prost(string, tag = "13")]
    pub dst_port: String,
    #[prost(string, tag = "14")]
    pub dst_type: String,
    #[prost(string, tag = "15")]
    pub protocol: String,
    #[prost(string, tag = "16")]
    pub method: String,
    #[prost(string, tag = "17")]
    pub path: String,
    #[prost(int32, tag = "18")]
    pub response_code: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApiMetrics {
    #[prost(btree_map = "string, uint64", tag = "1")]
    pub per_api_counts: BTreeMap<String, u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricValue {
    #[prost(btree_map = "string, double", tag = "1")]
    pub value: BTreeMap<String, f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EnvoyMetrics {
    #[prost(string, tag = "1")]
    pub time_stamp: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub ip_address: String,
    #[prost(btree_map = "string, string", tag = "5")]
    pub labels: BTreeMap<String, String>,
    #[prost(btree_map = "string, message", tag = "6")]
    pub metrics: BTreeMap<String, MetricValue>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApiClassifierRequest {
    #[prost(string, repeated, tag = "1")]
    pub api: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApiClassifierResponse {
    #[prost(btree_map = "string, uint64", tag = "1")]
    pub apis: BTreeMap<String, u64>,
}

pub mod mesh_flow_server {
    use super::{ApiLog, ApiMetrics, ClientInfo, EnvoyMetrics};
    use ::tokio_stream::Stream;
    use tonic::codegen::*;

    #[async_trait]
    pub trait MeshFlow: Send + Sync + 'static {
        type GetApiLogStream: Stream<Item = Result<ApiLog, tonic::Status>> + Send + 'static;
        type GetApiMetricsStream: Stream<Item = Result<ApiMetrics, tonic::Status>> + Send + 'static;
        type GetEnvoyMetricsStream: Stream<Item = Result<EnvoyMetrics, tonic::Status>>
            + Send
            + 'static;

        async fn get_api_log(
            &self,
            request: tonic::Request<ClientInfo>,
        ) -> Result<tonic::Response<Self::GetApiLogStream>, tonic::Status>;

        async fn get_api_metrics(
            &self,
            request: tonic::Request<ClientInfo>,
        ) -> Result<tonic::Response<Self::GetApiMetricsStream>, tonic::Status>;

        async fn get_envoy_metrics(
            &self,
            request: tonic::Request<ClientInfo>,
        ) -> Result<tonic::Response<Self::GetEnvoyMetricsStream>, tonic::Status>;
    }

    pub struct MeshFlowServer<T: MeshFlow> {
        inner: Arc<T>,
    }

    impl<T: MeshFlow> MeshFlowServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: MeshFlow> Clone for MeshFlowServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    struct GetApiLogSvc<T: MeshFlow>(Arc<T>);

    impl<T: MeshFlow> tonic::server::ServerStreamingService<ClientInfo> for GetApiLogSvc<T> {
        type Response = ApiLog;
        type ResponseStream = T::GetApiLogStream;
        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<ClientInfo>) -> Self::Future {
            let inner = Arc::clone(&self.0);
            Box::pin(async move { inner.get_api_log(request).await })
        }
    }

    struct GetApiMetricsSvc<T: MeshFlow>(Arc<T>);

    impl<T: MeshFlow> tonic::server::ServerStreamingService<ClientInfo> for GetApiMetricsSvc<T> {
        type Response = ApiMetrics;
        type ResponseStream = T::GetApiMetricsStream;
        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<ClientInfo>) -> Self::Future {
            let inner = Arc::clone(&self.0);
            Box::pin(async move { inner.get_api_metrics(request).await })
        }
    }

    struct GetEnvoyMetricsSvc<T: MeshFlow>(Arc<T>);

    impl<T: MeshFlow> tonic::server::ServerStreamingService<ClientInfo> for GetEnvoyMetricsSvc<T> {
        type Response = EnvoyMetrics;
        type ResponseStream = T::GetEnvoyMetricsStream;
        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<ClientInfo>) -> Self::Future {
            let inner = Arc::clone(&self.0);
            Box::pin(async move { inner.get_envoy_metrics(request).await })
        }
    }

    impl<T, B> Service<http::Request<B>> for MeshFlowServer<T>
    where
        T: MeshFlow,
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
            let inner = Arc::clone(&self.inner);
            match req.uri().path() {
                "/meshflow.v1.MeshFlow/GetAPILog" => Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.server_streaming(GetApiLogSvc(inner), req).await)
                }),
                "/meshflow.v1.MeshFlow/GetAPIMetrics" => Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.server_streaming(GetApiMetricsSvc(inner), req).await)
                }),
                "/meshflow.v1.MeshFlow/GetEnvoyMetrics" => Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.server_streaming(GetEnvoyMetricsSvc(inner), req).await)
                }),
                _ => Box::pin(async move { Ok(crate::proto::unimplemented_response()) }),
            }
        }
    }

    impl<T: MeshFlow> tonic::server::NamedService for MeshFlowServer<T> {
        const NAME: &'static str = "meshflow.v1.MeshFlow";
    }
}

pub mod mesh_flow_client {
    use super::{ApiLog, ApiMetrics, ClientInfo, EnvoyMetrics};
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct MeshFlowClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl MeshFlowClient<tonic::transport::Channel> {
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> MeshFlowClient<T>
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

        pub async fn get_api_log(
            &mut self,
            request: impl tonic::IntoRequest<ClientInfo>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<ApiLog>>, tonic::Status> {
            self.inner.ready().await.map_err(crate::proto::not_ready)?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/meshflow.v1.MeshFlow/GetAPILog");
            self.inner
                .server_streaming(request.into_request(), path, codec)
                .await
        }

        pub async fn get_api_metrics(
            &mut self,
            request: impl tonic::IntoRequest<ClientInfo>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<ApiMetrics>>, tonic::Status> {
            self.inner.ready().await.map_err(crate::proto::not_ready)?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meshflow.v1.MeshFlow/GetAPIMetrics");
            self.inner
                .server_streaming(request.into_request(), path, codec)
                .await
        }

        pub async fn get_envoy_metrics(
            &mut self,
            request: impl tonic::IntoRequest<ClientInfo>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<EnvoyMetrics>>, tonic::Status> {
            self.inner.ready().await.map_err(crate::proto::not_ready)?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meshflow.v1.MeshFlow/GetEnvoyMetrics");
            self.inner
                .server_streaming(request.into_request(), path, codec)
                .await
        }
    }
}

pub mod api_classifier_client {
    use super::{ApiClassifierRequest, ApiClassifierResponse};
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct ApiClassifierClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl ApiClassifierClient<tonic::transport::Channel> {
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> ApiClassifierClient<T>
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

        pub async fn classify_apis(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = ApiClassifierRequest>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<ApiClassifierResponse>>, tonic::Status>
        {
            self.inner.ready().await.map_err(crate::proto::not_ready)?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meshflow.v1.APIClassifier/ClassifyAPIs");
            self.inner
                .streaming(request.into_streaming_request(), path, codec)
                .await
        }
    }
}

pub mod api_classifier_server {
    use super::{ApiClassifierRequest, ApiClassifierResponse};
    use ::tokio_stream::Stream;
    use tonic::codegen::*;

    /// Server side of the classifier, for embedding a classifier in-process
    #[async_trait]
    pub trait ApiClassifier: Send + Sync + 'static {
        type ClassifyApisStream: Stream<Item = Result<ApiClassifierResponse, tonic::Status>>
            + Send
            + 'static;

        async fn classify_apis(
            &self,
            request: tonic::Request<tonic::Streaming<ApiClassifierRequest>>,
        ) -> Result<tonic::Response<Self::ClassifyApisStream>, tonic::Status>;
    }

    pub struct ApiClassifierServer<T: ApiClassifier> {
        inner: Arc<T>,
    }

    impl<T: ApiClassifier> ApiClassifierServer<T> {
        pub fn new(inner: T) -> Self {
            Self {
                inner: Arc::new(inner),
            }
        }
    }

    impl<T: ApiClassifier> Clone for ApiClassifierServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    struct ClassifyApisSvc<T: ApiClassifier>(Arc<T>);

    impl<T: ApiClassifier> tonic::server::StreamingService<ApiClassifierRequest>
        for ClassifyApisSvc<T>
    {
        type Response = ApiClassifierResponse;
        type ResponseStream = T::ClassifyApisStream;
        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

        fn call(
            &mut self,
            request: tonic::Request<tonic::Streaming<ApiClassifierRequest>>,
        ) -> Self::Future {
            let inner = Arc::clone(&self.0);
            Box::pin(async move { inner.classify_apis(request).await })
        }
    }

    impl<T, B> Service<http::Request<B>> for ApiClassifierServer<T>
    where
        T: ApiClassifier,
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
            let inner = Arc::clone(&self.inner);
            match req.uri().path() {
                "/meshflow.v1.APIClassifier/ClassifyAPIs" => Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.streaming(ClassifyApisSvc(inner), req).await)
                }),
                _ => Box::pin(async move { Ok(crate::proto::unimplemented_response()) }),
            }
        }
    }

    impl<T: ApiClassifier> tonic::server::NamedService for ApiClassifierServer<T> {
        const NAME: &'static str = "meshflow.v1.APIClassifier";
    }
}

pub use api_classifier_client::ApiClassifierClient;
pub use api_classifier_server::{ApiClassifier, ApiClassifierServer};
pub use mesh_flow_client::MeshFlowClient;
pub use mesh_flow_server::{MeshFlow, MeshFlowServer};
