//! Wire types and gRPC service glue
//!
//! Messages are hand-written prost structs covering the subset of each
//! upstream schema we read. Field tags match the published protos, so
//! unknown fields sent by real proxies are skipped on decode.
//!
//! - `otlp`: OpenTelemetry logs export
//! - `envoy`: Envoy access-log and metrics streaming services
//! - `meshflow`: our outbound subscriber service and the classifier client

pub mod envoy;
pub mod meshflow;
pub mod otlp;

use tonic::codegen::http;

/// gRPC `UNIMPLEMENTED` response for unknown method paths
pub(crate) fn unimplemented_response() -> http::Response<tonic::body::BoxBody> {
    let mut response = http::Response::new(tonic::codegen::empty_body());
    let headers = response.headers_mut();
    headers.insert("grpc-status", http::HeaderValue::from_static("12"));
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/grpc"),
    );
    response
}

/// Status used when a client's channel is not ready for a new call
pub(crate) fn not_ready(e: impl Into<tonic::codegen::StdError>) -> tonic::Status {
    tonic::Status::new(
        tonic::Code::Unknown,
        format!("Service was not ready: {}", e.into()),
    )
}
