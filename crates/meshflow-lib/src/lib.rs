//! Mesh telemetry collector library
//!
//! This crate provides the core functionality for:
//! - Workload identity resolution from the cluster API
//! - OTLP and Envoy access-log / metrics ingestion
//! - Per-category dispatch to subscribers and the API classifier
//! - Subscriber fan-out with retries and usage aggregation
//! - Health checks and observability

pub mod classifier;
pub mod collector;
pub mod error;
pub mod exporter;
pub mod health;
pub mod identity;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod proto;
pub mod store;

pub use error::{Error, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{FlowMetrics, StructuredLogger};
