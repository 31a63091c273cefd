//! Collector configuration

use anyhow::{ensure, Context, Result};
use meshflow_lib::{
    classifier::ClassifierConfig, exporter::ExporterConfig, pipeline::PipelineConfig,
};
use serde::Deserialize;
use std::time::Duration;

/// Collector configuration, read from `MESHFLOW_*` variables and an optional file
#[derive(Debug, Clone, Deserialize)]
pub struct MeshFlowConfig {
    /// Instance name attached to lifecycle events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Listen address for OTLP and Envoy ingestion
    #[serde(default = "default_collector_addr")]
    pub collector_addr: String,

    /// Listen address for subscriber streams
    #[serde(default = "default_exporter_addr")]
    pub exporter_addr: String,

    /// Port for health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_aggregation_period")]
    pub aggregation_period_secs: u64,

    #[serde(default = "default_cleanup_period")]
    pub cleanup_period_secs: u64,

    /// Falls back to `cleanup_period_secs`
    #[serde(default)]
    pub stale_after_secs: Option<u64>,

    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    #[serde(default)]
    pub subscriber_idle_timeout_secs: Option<u64>,

    /// Classification service; the classifier is off when unset
    #[serde(default)]
    pub ai_engine_addr: Option<String>,

    #[serde(default = "default_ai_batch_size")]
    pub ai_batch_size: usize,

    #[serde(default = "default_ai_reconnect_interval")]
    pub ai_reconnect_interval_secs: u64,

    #[serde(default = "default_store_clear_interval")]
    pub store_clear_interval_secs: u64,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "meshflow".to_string())
}

fn default_collector_addr() -> String {
    "0.0.0.0:4317".to_string()
}

fn default_exporter_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_api_port() -> u16 {
    9090
}

fn default_queue_depth() -> usize {
    1024
}

fn default_aggregation_period() -> u64 {
    10
}

fn default_cleanup_period() -> u64 {
    60
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_send_timeout() -> u64 {
    500
}

fn default_ai_batch_size() -> usize {
    5
}

fn default_ai_reconnect_interval() -> u64 {
    60
}

fn default_store_clear_interval() -> u64 {
    600
}

impl Default for MeshFlowConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            collector_addr: default_collector_addr(),
            exporter_addr: default_exporter_addr(),
            api_port: default_api_port(),
            queue_depth: default_queue_depth(),
            aggregation_period_secs: default_aggregation_period(),
            cleanup_period_secs: default_cleanup_period(),
            stale_after_secs: None,
            subscriber_buffer: default_subscriber_buffer(),
            send_timeout_ms: default_send_timeout(),
            subscriber_idle_timeout_secs: None,
            ai_engine_addr: None,
            ai_batch_size: default_ai_batch_size(),
            ai_reconnect_interval_secs: default_ai_reconnect_interval(),
            store_clear_interval_secs: default_store_clear_interval(),
        }
    }
}

impl MeshFlowConfig {
    /// Load configuration from environment and an optional config file
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("MESHFLOW_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("MESHFLOW"))
            .build()
            .context("failed to read configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Periods drive `tokio::time::interval` and sizes drive bounded channels; neither accepts zero
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("aggregation_period_secs", self.aggregation_period_secs),
            ("cleanup_period_secs", self.cleanup_period_secs),
            ("store_clear_interval_secs", self.store_clear_interval_secs),
            ("ai_reconnect_interval_secs", self.ai_reconnect_interval_secs),
        ];
        for (key, secs) in periods {
            ensure!(secs > 0, "{key} must be at least 1 second");
        }
        ensure!(
            self.subscriber_idle_timeout_secs != Some(0),
            "subscriber_idle_timeout_secs must be at least 1 second when set"
        );
        ensure!(self.queue_depth > 0, "queue_depth must be greater than 0");
        ensure!(
            self.subscriber_buffer > 0,
            "subscriber_buffer must be greater than 0"
        );
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            queue_depth: self.queue_depth,
        }
    }

    pub fn exporter(&self) -> ExporterConfig {
        let cleanup_period = Duration::from_secs(self.cleanup_period_secs);
        ExporterConfig {
            subscriber_buffer: self.subscriber_buffer,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            aggregation_period: Duration::from_secs(self.aggregation_period_secs),
            cleanup_period,
            stale_after: self
                .stale_after_secs
                .map(Duration::from_secs)
                .unwrap_or(cleanup_period),
            idle_timeout: self.subscriber_idle_timeout_secs.map(Duration::from_secs),
            ..ExporterConfig::default()
        }
    }

    pub fn classifier(&self) -> Option<ClassifierConfig> {
        let endpoint = self.ai_engine_addr.as_ref().filter(|a| !a.is_empty())?;
        Some(ClassifierConfig {
            batch_size: self.ai_batch_size,
            reconnect_interval: Duration::from_secs(self.ai_reconnect_interval_secs),
            ..ClassifierConfig::new(endpoint.clone())
        })
    }

    pub fn store_clear_interval(&self) -> Duration {
        Duration::from_secs(self.store_clear_interval_secs)
    }
}
