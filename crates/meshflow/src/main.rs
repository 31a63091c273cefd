//! MeshFlow - service-mesh telemetry collector
//!
//! Receives proxy access logs and metrics, attaches workload identities
//! from the cluster API, and streams the result to subscribers.

use anyhow::{Context, Result};
use meshflow_lib::{
    classifier::ApiClassifierTask,
    collector::Collector,
    exporter::{Exporter, ExporterService},
    health::{components, HealthRegistry},
    identity::{ClusterWatcher, IdentityCache},
    observability::StructuredLogger,
    pipeline::Pipeline,
    proto::meshflow::MeshFlowServer,
    store::{self, MemoryStore, UsageStore},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting meshflow");

    let config = config::MeshFlowConfig::load()?;
    info!(instance = %config.instance, "Collector configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_all(&components::ALL).await;

    let logger = StructuredLogger::new(&config.instance);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // The cache must be complete before any record is enriched
    let cache = IdentityCache::new();
    let watcher = ClusterWatcher::try_default(cache.clone(), health_registry.clone())
        .await
        .context("failed to create cluster client")?;
    watcher
        .seed()
        .await
        .context("failed to seed identity cache")?;
    let (pods, services) = cache.len();
    logger.log_cache_seeded(pods, services);
    let watcher_handle = tokio::spawn(watcher.run(shutdown_tx.subscribe()));

    let exporter = Exporter::new(config.exporter(), logger.clone());
    tokio::spawn(exporter.clone().run_periodic(shutdown_tx.subscribe()));

    let usage_store: Arc<dyn UsageStore> = Arc::new(MemoryStore::new());
    tokio::spawn(store::run_clear_loop(
        usage_store.clone(),
        config.store_clear_interval(),
        shutdown_tx.subscribe(),
    ));

    let (pipeline, pipeline_handle) = Pipeline::new(config.pipeline(), exporter.clone());
    let mut pipeline = pipeline.with_store(usage_store);

    match config.classifier() {
        Some(classifier_config) => {
            let (task, handle) =
                ApiClassifierTask::new(classifier_config, exporter.clone(), health_registry.clone());
            pipeline = pipeline.with_classifier(handle);
            tokio::spawn(task.run(shutdown_tx.subscribe()));
        }
        None => info!("No classification service configured, classifier disabled"),
    }
    tokio::spawn(pipeline.run(shutdown_tx.subscribe()));

    let collector = Collector::new(cache, pipeline_handle);
    let collector_listener = TcpListener::bind(&config.collector_addr)
        .await
        .with_context(|| format!("failed to bind collector on {}", config.collector_addr))?;
    let exporter_listener = TcpListener::bind(&config.exporter_addr)
        .await
        .with_context(|| format!("failed to bind exporter on {}", config.exporter_addr))?;

    let mut collector_shutdown = shutdown_tx.subscribe();
    let collector_server = Server::builder()
        .add_service(collector.logs_server())
        .add_service(collector.access_log_server())
        .add_service(collector.metrics_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(collector_listener), async move {
            let _ = collector_shutdown.recv().await;
        });

    let mut exporter_shutdown = shutdown_tx.subscribe();
    let exporter_server = Server::builder()
        .add_service(MeshFlowServer::new(ExporterService::new(exporter.clone())))
        .serve_with_incoming_shutdown(TcpListenerStream::new(exporter_listener), async move {
            let _ = exporter_shutdown.recv().await;
        });

    let collector_handle = tokio::spawn(collector_server);
    let exporter_handle = tokio::spawn(exporter_server);

    health_registry.set_ready(true).await;
    logger.log_startup(VERSION, &config.collector_addr, &config.exporter_addr);

    let reason = shutdown_signal().await?;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    for (name, handle) in [("collector", collector_handle), ("exporter", exporter_handle)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(server = name, error = %e, "gRPC server failed"),
            Err(e) => error!(server = name, error = %e, "gRPC server task panicked"),
        }
    }
    match watcher_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Identity watcher stopped early"),
        Err(e) => error!(error = %e, "Identity watcher task panicked"),
    }
    if let Ok(Err(e)) = api_handle.await {
        error!(error = %e, "API server failed");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT received")
    }
}
