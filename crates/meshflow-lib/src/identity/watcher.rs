use super::{AddressOwner, IdentityCache};
use crate::error::{Error, Result};
use crate::health::{components, HealthRegistry};
use crate::observability::FlowMetrics;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    api::ListParams,
    runtime::{watcher, WatchStreamExt},
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Keeps an [`IdentityCache`] in step with the cluster's pods and services
#[derive(Clone)]
pub struct ClusterWatcher {
    client: Client,
    cache: IdentityCache,
    health: HealthRegistry,
    metrics: FlowMetrics,
}

impl ClusterWatcher {
    pub fn new(client: Client, cache: IdentityCache, health: HealthRegistry) -> Self {
        Self {
            client,
            cache,
            health,
            metrics: FlowMetrics::new(),
        }
    }

    /// Connect with the in-cluster or kubeconfig credentials
    pub async fn try_default(cache: IdentityCache, health: HealthRegistry) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, cache, health))
    }

    /// List every pod and service once. Any failure here is fatal for startup.
    pub async fn seed(&self) -> Result<()> {
        let pods = self.list::<Pod>().await?;
        let services = self.list::<Service>().await?;

        self.cache.replace_all(&pods);
        self.cache.replace_all(&services);
        self.record_size();

        info!(
            pods = pods.len(),
            services = services.len(),
            "Identity cache seeded"
        );
        Ok(())
    }

    async fn list<K>(&self) -> Result<Vec<K>>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    /// Apply watch events until shutdown. Individual event failures are logged and skipped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Starting pod and service watchers");

        let result = tokio::select! {
            result = self.watch::<Pod>() => result,
            result = self.watch::<Service>() => result,
            _ = shutdown.recv() => {
                info!("Identity watchers shutting down");
                Ok(())
            }
        };
        report_stopped(&self.health, result).await
    }

    async fn watch<K>(&self) -> Result<()>
    where
        K: AddressOwner + Resource + Clone + DeserializeOwned + Debug + Send + 'static,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Applied(obj)) => {
                    debug!(kind = %K::KIND, name = %obj.name_any(), "Resource applied");
                    self.cache.upsert(&obj);
                }
                Ok(watcher::Event::Deleted(obj)) => {
                    debug!(kind = %K::KIND, name = %obj.name_any(), "Resource deleted");
                    self.cache.remove(&obj);
                }
                Ok(watcher::Event::Restarted(objs)) => {
                    info!(kind = %K::KIND, count = objs.len(), "Watch restarted, resyncing");
                    self.cache.replace_all(&objs);
                    self.health.set_healthy(components::IDENTITY_CACHE).await;
                }
                Err(e) => {
                    warn!(kind = %K::KIND, error = %e, "Watch event failed");
                    self.metrics.inc_watch_errors(K::KIND.as_str());
                    self.health
                        .set_degraded(components::IDENTITY_CACHE, e.to_string())
                        .await;
                    continue;
                }
            }
            self.record_size();
        }

        Err(Error::WatchEnded(K::KIND.as_str()))
    }

    fn record_size(&self) {
        let (pods, services) = self.cache.len();
        self.metrics.set_identity_entries(pods as i64, services as i64);
    }
}

/// A watcher that stops before shutdown leaves the cache frozen
async fn report_stopped(health: &HealthRegistry, result: Result<()>) -> Result<()> {
    if let Err(e) = &result {
        warn!(error = %e, "Identity watcher stopped");
        health
            .set_unhealthy(components::IDENTITY_CACHE, e.to_string())
            .await;
    }
    result
}
