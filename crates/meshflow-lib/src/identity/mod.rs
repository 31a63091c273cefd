//! Address to workload identity resolution
//!
//! The cache is kept current by watching pods and services. Lookups are
//! synchronous, never block on the cluster API, and return an `Unknown`
//! identity for addresses nobody has claimed.

mod resource;
mod watcher;

pub use resource::{AddressOwner, ResourceKey};
pub use watcher::ClusterWatcher;

use crate::models::{WorkloadIdentity, WorkloadKind};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
struct IndexEntry {
    owner: ResourceKey,
    identity: Arc<WorkloadIdentity>,
}

/// Address maps plus the set of addresses each resource currently owns
#[derive(Debug, Default)]
struct AddressIndex {
    pods: HashMap<String, IndexEntry>,
    services: HashMap<String, IndexEntry>,
    owned: HashMap<ResourceKey, Vec<String>>,
}

impl AddressIndex {
    fn map_mut(&mut self, kind: WorkloadKind) -> Option<&mut HashMap<String, IndexEntry>> {
        match kind {
            WorkloadKind::Pod => Some(&mut self.pods),
            WorkloadKind::Service => Some(&mut self.services),
            WorkloadKind::Unknown => None,
        }
    }

    fn upsert(&mut self, owner: ResourceKey, identity: WorkloadIdentity, addresses: Vec<String>) {
        let kind = owner.kind;
        let previous = self.owned.remove(&owner).unwrap_or_default();
        let identity = Arc::new(identity);

        let Some(map) = self.map_mut(kind) else {
            return;
        };

        for address in previous.iter().filter(|a| !addresses.contains(a)) {
            if map.get(address).is_some_and(|e| e.owner == owner) {
                map.remove(address);
            }
        }

        for address in &addresses {
            map.insert(
                address.clone(),
                IndexEntry {
                    owner: owner.clone(),
                    identity: Arc::clone(&identity),
                },
            );
        }

        if !addresses.is_empty() {
            self.owned.insert(owner, addresses);
        }
    }

    fn remove(&mut self, owner: &ResourceKey) {
        let Some(addresses) = self.owned.remove(owner) else {
            return;
        };
        let Some(map) = self.map_mut(owner.kind) else {
            return;
        };

        for address in addresses {
            // The address may have been claimed by a newer resource already
            if map.get(&address).is_some_and(|e| &e.owner == owner) {
                map.remove(&address);
            }
        }
    }

    fn clear_kind(&mut self, kind: WorkloadKind) {
        if let Some(map) = self.map_mut(kind) {
            map.clear();
        }
        self.owned.retain(|key, _| key.kind != kind);
    }

    fn lookup(&self, address: &str) -> Option<&IndexEntry> {
        self.pods.get(address).or_else(|| self.services.get(address))
    }
}

/// Concurrent address to identity cache
///
/// Cloning is cheap and every clone shares the same index.
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    index: Arc<RwLock<AddressIndex>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an address. Pods win over services when both claim it.
    pub fn lookup(&self, address: &str) -> WorkloadIdentity {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .lookup(address)
            .map(|entry| (*entry.identity).clone())
            .unwrap_or_else(WorkloadIdentity::unknown)
    }

    /// Insert or refresh a resource. Addresses it no longer carries are dropped.
    pub fn upsert<R: AddressOwner>(&self, resource: &R) {
        let owner = resource.key();
        let identity = resource.identity();
        let addresses = resource.addresses();

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.upsert(owner, identity, addresses);
    }

    /// Forget every address a resource owns
    pub fn remove<R: AddressOwner>(&self, resource: &R) {
        self.remove_key(&resource.key());
    }

    pub fn remove_key(&self, owner: &ResourceKey) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.remove(owner);
    }

    /// Replace everything known about one kind with a fresh listing
    pub fn replace_all<R: AddressOwner>(&self, resources: &[R]) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.clear_kind(R::KIND);
        for resource in resources {
            index.upsert(resource.key(), resource.identity(), resource.addresses());
        }
    }

    /// Number of indexed (pod, service) addresses
    pub fn len(&self) -> (usize, usize) {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        (index.pods.len(), index.services.len())
    }

    pub fn is_empty(&self) -> bool {
        let (pods, services) = self.len();
        pods == 0 && services == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, Pod, PodStatus, Service, ServiceSpec,
        ServiceStatus,
    };
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pod(namespace: &str, name: &str, ip: Option<&str>, app: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels(&[("app", app)])),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: ip.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(namespace: &str, name: &str, cluster_ip: &str, external: &[&str]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels(&[("app", name)])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some(cluster_ip.to_string()),
                external_ips: Some(external.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_unknown_address() {
        let cache = IdentityCache::new();
        let identity = cache.lookup("10.0.0.1");

        assert_eq!(identity.kind, WorkloadKind::Unknown);
        assert_eq!(identity.namespace, "Unknown");
        assert!(identity.labels.is_empty());
    }

    #[test]
    fn test_pod_lookup_after_upsert() {
        let cache = IdentityCache::new();
        cache.upsert(&pod("shop", "checkout-7d9f", Some("10.1.0.5"), "checkout"));

        let identity = cache.lookup("10.1.0.5");
        assert_eq!(identity.kind, WorkloadKind::Pod);
        assert_eq!(identity.namespace, "shop");
        assert_eq!(identity.name, "checkout-7d9f");
        assert_eq!(identity.labels.get("app").map(String::as_str), Some("checkout"));
    }

    #[test]
    fn test_pod_without_address_is_not_indexed() {
        let cache = IdentityCache::new();
        cache.upsert(&pod("shop", "pending", None, "checkout"));

        assert!(cache.is_empty());
    }

    #[test]
    fn test_service_external_addresses_all_resolve() {
        let cache = IdentityCache::new();
        cache.upsert(&service("shop", "payments", "10.96.0.10", &["34.1.1.1", "34.1.1.2"]));

        for address in ["10.96.0.10", "34.1.1.1", "34.1.1.2"] {
            let identity = cache.lookup(address);
            assert_eq!(identity.kind, WorkloadKind::Service, "{address}");
            assert_eq!(identity.name, "payments");
        }
    }

    #[test]
    fn test_load_balancer_ingress_resolves() {
        let mut svc = service("shop", "gateway", "10.96.0.20", &[]);
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some("35.2.2.2".to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });

        let cache = IdentityCache::new();
        cache.upsert(&svc);

        assert_eq!(cache.lookup("35.2.2.2").name, "gateway");
        assert_eq!(cache.lookup("10.96.0.20").name, "gateway");
    }

    #[test]
    fn test_headless_service_has_no_cluster_address() {
        let cache = IdentityCache::new();
        cache.upsert(&service("shop", "headless", "None", &[]));

        assert!(cache.lookup("None").is_unknown());
        assert_eq!(cache.len(), (0, 0));
    }

    #[test]
    fn test_update_is_idempotent() {
        let cache = IdentityCache::new();
        let p = pod("shop", "checkout-7d9f", Some("10.1.0.5"), "checkout");

        cache.upsert(&p);
        let first = cache.lookup("10.1.0.5");
        cache.upsert(&p);
        cache.upsert(&p);

        assert_eq!(cache.lookup("10.1.0.5"), first);
        assert_eq!(cache.len(), (1, 0));
    }

    #[test]
    fn test_update_drops_stale_address() {
        let cache = IdentityCache::new();
        cache.upsert(&pod("shop", "checkout-7d9f", Some("10.1.0.5"), "checkout"));
        cache.upsert(&pod("shop", "checkout-7d9f", Some("10.1.0.9"), "checkout"));

        assert!(cache.lookup("10.1.0.5").is_unknown());
        assert_eq!(cache.lookup("10.1.0.9").name, "checkout-7d9f");
    }

    #[test]
    fn test_delete_removes_address() {
        let cache = IdentityCache::new();
        let p = pod("shop", "checkout-7d9f", Some("10.1.0.5"), "checkout");
        cache.upsert(&p);
        cache.remove(&p);

        assert!(cache.lookup("10.1.0.5").is_unknown());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_keeps_reused_address() {
        let cache = IdentityCache::new();
        let old = pod("shop", "checkout-old", Some("10.1.0.5"), "checkout");
        let new = pod("shop", "checkout-new", Some("10.1.0.5"), "checkout");

        cache.upsert(&old);
        cache.upsert(&new);
        cache.remove(&old);

        assert_eq!(cache.lookup("10.1.0.5").name, "checkout-new");
    }

    #[test]
    fn test_pod_wins_over_service() {
        let cache = IdentityCache::new();
        cache.upsert(&service("shop", "payments", "10.1.0.5", &[]));
        cache.upsert(&pod("shop", "payments-abc", Some("10.1.0.5"), "payments"));

        assert_eq!(cache.lookup("10.1.0.5").kind, WorkloadKind::Pod);
    }

    #[test]
    fn test_replace_all_resyncs_one_kind() {
        let cache = IdentityCache::new();
        cache.upsert(&pod("shop", "a", Some("10.1.0.1"), "a"));
        cache.upsert(&pod("shop", "b", Some("10.1.0.2"), "b"));
        cache.upsert(&service("shop", "payments", "10.96.0.10", &[]));

        cache.replace_all(&[pod("shop", "c", Some("10.1.0.3"), "c")]);

        assert!(cache.lookup("10.1.0.1").is_unknown());
        assert!(cache.lookup("10.1.0.2").is_unknown());
        assert_eq!(cache.lookup("10.1.0.3").name, "c");
        assert_eq!(cache.lookup("10.96.0.10").name, "payments");
    }
}
