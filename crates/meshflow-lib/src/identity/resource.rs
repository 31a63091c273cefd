use crate::models::{WorkloadIdentity, WorkloadKind};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;

/// Stable identity of a watched resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// A cluster resource that claims one or more network addresses
pub trait AddressOwner {
    const KIND: WorkloadKind;

    fn key(&self) -> ResourceKey;

    fn identity(&self) -> WorkloadIdentity;

    /// Every address this resource is reachable at, deduplicated
    fn addresses(&self) -> Vec<String>;
}

fn push_address(addresses: &mut Vec<String>, address: &str) {
    let address = address.trim();
    if address.is_empty() || address == "None" {
        return;
    }
    if !addresses.iter().any(|a| a == address) {
        addresses.push(address.to_string());
    }
}

fn identity_of<K: ResourceExt>(kind: WorkloadKind, resource: &K) -> WorkloadIdentity {
    WorkloadIdentity {
        kind,
        namespace: resource.namespace().unwrap_or_default(),
        name: resource.name_any(),
        labels: resource.labels().clone(),
    }
}

impl AddressOwner for Pod {
    const KIND: WorkloadKind = WorkloadKind::Pod;

    fn key(&self) -> ResourceKey {
        ResourceKey::new(Self::KIND, self.namespace().unwrap_or_default(), self.name_any())
    }

    fn identity(&self) -> WorkloadIdentity {
        identity_of(Self::KIND, self)
    }

    fn addresses(&self) -> Vec<String> {
        let mut addresses = Vec::new();
        if let Some(ip) = self.status.as_ref().and_then(|s| s.pod_ip.as_deref()) {
            push_address(&mut addresses, ip);
        }
        addresses
    }
}

impl AddressOwner for Service {
    const KIND: WorkloadKind = WorkloadKind::Service;

    fn key(&self) -> ResourceKey {
        ResourceKey::new(Self::KIND, self.namespace().unwrap_or_default(), self.name_any())
    }

    fn identity(&self) -> WorkloadIdentity {
        identity_of(Self::KIND, self)
    }

    fn addresses(&self) -> Vec<String> {
        let mut addresses = Vec::new();

        if let Some(spec) = &self.spec {
            if let Some(ip) = spec.cluster_ip.as_deref() {
                push_address(&mut addresses, ip);
            }
            for ip in spec.cluster_ips.iter().flatten() {
                push_address(&mut addresses, ip);
            }
            for ip in spec.external_ips.iter().flatten() {
                push_address(&mut addresses, ip);
            }
        }

        let ingress = self
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref());
        for entry in ingress.into_iter().flatten() {
            if let Some(ip) = entry.ip.as_deref() {
                push_address(&mut addresses, ip);
            }
        }

        addresses
    }
}
