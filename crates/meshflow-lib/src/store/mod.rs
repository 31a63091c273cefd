//! Side-store for API log records, grouped by workload for later re-aggregation

use crate::error::Result;
use crate::models::ApiLogRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

/// Default per-group retention for the in-memory store
const DEFAULT_GROUP_CAPACITY: usize = 10_000;

/// All records stored for one (namespace, label-set) pair
#[derive(Debug, Clone, PartialEq)]
pub struct UsageGroup {
    pub namespace: String,
    pub labels: String,
    pub records: Vec<ApiLogRecord>,
}

/// Durable collaborator that keeps raw records between clears
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert(&self, namespace: &str, labels: &str, record: &ApiLogRecord) -> Result<()>;

    async fn select_grouped(&self) -> Result<Vec<UsageGroup>>;

    async fn clear_all(&self) -> Result<()>;
}

/// In-process store. Each group keeps at most `capacity` records, oldest dropped first.
pub struct MemoryStore {
    groups: DashMap<(String, String), VecDeque<ApiLogRecord>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_GROUP_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            groups: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn insert(&self, namespace: &str, labels: &str, record: &ApiLogRecord) -> Result<()> {
        let mut group = self
            .groups
            .entry((namespace.to_string(), labels.to_string()))
            .or_default();
        while group.len() >= self.capacity {
            group.pop_front();
        }
        group.push_back(record.clone());
        Ok(())
    }

    async fn select_grouped(&self) -> Result<Vec<UsageGroup>> {
        let mut groups: Vec<UsageGroup> = self
            .groups
            .iter()
            .map(|entry| {
                let (namespace, labels) = entry.key();
                UsageGroup {
                    namespace: namespace.clone(),
                    labels: labels.clone(),
                    records: entry.value().iter().cloned().collect(),
                }
            })
            .collect();
        groups.sort_by(|a, b| (&a.namespace, &a.labels).cmp(&(&b.namespace, &b.labels)));
        Ok(groups)
    }

    async fn clear_all(&self) -> Result<()> {
        self.groups.clear();
        Ok(())
    }
}

/// Clear the store every `period` until shutdown
pub async fn run_clear_loop(
    store: Arc<dyn UsageStore>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    info!(period_secs = period.as_secs(), "Starting store clear loop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.clear_all().await {
                    Ok(()) => debug!("Cleared usage store"),
                    Err(e) => warn!(error = %e, "Failed to clear usage store"),
                }
            }
            _ = shutdown.recv() => {
                debug!("Store clear loop stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> ApiLogRecord {
        ApiLogRecord {
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_records_grouped_by_workload() {
        let store = MemoryStore::new();
        store.insert("shop", "app:web", &record("/a")).await.unwrap();
        store.insert("shop", "app:web", &record("/b")).await.unwrap();
        store.insert("billing", "app:web", &record("/c")).await.unwrap();

        let groups = store.select_grouped().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].namespace, "billing");
        assert_eq!(groups[1].records.len(), 2);
        assert_eq!(groups[1].records[0].path, "/a");
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_group_capacity_drops_oldest() {
        let store = MemoryStore::with_capacity(2);
        for path in ["/1", "/2", "/3"] {
            store.insert("ns", "", &record(path)).await.unwrap();
        }

        let groups = store.select_grouped().await.unwrap();
        let paths: Vec<_> = groups[0].records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/2", "/3"]);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let store = MemoryStore::new();
        store.insert("ns", "", &record("/")).await.unwrap();
        store.clear_all().await.unwrap();

        assert!(store.is_empty());
        assert!(store.select_grouped().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_loop_runs_on_period() {
        let store = Arc::new(MemoryStore::new());
        store.insert("ns", "", &record("/")).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_clear_loop(store.clone(), Duration::from_secs(60), rx));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
