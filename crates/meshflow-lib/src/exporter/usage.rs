//! Rolling per-workload API usage counts

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Count and last-seen time for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiUsage {
    pub count: u64,
    pub last_updated: i64,
}

/// Usage for one (namespace, label-set) workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageBucket {
    pub namespace: String,
    pub labels: String,
    pub apis: BTreeMap<String, ApiUsage>,
    pub last_updated: i64,
}

fn bucket_key(namespace: &str, labels: &str) -> String {
    format!("{}/{}", namespace, labels)
}

/// Usage aggregate keyed by namespace plus sorted label string
#[derive(Debug, Default)]
pub struct UsageTable {
    buckets: RwLock<HashMap<String, UsageBucket>>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one invocation of `path` by the given workload
    pub fn update(&self, namespace: &str, labels: &str, path: &str) {
        self.update_at(namespace, labels, path, chrono::Utc::now().timestamp());
    }

    pub(crate) fn update_at(&self, namespace: &str, labels: &str, path: &str, now: i64) {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(bucket_key(namespace, labels))
            .or_insert_with(|| UsageBucket {
                namespace: namespace.to_string(),
                labels: labels.to_string(),
                apis: BTreeMap::new(),
                last_updated: now,
            });

        let usage = bucket.apis.entry(path.to_string()).or_insert(ApiUsage {
            count: 0,
            last_updated: now,
        });
        usage.count += 1;
        usage.last_updated = now;
        bucket.last_updated = now;
    }

    /// Per-path totals summed across every bucket
    pub fn totals(&self) -> BTreeMap<String, u64> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut totals = BTreeMap::new();
        for bucket in buckets.values() {
            for (path, usage) in &bucket.apis {
                *totals.entry(path.clone()).or_insert(0) += usage.count;
            }
        }
        totals
    }

    /// Drop buckets not updated within `window`. Returns how many were removed.
    pub fn evict_stale(&self, window: Duration) -> usize {
        self.evict_stale_at(chrono::Utc::now().timestamp(), window)
    }

    pub(crate) fn evict_stale_at(&self, now: i64, window: Duration) -> usize {
        let cutoff = now - window.as_secs() as i64;
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.last_updated >= cutoff);
        before - buckets.len()
    }

    pub fn get(&self, namespace: &str, labels: &str) -> Option<UsageBucket> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.get(&bucket_key(namespace, labels)).cloned()
    }

    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate_per_bucket() {
        let table = UsageTable::new();
        for _ in 0..5 {
            table.update_at("shop", "app:checkout", "/pay", 100);
        }
        table.update_at("shop", "app:checkout", "/cart", 101);

        let bucket = table.get("shop", "app:checkout").unwrap();
        assert_eq!(bucket.apis["/pay"].count, 5);
        assert_eq!(bucket.apis["/cart"].count, 1);
        assert_eq!(bucket.last_updated, 101);
    }

    #[test]
    fn test_totals_sum_across_buckets() {
        let table = UsageTable::new();
        table.update_at("shop", "app:checkout", "/pay", 100);
        table.update_at("shop", "app:checkout", "/pay", 100);
        table.update_at("billing", "app:invoice", "/pay", 100);
        table.update_at("billing", "app:invoice", "/refund", 100);

        let totals = table.totals();
        assert_eq!(totals.get("/pay"), Some(&3));
        assert_eq!(totals.get("/refund"), Some(&1));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_same_labels_in_other_namespace_is_separate() {
        let table = UsageTable::new();
        table.update_at("a", "app:web", "/", 1);
        table.update_at("b", "app:web", "/", 1);

        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_evict_stale_removes_only_old_buckets() {
        let table = UsageTable::new();
        table.update_at("shop", "app:checkout", "/pay", 1_000);
        table.update_at("shop", "app:cart", "/items", 1_050);

        let removed = table.evict_stale_at(1_061, Duration::from_secs(60));

        assert_eq!(removed, 1);
        assert!(table.get("shop", "app:checkout").is_none());
        assert!(table.get("shop", "app:cart").is_some());
    }

    #[test]
    fn test_bucket_within_window_survives() {
        let table = UsageTable::new();
        table.update_at("shop", "app:checkout", "/pay", 1_000);

        assert_eq!(table.evict_stale_at(1_060, Duration::from_secs(60)), 0);
        assert!(!table.is_empty());
    }
}
