//! Per-category subscriber lists with retrying fan-out

use crate::models::RecordCategory;
use crate::observability::FlowMetrics;
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why one delivery attempt to a subscriber failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("subscriber stream closed")]
    Closed,
    #[error("subscriber did not accept the record within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

/// Destination of one subscriber's stream
#[async_trait]
pub trait RecordSink<M>: Send + Sync {
    async fn send(&self, message: &M) -> Result<(), SinkError>;

    /// Resolves once the remote end has gone away
    async fn closed(&self) {
        futures::future::pending::<()>().await
    }
}

/// Caller-supplied description of a subscriber
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub hostname: String,
    pub ip_address: String,
}

impl SubscriberInfo {
    pub fn new(hostname: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip_address: ip_address.into(),
        }
    }
}

/// How a registration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The subscriber's stream went away
    Disconnected,
    /// No successful delivery within the idle timeout
    Idle,
    Shutdown,
    Removed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Removed => "removed",
        };
        f.write_str(s)
    }
}

struct Subscriber<M> {
    id: u64,
    info: SubscriberInfo,
    sink: Arc<dyn RecordSink<M>>,
    last_success: Mutex<Instant>,
    done: Mutex<Option<oneshot::Sender<CloseReason>>>,
}

impl<M> Subscriber<M> {
    fn touch(&self) {
        *self.last_success.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_since(&self) -> Instant {
        *self.last_success.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self, reason: CloseReason) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(done) = done {
            let _ = done.send(reason);
        }
    }
}

/// Outcome of fanning one record out to a category's subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub category: RecordCategory,
    pub attempted: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn into_result(self) -> crate::error::Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(crate::error::Error::DeliveryError {
                failed: self.failed,
                total: self.attempted,
            })
        }
    }
}

/// Ordered subscriber list for one record category
pub struct SubscriberRegistry<M> {
    category: RecordCategory,
    max_attempts: u32,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Arc<Subscriber<M>>>>,
    metrics: FlowMetrics,
}

impl<M: Send + Sync + 'static> SubscriberRegistry<M> {
    pub fn new(category: RecordCategory, max_attempts: u32) -> Self {
        Self {
            category,
            max_attempts: max_attempts.max(1),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
            metrics: FlowMetrics::new(),
        }
    }

    pub fn category(&self) -> RecordCategory {
        self.category
    }

    /// Append a subscriber. The returned handle resolves when the registration ends.
    pub async fn register(
        self: &Arc<Self>,
        info: SubscriberInfo,
        sink: Arc<dyn RecordSink<M>>,
    ) -> Subscription<M> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();

        let subscriber = Arc::new(Subscriber {
            id,
            info: info.clone(),
            sink: Arc::clone(&sink),
            last_success: Mutex::new(Instant::now()),
            done: Mutex::new(Some(done_tx)),
        });

        let count = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.push(subscriber);
            subscribers.len()
        };
        self.metrics
            .set_subscribers(self.category.as_str(), count as i64);
        debug!(category = %self.category, id = id, hostname = %info.hostname, "Subscriber added");

        Subscription {
            id,
            info,
            sink,
            done: done_rx,
            registry: Arc::clone(self),
        }
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop one subscriber, waking its handle with `reason`
    pub async fn deregister(&self, id: u64, reason: CloseReason) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.write().await;
            let mut removed = None;
            subscribers.retain(|s| {
                if s.id == id {
                    removed = Some(Arc::clone(s));
                    false
                } else {
                    true
                }
            });
            self.metrics
                .set_subscribers(self.category.as_str(), subscribers.len() as i64);
            removed
        };

        match removed {
            Some(subscriber) => {
                subscriber.close(reason);
                true
            }
            None => false,
        }
    }

    /// Remove subscribers with no successful delivery for longer than `timeout`
    pub async fn prune_idle(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let mut pruned = Vec::new();
        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.retain(|s| {
                let idle = now.saturating_duration_since(s.idle_since()) > timeout;
                if idle {
                    pruned.push(Arc::clone(s));
                }
                !idle
            });
            self.metrics
                .set_subscribers(self.category.as_str(), subscribers.len() as i64);
        }

        for subscriber in &pruned {
            warn!(
                category = %self.category,
                hostname = %subscriber.info.hostname,
                "Pruning idle subscriber"
            );
            subscriber.close(CloseReason::Idle);
        }
        pruned.len()
    }

    /// Release every registration, e.g. on shutdown
    pub async fn close_all(&self, reason: CloseReason) {
        let drained: Vec<_> = self.subscribers.write().await.drain(..).collect();
        self.metrics.set_subscribers(self.category.as_str(), 0);
        for subscriber in drained {
            subscriber.close(reason);
        }
    }

    /// Deliver one record to every current subscriber
    ///
    /// Each subscriber gets up to `max_attempts` tries. A failing subscriber
    /// is counted but stays registered, and never delays delivery to others
    /// beyond its own attempts.
    pub async fn broadcast(&self, message: &M) -> BroadcastReport {
        let subscribers: Vec<_> = self.subscribers.read().await.iter().cloned().collect();
        let attempted = subscribers.len();

        let results = join_all(subscribers.iter().map(|s| self.deliver(s, message))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        BroadcastReport {
            category: self.category,
            attempted,
            failed,
        }
    }

    async fn deliver(&self, subscriber: &Subscriber<M>, message: &M) -> Result<(), SinkError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match subscriber.sink.send(message).await {
                Ok(()) => {
                    subscriber.touch();
                    return Ok(());
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(
                        category = %self.category,
                        hostname = %subscriber.info.hostname,
                        ip_address = %subscriber.info.ip_address,
                        attempts = attempt,
                        error = %e,
                        "Failed to deliver record to subscriber"
                    );
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        category = %self.category,
                        hostname = %subscriber.info.hostname,
                        attempt = attempt,
                        error = %e,
                        "Delivery attempt failed, retrying"
                    );
                }
            }
        }
    }
}

/// Handle held by the streaming call for as long as the registration lives
pub struct Subscription<M: Send + Sync + 'static> {
    id: u64,
    info: SubscriberInfo,
    sink: Arc<dyn RecordSink<M>>,
    done: oneshot::Receiver<CloseReason>,
    registry: Arc<SubscriberRegistry<M>>,
}

impl<M: Send + Sync + 'static> Subscription<M> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn info(&self) -> &SubscriberInfo {
        &self.info
    }

    /// Park until the subscriber disconnects or the registry releases it
    pub async fn wait(mut self) -> CloseReason {
        let reason = tokio::select! {
            reason = &mut self.done => reason.unwrap_or(CloseReason::Removed),
            _ = self.sink.closed() => CloseReason::Disconnected,
        };

        if reason == CloseReason::Disconnected {
            self.registry.deregister(self.id, reason).await;
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct MockSink {
        fail: bool,
        attempts: AtomicUsize,
        received: Mutex<Vec<u64>>,
        gone: Notify,
    }

    impl MockSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn received(&self) -> Vec<u64> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordSink<u64> for MockSink {
        async fn send(&self, message: &u64) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::Closed);
            }
            self.received.lock().unwrap().push(*message);
            Ok(())
        }

        async fn closed(&self) {
            self.gone.notified().await
        }
    }

    fn registry() -> Arc<SubscriberRegistry<u64>> {
        Arc::new(SubscriberRegistry::new(RecordCategory::ApiLog, 3))
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let registry = registry();
        let report = registry.broadcast(&1).await;

        assert_eq!(report.attempted, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated() {
        let registry = registry();
        let healthy = Arc::new(MockSink::default());
        let broken = Arc::new(MockSink::failing());

        let _a = registry.register(SubscriberInfo::new("a", "10.0.0.1"), healthy.clone()).await;
        let _b = registry.register(SubscriberInfo::new("b", "10.0.0.2"), broken.clone()).await;

        let report = registry.broadcast(&42).await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(broken.attempts(), 3);
        assert_eq!(healthy.attempts(), 1);
        assert_eq!(healthy.received(), vec![42]);
        assert_eq!(registry.len().await, 2, "failed subscriber stays registered");

        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Delivery failed for 1/2 subscribers");
    }

    #[tokio::test]
    async fn test_disconnect_releases_registration() {
        let registry = registry();
        let sink = Arc::new(MockSink::default());
        let subscription = registry.register(SubscriberInfo::default(), sink.clone()).await;

        let waiter = tokio::spawn(subscription.wait());
        tokio::task::yield_now().await;
        sink.gone.notify_one();

        assert_eq!(waiter.await.unwrap(), CloseReason::Disconnected);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_all_wakes_every_handle() {
        let registry = registry();
        let first = registry
            .register(SubscriberInfo::default(), Arc::new(MockSink::default()))
            .await;
        let second = registry
            .register(SubscriberInfo::default(), Arc::new(MockSink::default()))
            .await;

        registry.close_all(CloseReason::Shutdown).await;

        assert_eq!(first.wait().await, CloseReason::Shutdown);
        assert_eq!(second.wait().await, CloseReason::Shutdown);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle_keeps_active_subscribers() {
        let registry = registry();
        let active = Arc::new(MockSink::default());
        let stalled = Arc::new(MockSink::failing());
        let _a = registry.register(SubscriberInfo::new("active", ""), active).await;
        let idle = registry.register(SubscriberInfo::new("stalled", ""), stalled).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        // Only the healthy sink refreshes its last-success time
        registry.broadcast(&1).await;

        let pruned = registry.prune_idle(Duration::from_secs(15)).await;
        assert_eq!(pruned, 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(idle.wait().await, CloseReason::Idle);
    }

    #[tokio::test]
    async fn test_deregister_unknown_id() {
        let registry = registry();
        assert!(!registry.deregister(99, CloseReason::Removed).await);
    }
}
