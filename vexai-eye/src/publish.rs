//! Non-blocking handoff from the loop to slow consumers

use crate::error::SinkError;
use crate::sinks::{ControllerSink, DashboardSink, DashboardUpdate};
use crate::types::DetectionBatch;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How items wait between the loop and the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HandoffPolicy {
    /// Queue up to `capacity` items; newer items are dropped when full
    Bounded { capacity: usize },
    /// Keep only the newest item
    LatestOnly,
}

/// Delivery counters of one publisher
#[derive(Debug, Default)]
pub struct PublisherStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl PublisherStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Items discarded because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

enum Handoff<T> {
    Bounded(mpsc::Sender<T>),
    Latest(watch::Sender<Option<T>>),
}

/// Hands items to a forwarding task that calls the sink
pub struct SinkPublisher<T> {
    name: &'static str,
    handoff: Handoff<T>,
    stats: Arc<PublisherStats>,
    task: JoinHandle<()>,
}

impl<T> SinkPublisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut>(name: &'static str, policy: &HandoffPolicy, deliver: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SinkError>> + Send + 'static,
    {
        let stats = Arc::new(PublisherStats::default());
        let task_stats = stats.clone();

        let (handoff, task) = match policy {
            HandoffPolicy::Bounded { capacity } => {
                let (tx, mut rx) = mpsc::channel::<T>((*capacity).max(1));
                let task = tokio::spawn(async move {
                    while let Some(item) = rx.recv().await {
                        forward(name, &deliver, item, &task_stats).await;
                    }
                    debug!("{} publisher drained", name);
                });
                (Handoff::Bounded(tx), task)
            }
            HandoffPolicy::LatestOnly => {
                let (tx, mut rx) = watch::channel::<Option<T>>(None);
                let task = tokio::spawn(async move {
                    while rx.changed().await.is_ok() {
                        let item = rx.borrow_and_update().clone();
                        if let Some(item) = item {
                            forward(name, &deliver, item, &task_stats).await;
                        }
                    }
                    debug!("{} publisher drained", name);
                });
                (Handoff::Latest(tx), task)
            }
        };

        Self { name, handoff, stats, task }
    }

    /// Never waits; returns false when the item was dropped
    pub fn publish(&self, item: T) -> bool {
        match &self.handoff {
            Handoff::Bounded(tx) => match tx.try_send(item) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 100 == 0 {
                        warn!("{} queue full, dropped {} items so far", self.name, dropped);
                    }
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    false
                }
            },
            Handoff::Latest(tx) => {
                tx.send_replace(Some(item));
                true
            }
        }
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    /// Stop accepting items, wait for pending ones to reach the sink
    pub async fn close(self) -> Arc<PublisherStats> {
        let Self { name, handoff, stats, task } = self;
        drop(handoff);
        if let Err(e) = task.await {
            warn!("{} publisher task ended abnormally: {}", name, e);
        }
        stats
    }
}

async fn forward<T, F, Fut>(name: &str, deliver: &F, item: T, stats: &PublisherStats)
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), SinkError>>,
{
    match deliver(item).await {
        Ok(()) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            let failed = stats.failed.fetch_add(1, Ordering::Relaxed) + 1;
            if failed == 1 || failed % 100 == 0 {
                warn!("{} sink failed ({} failures): {}", name, failed, e);
            }
        }
    }
}

impl SinkPublisher<DetectionBatch> {
    pub fn controller(policy: &HandoffPolicy, sink: Arc<dyn ControllerSink>) -> Self {
        Self::spawn("controller", policy, move |batch: DetectionBatch| {
            let sink = sink.clone();
            async move { sink.deliver(&batch).await }
        })
    }
}

impl SinkPublisher<DashboardUpdate> {
    pub fn dashboard(policy: &HandoffPolicy, sink: Arc<dyn DashboardSink>) -> Self {
        Self::spawn("dashboard", policy, move |update: DashboardUpdate| {
            let sink = sink.clone();
            async move { sink.deliver(&update).await }
        })
    }
}
