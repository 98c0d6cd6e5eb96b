//! Realtime broadcast hub
//!
//! Owns the periodic refresh loop and the subscriber registry. Snapshots
//! come from an injected [`SnapshotLoader`]; each one is wrapped in a
//! [`SnapshotEnvelope`], serialized once, and the same `Arc<str>` is queued
//! for every subscriber.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::{RealtimeError, RealtimeResult};
use super::stream::Subscription;
use super::subscriber::{Published, SubscriberId, SubscriberRegistry};
use crate::metrics;

/// Event name carried by every broadcast envelope
pub const SNAPSHOT_EVENT: &str = "analytics.metrics";

/// Retry hint sent to transports at subscription start
pub const DEFAULT_RETRY: Duration = Duration::from_millis(5000);

const MIN_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Hub timing and capacity settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Period of the background refresh loop
    pub update_interval: Duration,
    /// Subscribers idle for longer than this are dropped on the next push
    pub idle_timeout: Duration,
    /// Maximum wait for a message before a keep-alive is emitted
    pub heartbeat: Duration,
    /// Maximum concurrent subscribers
    pub max_subscribers: usize,
    /// Transport retry hint
    pub retry: Duration,
    /// Envelope event name
    pub event_name: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            heartbeat: Duration::from_secs(10),
            max_subscribers: 100,
            retry: DEFAULT_RETRY,
            event_name: SNAPSHOT_EVENT.to_string(),
        }
    }
}

impl HubConfig {
    /// Apply the lower bounds: intervals of at least one second, one subscriber
    pub fn normalized(mut self) -> Self {
        self.update_interval = self.update_interval.max(MIN_INTERVAL);
        self.idle_timeout = self.idle_timeout.max(MIN_INTERVAL);
        self.heartbeat = self.heartbeat.max(MIN_INTERVAL);
        self.max_subscribers = self.max_subscribers.max(1);
        self
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Asynchronous source of snapshot payloads
///
/// An empty result set is a valid snapshot. Errors skip the current refresh
/// cycle and are never fatal to the hub.
#[async_trait]
pub trait SnapshotLoader: Send + Sync + 'static {
    /// Payload type wrapped into the broadcast envelope
    type Snapshot: Serialize + Send + 'static;

    /// Produce the current snapshot
    async fn load(&self) -> anyhow::Result<Self::Snapshot>;
}

/// Adapter turning an async closure into a [`SnapshotLoader`]
pub struct FnLoader<F>(F);

/// Wrap an async closure as a snapshot loader
pub fn loader_fn<F, Fut, T>(f: F) -> FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    FnLoader(f)
}

#[async_trait]
impl<F, Fut, T> SnapshotLoader for FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    type Snapshot = T;

    async fn load(&self) -> anyhow::Result<T> {
        (self.0)().await
    }
}

// ============================================================================
// Envelope & state
// ============================================================================

/// Unit broadcast to every subscriber
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEnvelope<T> {
    pub event: String,
    pub generated_at: DateTime<Utc>,
    pub payload: T,
}

/// Lifecycle of the background refresh loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    NotStarted,
    Running,
    Stopped,
}

/// What one refresh cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nobody was subscribed; the loader was not called
    Skipped,
    /// A snapshot was pushed
    Broadcast { delivered: usize, evicted: usize },
}

enum LoopTask {
    NotStarted,
    Running {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

// ============================================================================
// Shared core
// ============================================================================

/// State shared by the hub, its loop task and every subscription
pub(crate) struct HubCore<L: SnapshotLoader> {
    loader: L,
    config: HubConfig,
    registry: Mutex<SubscriberRegistry>,
    latest: RwLock<Option<Published>>,
    initial_load: tokio::sync::Mutex<()>,
}

impl<L: SnapshotLoader> HubCore<L> {
    fn registry(&self) -> MutexGuard<'_, SubscriberRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn latest(&self) -> Option<Published> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_latest(&self, published: Published) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(published);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    /// Unregister a subscriber; a no-op when already gone
    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        let (removed, remaining) = {
            let mut registry = self.registry();
            let removed = registry.remove(id);
            (removed, registry.len())
        };
        if removed {
            metrics::set_realtime_subscribers(remaining);
            tracing::debug!(subscriber_id = %id, remaining, "Realtime subscriber removed");
        }
        removed
    }

    /// Drop every subscriber and refuse new registrations
    fn close(&self) -> usize {
        let dropped = self.registry().close();
        metrics::set_realtime_subscribers(0);
        dropped
    }

    /// Call the loader and serialize the envelope exactly once
    async fn load_payload(&self) -> RealtimeResult<Arc<str>> {
        let snapshot = {
            let _timer = metrics::start_loader_timer("realtime");
            self.loader.load().await.map_err(RealtimeError::Loader)?
        };

        let envelope = SnapshotEnvelope {
            event: self.config.event_name.clone(),
            generated_at: Utc::now(),
            payload: snapshot,
        };
        let encoded = serde_json::to_string(&envelope)?;
        Ok(Arc::from(encoded))
    }

    /// Latest snapshot, loading one if nothing was produced yet
    ///
    /// Concurrent first subscribers share a single load.
    pub(crate) async fn initial_payload(&self) -> RealtimeResult<Published> {
        if let Some(published) = self.latest() {
            return Ok(published);
        }

        let _guard = self.initial_load.lock().await;
        if let Some(published) = self.latest() {
            return Ok(published);
        }

        let payload = self.load_payload().await?;
        let published = self.registry().stamp(payload);
        self.set_latest(published.clone());
        Ok(published)
    }

    /// One refresh cycle: load, wrap, serialize, fan out
    pub(crate) async fn refresh(&self) -> RealtimeResult<RefreshOutcome> {
        if self.subscriber_count() == 0 {
            return Ok(RefreshOutcome::Skipped);
        }

        // Until a first snapshot exists, serialize with initial loads so a
        // subscriber never sees a newer initial frame before an older push
        let _initial = match self.latest() {
            Some(_) => None,
            None => Some(self.initial_load.lock().await),
        };

        let payload = self.load_payload().await?;

        // Publishing under the registry lock keeps `latest` and the queues in
        // step for subscribers registering concurrently
        let (delivery, remaining) = {
            let mut registry = self.registry();
            let published = registry.stamp(payload);
            let delivery = registry.deliver(&published, self.config.idle_timeout);
            self.set_latest(published);
            (delivery, registry.len())
        };

        metrics::record_broadcast(delivery.delivered, delivery.evicted);
        metrics::set_realtime_subscribers(remaining);

        Ok(RefreshOutcome::Broadcast {
            delivered: delivery.delivered,
            evicted: delivery.evicted,
        })
    }
}

async fn run_loop<L: SnapshotLoader>(core: Arc<HubCore<L>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(core.config.update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            outcome = core.refresh() => match outcome {
                Ok(RefreshOutcome::Skipped) => {
                    tracing::trace!("No realtime subscribers, skipping refresh");
                }
                Ok(RefreshOutcome::Broadcast { delivered, evicted }) => {
                    tracing::debug!(delivered, evicted, "Realtime snapshot broadcast");
                }
                Err(e) => {
                    metrics::record_refresh_failure();
                    tracing::warn!(error = %e, "Realtime refresh cycle failed, keeping previous snapshot");
                }
            },
        }
    }

    tracing::debug!("Realtime refresh loop exited");
}

// ============================================================================
// Hub
// ============================================================================

/// Periodic snapshot broadcaster with bounded subscribers
pub struct RealtimeHub<L: SnapshotLoader> {
    core: Arc<HubCore<L>>,
    task: Mutex<LoopTask>,
}

impl<L: SnapshotLoader> RealtimeHub<L> {
    /// Create a hub; the refresh loop does not run until [`start`](Self::start)
    pub fn new(config: HubConfig, loader: L) -> Self {
        let config = config.normalized();
        Self {
            core: Arc::new(HubCore {
                loader,
                registry: Mutex::new(SubscriberRegistry::new(config.max_subscribers)),
                config,
                latest: RwLock::new(None),
                initial_load: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(LoopTask::NotStarted),
        }
    }

    /// Effective (normalized) configuration
    pub fn config(&self) -> &HubConfig {
        self.core.config()
    }

    /// Current lifecycle state
    pub fn state(&self) -> HubState {
        match &*self.task.lock().unwrap_or_else(PoisonError::into_inner) {
            LoopTask::NotStarted => HubState::NotStarted,
            LoopTask::Running { .. } => HubState::Running,
            LoopTask::Stopped => HubState::Stopped,
        }
    }

    /// Launch the refresh loop; repeated calls are no-ops
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        match &*task {
            LoopTask::NotStarted => {
                let (shutdown, shutdown_rx) = watch::channel(false);
                let handle = tokio::spawn(run_loop(self.core.clone(), shutdown_rx));
                *task = LoopTask::Running { shutdown, handle };
                tracing::info!(
                    interval_secs = self.core.config.update_interval.as_secs(),
                    max_subscribers = self.core.config.max_subscribers,
                    "Realtime hub started"
                );
            }
            LoopTask::Running { .. } => {
                tracing::debug!("Realtime hub already running");
            }
            LoopTask::Stopped => {
                tracing::debug!("Realtime hub already stopped, not restarting");
            }
        }
    }

    /// Cancel the refresh loop, wait for it to finish and close every
    /// subscriber stream; safe to call twice
    ///
    /// Open streams end once their queued messages are drained, and later
    /// [`subscribe`](Self::subscribe) calls fail with [`RealtimeError::Closed`].
    pub async fn stop(&self) {
        let previous = {
            let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *task, LoopTask::Stopped)
        };

        if let LoopTask::Running { shutdown, handle } = previous {
            let _ = shutdown.send(true);
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!(error = %e, "Realtime refresh loop ended abnormally"),
            }
        }

        let closed = self.core.close();
        tracing::info!(closed_subscribers = closed, "Realtime hub stopped");
    }

    /// Register a subscriber
    ///
    /// Fails with [`RealtimeError::CapacityExceeded`] when the hub is full and
    /// with [`RealtimeError::Closed`] once the hub was stopped.
    pub fn subscribe(&self) -> RealtimeResult<Subscription<L>> {
        let (registration, count) = {
            let mut registry = self.core.registry();
            match registry.register() {
                Ok(registration) => (registration, registry.len()),
                Err(e) => {
                    drop(registry);
                    if e.is_capacity() {
                        metrics::record_capacity_rejection();
                    }
                    tracing::warn!(error = %e, "Rejecting realtime subscriber");
                    return Err(e);
                }
            }
        };

        metrics::set_realtime_subscribers(count);
        tracing::debug!(subscriber_id = %registration.id, subscribers = count, "Realtime subscriber added");

        Ok(Subscription::new(self.core.clone(), registration))
    }

    /// Remove a subscriber by handle; a no-op if already removed
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.core.remove(id)
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    /// Serialized envelope of the most recent snapshot, if any
    pub fn latest_payload(&self) -> Option<Arc<str>> {
        self.core.latest().map(|published| published.payload)
    }

    /// Run one refresh cycle immediately
    pub async fn refresh(&self) -> RealtimeResult<RefreshOutcome> {
        self.core.refresh().await
    }
}
