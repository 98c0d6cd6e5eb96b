//! Subscriber registry for the realtime hub
//!
//! The registry is the only mutable state the hub shares between the
//! refresh loop and subscriber streams. Every check-then-act sequence
//! (capacity check + insert, idle scan + push) happens under one lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::error::RealtimeError;

/// Opaque subscriber handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Numeric value of the handle
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Last-activity clock shared between a subscriber stream and the registry
#[derive(Debug)]
pub(crate) struct Activity {
    epoch: Instant,
    last_millis: AtomicU64,
}

impl Activity {
    fn new(epoch: Instant) -> Self {
        let activity = Self {
            epoch,
            last_millis: AtomicU64::new(0),
        };
        activity.touch();
        activity
    }

    /// Record activity at the current instant
    pub(crate) fn touch(&self) {
        let millis = self.epoch.elapsed().as_millis() as u64;
        self.last_millis.store(millis, Ordering::Relaxed);
    }

    /// Time elapsed since the last recorded activity
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        let now_millis = now.saturating_duration_since(self.epoch).as_millis() as u64;
        let last = self.last_millis.load(Ordering::Relaxed);
        Duration::from_millis(now_millis.saturating_sub(last))
    }
}

/// A serialized snapshot tagged with its publish order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Published {
    pub seq: u64,
    pub payload: Arc<str>,
}

/// One registered subscriber: its inbound queue and activity clock
struct SubscriberEntry {
    sender: mpsc::UnboundedSender<Published>,
    activity: Arc<Activity>,
}

/// Newly registered subscriber parts handed to the stream
pub(crate) struct Registration {
    pub id: SubscriberId,
    pub receiver: mpsc::UnboundedReceiver<Published>,
    pub activity: Arc<Activity>,
}

/// Result of pushing one snapshot to the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub delivered: usize,
    pub evicted: usize,
}

/// Bounded registry of live subscribers
pub(crate) struct SubscriberRegistry {
    subscribers: HashMap<SubscriberId, SubscriberEntry>,
    next_id: u64,
    max_subscribers: usize,
    epoch: Instant,
    closed: bool,
    last_seq: u64,
}

impl SubscriberRegistry {
    pub(crate) fn new(max_subscribers: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 0,
            max_subscribers: max_subscribers.max(1),
            epoch: Instant::now(),
            closed: false,
            last_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub(crate) fn max_subscribers(&self) -> usize {
        self.max_subscribers
    }

    /// Tag a payload with the next publish sequence number
    pub(crate) fn stamp(&mut self, payload: Arc<str>) -> Published {
        self.last_seq += 1;
        Published {
            seq: self.last_seq,
            payload,
        }
    }

    /// Register a subscriber unless the registry is full or closed
    pub(crate) fn register(&mut self) -> Result<Registration, RealtimeError> {
        if self.closed {
            return Err(RealtimeError::Closed);
        }
        if self.subscribers.len() >= self.max_subscribers {
            return Err(RealtimeError::CapacityExceeded {
                current: self.subscribers.len(),
                max: self.max_subscribers,
            });
        }

        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        let activity = Arc::new(Activity::new(self.epoch));

        self.subscribers.insert(
            id,
            SubscriberEntry {
                sender,
                activity: activity.clone(),
            },
        );

        Ok(Registration {
            id,
            receiver,
            activity,
        })
    }

    /// Remove a subscriber, returning whether it was present
    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Drop every subscriber and refuse new ones, returning how many were dropped
    ///
    /// Each dropped sender ends its subscriber's stream after the queued
    /// messages are drained.
    pub(crate) fn close(&mut self) -> usize {
        self.closed = true;
        let dropped = self.subscribers.len();
        self.subscribers.clear();
        dropped
    }

    /// Push one payload to every subscriber, dropping idle ones instead
    ///
    /// Dropping an entry closes its queue, which ends the subscriber's stream
    /// once the already-queued messages are drained.
    pub(crate) fn deliver(&mut self, published: &Published, idle_timeout: Duration) -> Delivery {
        let now = Instant::now();
        let mut delivery = Delivery::default();

        self.subscribers.retain(|id, entry| {
            if entry.activity.idle_for(now) > idle_timeout {
                tracing::debug!(subscriber_id = %id, "Dropping idle realtime subscriber");
                delivery.evicted += 1;
                return false;
            }
            if entry.sender.send(published.clone()).is_err() {
                // Receiver is gone without unregistering
                delivery.evicted += 1;
                return false;
            }
            delivery.delivered += 1;
            true
        });

        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_until_capacity() {
        let mut registry = SubscriberRegistry::new(2);
        let first = registry.register().unwrap();
        let second = registry.register().unwrap();
        assert_ne!(first.id, second.id);

        let err = registry.register().err().unwrap();
        assert!(matches!(
            err,
            RealtimeError::CapacityExceeded { current: 2, max: 2 }
        ));
    }

    #[test]
    fn test_zero_capacity_is_floored() {
        let registry = SubscriberRegistry::new(0);
        assert_eq!(registry.max_subscribers(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = SubscriberRegistry::new(4);
        let reg = registry.register().unwrap();
        assert!(registry.remove(reg.id));
        assert!(!registry.remove(reg.id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_pushes_shared_payload() {
        let mut registry = SubscriberRegistry::new(4);
        let mut a = registry.register().unwrap();
        let mut b = registry.register().unwrap();

        let published = registry.stamp(Arc::from("{\"n\":1}"));
        let delivery = registry.deliver(&published, Duration::from_secs(60));
        assert_eq!(delivery, Delivery { delivered: 2, evicted: 0 });

        let got_a = a.receiver.recv().await.unwrap();
        let got_b = b.receiver.recv().await.unwrap();
        assert_eq!(got_a.seq, 1);
        assert!(Arc::ptr_eq(&got_a.payload, &published.payload));
        assert!(Arc::ptr_eq(&got_b.payload, &published.payload));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_evicts_idle() {
        let mut registry = SubscriberRegistry::new(4);
        let mut idle = registry.register().unwrap();
        let active = registry.register().unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        active.activity.touch();

        let published = registry.stamp(Arc::from("x"));
        let delivery = registry.deliver(&published, Duration::from_secs(5));
        assert_eq!(delivery, Delivery { delivered: 1, evicted: 1 });
        assert_eq!(registry.len(), 1);

        // Evicted queue is closed
        assert!(idle.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_ends_queues_and_rejects() {
        let mut registry = SubscriberRegistry::new(4);
        let mut reg = registry.register().unwrap();

        assert_eq!(registry.close(), 1);
        assert!(registry.is_empty());
        assert!(reg.receiver.recv().await.is_none());
        assert!(matches!(registry.register().err().unwrap(), RealtimeError::Closed));
    }

    #[test]
    fn test_stamp_is_monotonic() {
        let mut registry = SubscriberRegistry::new(1);
        let first = registry.stamp(Arc::from("a"));
        let second = registry.stamp(Arc::from("b"));
        assert!(second.seq > first.seq);
    }

    #[test]
    fn test_subscriber_id_display() {
        assert_eq!(SubscriberId(7).to_string(), "sub-7");
    }
}
