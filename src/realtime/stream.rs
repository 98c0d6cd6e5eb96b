//! Per-subscriber event stream
//!
//! A [`Subscription`] yields one retry hint, then the latest snapshot, then
//! every later broadcast, with keep-alive frames whenever the heartbeat
//! interval passes without a message. Only consumed snapshots count as
//! activity; a subscriber that merely receives keep-alives goes idle.
//! Dropping the subscription (for example when the transport notices the
//! client went away) unregisters it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::mpsc;

use super::hub::{HubCore, SnapshotLoader};
use super::subscriber::{Activity, Published, Registration, SubscriberId};

/// One frame of the streaming output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Transport reconnection hint
    Retry(Duration),
    /// Serialized snapshot envelope
    Data(Arc<str>),
    /// Comment keeping the connection open
    KeepAlive,
}

impl StreamFrame {
    /// Encode the frame in `text/event-stream` wire format
    pub fn to_event_stream(&self) -> String {
        match self {
            Self::Retry(delay) => format!("retry: {}\n\n", delay.as_millis()),
            Self::Data(payload) => format!("data: {payload}\n\n"),
            Self::KeepAlive => ": keep-alive\n\n".to_string(),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}

impl fmt::Display for StreamFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_event_stream())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Retry,
    Initial,
    Live,
    Closed,
}

/// A registered subscriber and its inbound queue
pub struct Subscription<L: SnapshotLoader> {
    id: SubscriberId,
    core: Arc<HubCore<L>>,
    receiver: mpsc::UnboundedReceiver<Published>,
    activity: Arc<Activity>,
    phase: Phase,
    /// Sequence of the initial frame; queued broadcasts up to it are stale
    initial_seq: u64,
}

impl<L: SnapshotLoader> Subscription<L> {
    pub(crate) fn new(core: Arc<HubCore<L>>, registration: Registration) -> Self {
        Self {
            id: registration.id,
            core,
            receiver: registration.receiver,
            activity: registration.activity,
            phase: Phase::Retry,
            initial_seq: 0,
        }
    }

    /// Subscriber handle
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next frame for the transport, or `None` once the stream has ended
    ///
    /// The stream ends when the hub dropped this subscriber (idle eviction or
    /// explicit unsubscribe). Cancel-safe between frames.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        match self.phase {
            Phase::Retry => {
                self.phase = Phase::Initial;
                self.activity.touch();
                return Some(StreamFrame::Retry(self.core.config().retry));
            }
            Phase::Initial => {
                self.phase = Phase::Live;
                match self.core.initial_payload().await {
                    Ok(published) => {
                        self.activity.touch();
                        self.initial_seq = published.seq;
                        return Some(StreamFrame::Data(published.payload));
                    }
                    Err(e) => {
                        tracing::warn!(
                            subscriber_id = %self.id,
                            error = %e,
                            "Initial snapshot unavailable, waiting for next broadcast"
                        );
                    }
                }
            }
            Phase::Live => {}
            Phase::Closed => return None,
        }

        let heartbeat = self.core.config().heartbeat;
        loop {
            match tokio::time::timeout(heartbeat, self.receiver.recv()).await {
                Ok(Some(published)) => {
                    self.activity.touch();
                    if published.seq <= self.initial_seq {
                        continue;
                    }
                    return Some(StreamFrame::Data(published.payload));
                }
                Ok(None) => {
                    tracing::debug!(subscriber_id = %self.id, "Realtime queue closed, ending stream");
                    self.phase = Phase::Closed;
                    return None;
                }
                Err(_) => return Some(StreamFrame::KeepAlive),
            }
        }
    }

    /// Convert into a stream of frames; dropping the stream unregisters
    pub fn into_stream(self) -> impl Stream<Item = StreamFrame> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .next_frame()
                .await
                .map(|frame| (frame, subscription))
        })
    }
}

impl<L: SnapshotLoader> Drop for Subscription<L> {
    fn drop(&mut self) {
        self.core.remove(self.id);
    }
}

impl<L: SnapshotLoader> fmt::Debug for Subscription<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::hub::{loader_fn, HubConfig, RealtimeHub};
    use futures::StreamExt;
    use serde_json::json;

    fn hub() -> RealtimeHub<impl SnapshotLoader> {
        RealtimeHub::new(
            HubConfig::default(),
            loader_fn(|| async { Ok(json!({ "sessions": 3 })) }),
        )
    }

    #[test]
    fn test_frame_wire_format() {
        assert_eq!(
            StreamFrame::Retry(Duration::from_millis(5000)).to_event_stream(),
            "retry: 5000\n\n"
        );
        assert_eq!(
            StreamFrame::Data(Arc::from("{\"a\":1}")).to_event_stream(),
            "data: {\"a\":1}\n\n"
        );
        assert_eq!(StreamFrame::KeepAlive.to_event_stream(), ": keep-alive\n\n");
    }

    #[tokio::test]
    async fn test_retry_then_initial_snapshot() {
        let hub = hub();
        let mut sub = hub.subscribe().unwrap();

        assert_eq!(
            sub.next_frame().await,
            Some(StreamFrame::Retry(Duration::from_millis(5000)))
        );
        let frame = sub.next_frame().await.unwrap();
        match frame {
            StreamFrame::Data(payload) => assert!(payload.contains("\"sessions\":3")),
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_after_heartbeat() {
        let hub = hub();
        let mut sub = hub.subscribe().unwrap();
        sub.next_frame().await;
        sub.next_frame().await;

        // Nothing broadcast: the paused clock jumps to the heartbeat deadline
        assert_eq!(sub.next_frame().await, Some(StreamFrame::KeepAlive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_snapshot_not_repeated_from_queue() {
        let hub = hub();
        let mut sub = hub.subscribe().unwrap();
        sub.next_frame().await;

        // The first broadcast lands in the queue and also becomes the latest
        hub.refresh().await.unwrap();
        let initial = sub.next_frame().await.unwrap();
        assert!(initial.is_data());

        assert_eq!(sub.next_frame().await, Some(StreamFrame::KeepAlive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcasts_older_than_initial_frame_are_skipped() {
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = calls.clone();
        let hub = RealtimeHub::new(
            HubConfig::default(),
            loader_fn(move || {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                async move { Ok(json!({ "generation": n })) }
            }),
        );
        let mut sub = hub.subscribe().unwrap();
        sub.next_frame().await;

        // Two broadcasts queue up before the initial frame is read
        hub.refresh().await.unwrap();
        hub.refresh().await.unwrap();

        match sub.next_frame().await.unwrap() {
            StreamFrame::Data(payload) => assert!(payload.contains("\"generation\":2")),
            other => panic!("expected data frame, got {other:?}"),
        }
        assert_eq!(sub.next_frame().await, Some(StreamFrame::KeepAlive));

        hub.refresh().await.unwrap();
        match sub.next_frame().await.unwrap() {
            StreamFrame::Data(payload) => assert!(payload.contains("\"generation\":3")),
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters() {
        let hub = hub();
        let sub = hub.subscribe().unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        let mut stream = Box::pin(sub.into_stream());
        assert!(stream.next().await.is_some());
        drop(stream);

        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_stream_ends() {
        let hub = hub();
        let mut sub = hub.subscribe().unwrap();
        sub.next_frame().await;
        sub.next_frame().await;

        hub.unsubscribe(sub.id());
        assert_eq!(sub.next_frame().await, None);
        assert_eq!(sub.next_frame().await, None);
    }
}
