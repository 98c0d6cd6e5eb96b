//! Realtime snapshot broadcasting
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              RealtimeHub                 │
//! │                                          │
//! │  refresh loop (every update_interval)    │
//! │    ├─ no subscribers → skip loader       │
//! │    ├─ loader → envelope → JSON (once)    │
//! │    └─ push Arc<str> to every queue,      │
//! │       dropping idle subscribers          │
//! │                                          │
//! │  SubscriberRegistry (bounded, locked)    │
//! └──────────────────────────────────────────┘
//!            │ unbounded queue per subscriber
//!            ▼
//!   Subscription: retry → latest → data / keep-alive …
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trendcast::realtime::{loader_fn, HubConfig, RealtimeHub};
//!
//! let hub = RealtimeHub::new(HubConfig::default(), loader_fn(|| async {
//!     Ok(serde_json::json!({ "activeProfiles": 12 }))
//! }));
//! hub.start();
//! let mut subscription = hub.subscribe()?;
//! while let Some(frame) = subscription.next_frame().await {
//!     print!("{}", frame.to_event_stream());
//! }
//! hub.stop().await;
//! ```

pub mod error;
pub mod hub;
pub mod stream;
pub mod subscriber;

pub use error::{RealtimeError, RealtimeResult};
pub use hub::{
    loader_fn, FnLoader, HubConfig, HubState, RealtimeHub, RefreshOutcome, SnapshotEnvelope,
    SnapshotLoader, DEFAULT_RETRY, SNAPSHOT_EVENT,
};
pub use stream::{StreamFrame, Subscription};
pub use subscriber::SubscriberId;
