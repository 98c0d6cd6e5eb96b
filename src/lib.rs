//! trendcast - Analytics caching, trend insights and realtime broadcasting
//!
//! Serves frequently requested analytics cheaply, fits defensible trend
//! forecasts to short weekly series, and fans live snapshots out to many
//! long-lived streaming subscribers.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`cache`] - In-memory TTL cache with single-flight loading
//! - [`analytics`] - Trend insight engine and cache-key derivation
//! - [`realtime`] - Periodic snapshot broadcast hub with bounded subscribers
//! - [`store`] - Aggregation store trait and JSON fixture implementation
//! - [`server`] - axum HTTP boundary
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`error`] - Unified error handling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trendcast::config::Config;
//! use trendcast::server::AnalyticsServer;
//! use trendcast::store::FixtureStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = AnalyticsServer::new(Config::from_env(), Arc::new(FixtureStore::empty()))?;
//!     server.start_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod realtime;
pub mod server;
pub mod store;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analytics::{build_weekly_insights, linear_trend_insight, TrendDirection, TrendInsight};
    pub use crate::cache::{AsyncTtlCache, CacheConfig, CacheStats};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, TrendcastErrorTrait};
    pub use crate::models::{AnalyticsFilters, GroupBy, TrendReport, WeeklyPoint};
    pub use crate::realtime::{loader_fn, HubConfig, RealtimeError, RealtimeHub, SnapshotLoader, StreamFrame};
    pub use crate::store::{AggregationStore, FixtureStore};
}

// Direct re-exports for convenience
pub use cache::AsyncTtlCache;
pub use realtime::RealtimeHub;
