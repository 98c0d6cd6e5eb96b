//! Analytics server implementation
//!
//! Wires the aggregation store, the response cache and the realtime hub
//! into one axum application, and owns the hub's lifecycle around serving.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::AsyncTtlCache;
use crate::config::Config;
use crate::realtime::RealtimeHub;
use crate::store::{AggregationStore, FixtureStore, StoreSnapshotLoader};

use super::api::create_router;

/// Cache of serialized API responses
pub type ResponseCache = AsyncTtlCache<serde_json::Value>;

/// Realtime hub broadcasting store snapshots
pub type AnalyticsHub = RealtimeHub<StoreSnapshotLoader>;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Aggregation store
    pub store: Arc<dyn AggregationStore>,

    /// Response cache
    pub cache: Arc<ResponseCache>,

    /// Realtime hub
    pub hub: Arc<AnalyticsHub>,

    /// Configuration
    pub config: Arc<Config>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Build the cache and hub around a store
    pub fn new(config: Config, store: Arc<dyn AggregationStore>) -> Self {
        let cache = Arc::new(AsyncTtlCache::new(config.to_cache_config()));
        let hub = Arc::new(RealtimeHub::new(
            config.to_hub_config(),
            StoreSnapshotLoader::new(store.clone()),
        ));

        Self {
            store,
            cache,
            hub,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Analytics Server
// ============================================================================

/// Main analytics server
pub struct AnalyticsServer {
    state: AppState,
}

impl AnalyticsServer {
    /// Create a server around an existing store
    pub fn new(config: Config, store: Arc<dyn AggregationStore>) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            state: AppState::new(config, store),
        })
    }

    /// Create a server whose store comes from the configured fixture
    pub async fn from_config(config: Config) -> Result<Self, ServerError> {
        let store: Arc<dyn AggregationStore> = match &config.store.fixture_path {
            Some(path) => Arc::new(
                FixtureStore::from_file(path)
                    .await
                    .map_err(|e| ServerError::Init(format!("{e:#}")))?,
            ),
            None => {
                tracing::warn!("No fixture configured, serving an empty aggregation store");
                Arc::new(FixtureStore::empty())
            }
        };

        Self::new(config, store)
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.state.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.state.config.server.enable_request_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Bind the configured address and serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already-bound listener
    ///
    /// The realtime hub runs for exactly as long as the server does. When
    /// `shutdown_signal` resolves the hub is stopped first, which ends every
    /// open realtime stream and lets in-flight connections drain.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let local_addr = listener.local_addr().map_err(ServerError::Serve)?;

        self.state.hub.start();
        tracing::info!(%local_addr, "Analytics server listening");

        // Open event streams would keep graceful shutdown waiting forever,
        // so the hub is stopped (closing every stream) as soon as the signal fires
        let hub = self.state.hub.clone();
        let shutdown = async move {
            shutdown_signal.await;
            tracing::info!("Shutdown requested, closing realtime streams");
            hub.stop().await;
        };

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve);

        self.state.hub.stop().await;
        tracing::info!("Analytics server shutdown complete");
        result
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        let config = &self.state.config;
        ServerInfo {
            bind_address: config.bind_addr(),
            max_subscribers: self.state.hub.config().max_subscribers,
            update_interval_secs: self.state.hub.config().update_interval.as_secs(),
            cache_max_entries: self.state.cache.config().max_entries,
            cors_enabled: config.server.enable_cors,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: String,
    pub max_subscribers: usize,
    pub update_interval_secs: u64,
    pub cache_max_entries: usize,
    pub cors_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Analytics Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Realtime Subscribers: {} max\n\
             Realtime Interval: {}s\n\
             Cache Entries: {} max\n\
             CORS: {}",
            "",
            self.bind_address,
            self.max_subscribers,
            self.update_interval_secs,
            self.cache_max_entries,
            if self.cors_enabled { "enabled" } else { "disabled" },
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::HubState;

    fn server() -> AnalyticsServer {
        AnalyticsServer::new(Config::default(), Arc::new(FixtureStore::empty())).unwrap()
    }

    #[test]
    fn test_server_rejects_invalid_config() {
        let mut config = Config::default();
        config.realtime.max_clients = 0;
        let result = AnalyticsServer::new(config, Arc::new(FixtureStore::empty()));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_server_info() {
        let info = server().info();
        assert_eq!(info.bind_address, "0.0.0.0:3004");
        assert_eq!(info.max_subscribers, 100);
        assert!(info.cors_enabled);
        assert!(info.display().contains("Analytics Server"));
    }

    #[tokio::test]
    async fn test_from_config_without_fixture() {
        let server = AnalyticsServer::from_config(Config::default()).await.unwrap();
        let aggregate = server.state().store.aggregate_metrics().await.unwrap();
        assert_eq!(aggregate.summary.total_sessions, 0);
    }

    #[tokio::test]
    async fn test_from_config_missing_fixture() {
        let mut config = Config::default();
        config.store.fixture_path = Some("/nonexistent/fixture.json".into());
        let result = AnalyticsServer::from_config(config).await;
        assert!(matches!(result, Err(ServerError::Init(_))));
    }

    #[tokio::test]
    async fn test_serve_owns_hub_lifecycle() {
        let server = server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        server.serve(listener, async {}).await.unwrap();
        assert_eq!(server.state().hub.state(), HubState::Stopped);
    }
}
