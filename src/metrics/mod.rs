//! Prometheus metrics for the trendcast service
//!
//! This module provides metrics tracking for:
//! - Cache: hits, misses, loader failures, evictions
//! - Realtime hub: subscriber count, broadcasts, refresh failures, rejections
//! - HTTP API: request counts and latency per endpoint
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for cache and loader metrics
struct CacheMetrics {
    lookups: CounterVec,
    load_failures: CounterVec,
    evictions: CounterVec,
    load_duration: HistogramVec,
}

/// Container for realtime hub and API metrics
struct ServiceMetrics {
    subscribers: Gauge,
    broadcasts: Counter,
    deliveries: Counter,
    evicted_subscribers: Counter,
    refresh_failures: Counter,
    capacity_rejections: Counter,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

static CACHE_METRICS: OnceLock<CacheMetrics> = OnceLock::new();

static SERVICE_METRICS: OnceLock<ServiceMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = trendcast::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let cache = CacheMetrics {
        lookups: register_counter_vec!(
            "trendcast_cache_lookups_total",
            "Cache lookups by namespace and result",
            &["namespace", "result"]
        )?,
        load_failures: register_counter_vec!(
            "trendcast_cache_load_failures_total",
            "Loader invocations that returned an error",
            &["namespace"]
        )?,
        evictions: register_counter_vec!(
            "trendcast_cache_evictions_total",
            "Entries evicted to stay within capacity",
            &["namespace"]
        )?,
        load_duration: register_histogram_vec!(
            "trendcast_loader_duration_seconds",
            "Time spent in cache and snapshot loaders",
            &["source"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let service = ServiceMetrics {
        subscribers: register_gauge!(
            "trendcast_realtime_subscribers",
            "Number of connected realtime subscribers"
        )?,
        broadcasts: register_counter!(
            "trendcast_realtime_broadcasts_total",
            "Snapshots broadcast by the refresh loop"
        )?,
        deliveries: register_counter!(
            "trendcast_realtime_deliveries_total",
            "Snapshot messages queued for subscribers"
        )?,
        evicted_subscribers: register_counter!(
            "trendcast_realtime_evicted_subscribers_total",
            "Subscribers dropped for inactivity or a closed queue"
        )?,
        refresh_failures: register_counter!(
            "trendcast_realtime_refresh_failures_total",
            "Refresh cycles that failed to load or serialize a snapshot"
        )?,
        capacity_rejections: register_counter!(
            "trendcast_realtime_capacity_rejections_total",
            "Subscriptions rejected because the hub was full"
        )?,
        api_requests: register_counter_vec!(
            "trendcast_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "trendcast_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    CACHE_METRICS
        .set(cache)
        .map_err(|_| "Cache metrics already initialized")?;
    SERVICE_METRICS
        .set(service)
        .map_err(|_| "Service metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CACHE_METRICS.get().is_some() && SERVICE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a cache lookup
pub fn record_cache_lookup(namespace: &str, hit: bool) {
    if let Some(m) = CACHE_METRICS.get() {
        let result = if hit { "hit" } else { "miss" };
        m.lookups.with_label_values(&[namespace, result]).inc();
    }
}

/// Record a failed cache loader invocation
pub fn record_cache_load_failure(namespace: &str) {
    if let Some(m) = CACHE_METRICS.get() {
        m.load_failures.with_label_values(&[namespace]).inc();
    }
}

/// Record capacity evictions
pub fn record_cache_evictions(namespace: &str, count: u64) {
    if let Some(m) = CACHE_METRICS.get() {
        m.evictions
            .with_label_values(&[namespace])
            .inc_by(count as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a loader timer (returns a timer handle)
pub fn start_loader_timer(source: &str) -> MetricsTimer {
    match CACHE_METRICS.get() {
        Some(m) => MetricsTimer::new(m.load_duration.with_label_values(&[source]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Update the connected subscriber gauge
pub fn set_realtime_subscribers(count: usize) {
    if let Some(m) = SERVICE_METRICS.get() {
        m.subscribers.set(count as f64);
    }
}

/// Record one broadcast and its fan-out
pub fn record_broadcast(delivered: usize, evicted: usize) {
    let Some(m) = SERVICE_METRICS.get() else {
        return;
    };

    m.broadcasts.inc();
    if delivered > 0 {
        m.deliveries.inc_by(delivered as f64);
    }
    if evicted > 0 {
        m.evicted_subscribers.inc_by(evicted as f64);
    }
}

/// Record a failed refresh cycle
pub fn record_refresh_failure() {
    if let Some(m) = SERVICE_METRICS.get() {
        m.refresh_failures.inc();
    }
}

/// Record a subscription rejected at capacity
pub fn record_capacity_rejection() {
    if let Some(m) = SERVICE_METRICS.get() {
        m.capacity_rejections.inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = SERVICE_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok());

        // Idempotent
        let result2 = init_metrics();
        assert!(result2.is_ok());
    }

    #[test]
    fn test_metrics_initialized() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_cache_lookup("encode", true);
        let text = encode_metrics().unwrap();
        assert!(text.contains("trendcast_cache_lookups_total"));
    }

    #[test]
    fn test_cache_recording() {
        ensure_metrics_initialized();
        record_cache_lookup("test", true);
        record_cache_lookup("test", false);
        record_cache_load_failure("test");
        record_cache_evictions("test", 3);
        let _timer = start_loader_timer("test");
    }

    #[test]
    fn test_realtime_recording() {
        ensure_metrics_initialized();
        set_realtime_subscribers(4);
        record_broadcast(4, 1);
        record_refresh_failure();
        record_capacity_rejection();
    }

    #[test]
    fn test_api_request_recording() {
        ensure_metrics_initialized();
        record_api_request("/api/health", 200, 0.005);
    }
}
