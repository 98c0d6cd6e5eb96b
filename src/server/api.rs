//! REST and streaming handlers for the analytics server

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Path, Query, Request, State},
    http::{header, HeaderName, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::{
    export_csv, grouped_metrics_key, profile_stats_key, profile_trends_key, PLATFORM_AGGREGATE_KEY,
    PLATFORM_TRENDS_KEY,
};
use crate::cache::CacheStats;
use crate::error::{Error, ErrorCategory, TrendcastErrorTrait};
use crate::metrics;
use crate::models::{
    AnalyticsFilters, BatchStatsRequest, BatchStatsResponse, ExportEnvelope, ExportFormat,
    ExportResource, GroupBy, GroupedMetricsResponse, ProfileStats, SessionStatus, TrendReport,
};
use crate::realtime::{HubState, RefreshOutcome};

use super::app::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub hub_state: HubState,
    pub subscribers: usize,
    pub cache_entries: usize,
    pub cache: CacheStats,
}

/// Result of `POST /api/refresh`
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub cache_cleared: bool,
    pub broadcast: bool,
    pub delivered: usize,
    pub evicted: usize,
}

impl From<RefreshOutcome> for RefreshResponse {
    fn from(outcome: RefreshOutcome) -> Self {
        match outcome {
            RefreshOutcome::Skipped => Self {
                cache_cleared: true,
                broadcast: false,
                delivered: 0,
                evicted: 0,
            },
            RefreshOutcome::Broadcast { delivered, evicted } => Self {
                cache_cleared: true,
                broadcast: true,
                delivered,
                evicted,
            },
        }
    }
}

/// Query string of `GET /api/metrics/grouped`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedQuery {
    pub group_by: GroupBy,
    pub profile_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub discipline_id: Option<Uuid>,
    pub status: Option<SessionStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl GroupedQuery {
    fn into_parts(self) -> (GroupBy, AnalyticsFilters) {
        (
            self.group_by,
            AnalyticsFilters {
                profile_id: self.profile_id,
                program_id: self.program_id,
                discipline_id: self.discipline_id,
                status: self.status,
                date_from: self.date_from,
                date_to: self.date_to,
            },
        )
    }
}

/// Query string of `GET /api/export`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub resource: ExportResource,
    #[serde(default)]
    pub format: ExportFormat,
    pub profile_id: Option<String>,
}

impl ExportQuery {
    /// Parsed `profileId`, which profile resources cannot do without
    fn required_profile_id(&self) -> Result<Uuid, Error> {
        match self.profile_id.as_deref().map(str::trim) {
            None | Some("") => Err(Error::validation(
                "profileId is required for the selected resource",
            )),
            Some(id) => parse_profile_id(id),
        }
    }
}

fn parse_profile_id(id: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(id).map_err(|_| Error::validation(format!("Invalid profile ID: {id}")))
}

// ============================================================================
// Errors
// ============================================================================

/// Error returned by handlers, mapped to a status by its category
#[derive(Debug)]
pub struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::Capacity | ErrorCategory::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.0.category() {
            ErrorCategory::Capacity => "Realtime capacity reached".to_string(),
            ErrorCategory::Unavailable => "Service is shutting down".to_string(),
            ErrorCategory::Validation => self.0.to_string(),
            _ => {
                tracing::error!(error = %self.0, "Request failed");
                "Internal server error".to_string()
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Operational endpoints
        .route("/api/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        // Realtime stream
        .route("/api/realtime/metrics", get(realtime_metrics))
        // Cached analytics
        .route("/api/aggregate", get(aggregate))
        .route("/api/trends/platform", get(platform_trends))
        .route("/api/trends/profile/{id}", get(profile_trends))
        .route("/api/stats/{id}", get(profile_stats))
        .route("/api/batch/profile-stats", post(batch_profile_stats))
        .route("/api/metrics/grouped", get(grouped_metrics))
        .route("/api/export", get(export))
        .route("/api/refresh", post(refresh))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Record request count and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Operational Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        hub_state: state.hub.state(),
        subscribers: state.hub.subscriber_count(),
        cache_entries: state.cache.len().await,
        cache: state.cache.stats(),
    }))
}

/// Prometheus scrape endpoint
async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to encode metrics")),
            )
                .into_response()
        }
    }
}

/// Refresh store views, drop cached responses and push a fresh snapshot
async fn refresh(State(state): State<AppState>) -> ApiResult<Json<ApiResponse<RefreshResponse>>> {
    state.store.refresh_views().await?;
    state.cache.clear().await;
    let outcome = state.hub.refresh().await?;

    tracing::info!(?outcome, "Analytics views refreshed");
    Ok(Json(ApiResponse::success(RefreshResponse::from(outcome))))
}

// ============================================================================
// Realtime Handler
// ============================================================================

/// Server-sent event stream of analytics snapshots
///
/// The subscription is dropped together with the response body, which
/// unregisters it when the client disconnects.
async fn realtime_metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let subscription = state.hub.subscribe()?;
    tracing::debug!(subscriber_id = %subscription.id(), "Realtime stream opened");

    let frames = subscription
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(frame.to_event_stream()));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

// ============================================================================
// Cached Loads
// ============================================================================

async fn load_aggregate(state: &AppState) -> ApiResult<serde_json::Value> {
    state
        .cache
        .remember(
            PLATFORM_AGGREGATE_KEY,
            || async {
                let aggregate = state.store.aggregate_metrics().await?;
                Ok::<_, ApiError>(serde_json::to_value(aggregate)?)
            },
            Some(state.config.cache.aggregate_ttl()),
        )
        .await
}

async fn load_platform_trends(state: &AppState) -> ApiResult<serde_json::Value> {
    state
        .cache
        .remember(
            PLATFORM_TRENDS_KEY,
            || async {
                let weekly = state.store.platform_weekly().await?;
                Ok::<_, ApiError>(serde_json::to_value(TrendReport::platform(weekly))?)
            },
            Some(state.config.cache.trends_ttl()),
        )
        .await
}

async fn load_profile_trends(state: &AppState, profile_id: Uuid) -> ApiResult<serde_json::Value> {
    state
        .cache
        .remember(
            &profile_trends_key(profile_id),
            || async {
                let weekly = state.store.profile_weekly(profile_id).await?;
                Ok::<_, ApiError>(serde_json::to_value(TrendReport::profile(profile_id, weekly))?)
            },
            Some(state.config.cache.profile_ttl()),
        )
        .await
}

async fn load_profile_stats(state: &AppState, profile_id: Uuid) -> ApiResult<serde_json::Value> {
    state
        .cache
        .remember(
            &profile_stats_key(profile_id),
            || async {
                let stats = state.store.profile_stats(profile_id).await?;
                Ok::<_, ApiError>(serde_json::to_value(stats)?)
            },
            Some(state.config.cache.profile_ttl()),
        )
        .await
}

// ============================================================================
// Analytics Handlers
// ============================================================================

/// Platform aggregate metrics
async fn aggregate(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(load_aggregate(&state).await?))
}

/// Platform-wide weekly trend report
async fn platform_trends(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(load_platform_trends(&state).await?))
}

/// Weekly trend report for one profile
async fn profile_trends(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let profile_id = parse_profile_id(&id)?;
    Ok(Json(load_profile_trends(&state, profile_id).await?))
}

/// Totals, weekly stats and progress for one profile
async fn profile_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let profile_id = parse_profile_id(&id)?;
    Ok(Json(load_profile_stats(&state, profile_id).await?))
}

/// Stats for many profiles
///
/// Cached profiles are answered from the cache; the rest are fetched with
/// one store query and cached individually. At most `batch_profile_limit`
/// distinct ids are answered.
async fn batch_profile_stats(
    State(state): State<AppState>,
    Json(request): Json<BatchStatsRequest>,
) -> ApiResult<Json<BatchStatsResponse>> {
    let unique_ids = request.unique_ids();
    if unique_ids.is_empty() {
        return Err(Error::validation("profileIds must not be empty").into());
    }

    let limit = state.config.cache.batch_profile_limit;
    let mut results: BTreeMap<Uuid, ProfileStats> = BTreeMap::new();
    let mut missing = Vec::new();

    for &profile_id in unique_ids.iter().take(limit) {
        match state.cache.get(&profile_stats_key(profile_id)).await {
            Some(cached) => {
                results.insert(profile_id, serde_json::from_value(cached)?);
            }
            None => missing.push(profile_id),
        }
    }
    let cache_hits = results.len();

    if !missing.is_empty() {
        let mut batch = {
            let _timer = metrics::start_loader_timer("profile_stats_batch");
            state.store.profile_stats_batch(&missing).await?
        };

        let ttl = state.config.cache.profile_ttl();
        for profile_id in missing {
            let stats = batch.remove(&profile_id).unwrap_or_default();
            state
                .cache
                .set(profile_stats_key(profile_id), serde_json::to_value(&stats)?, Some(ttl))
                .await;
            results.insert(profile_id, stats);
        }
    }

    tracing::debug!(
        requested = unique_ids.len(),
        processed = results.len(),
        cache_hits,
        "Batch profile stats served"
    );

    Ok(Json(BatchStatsResponse {
        requested: unique_ids.len(),
        processed: results.len(),
        limit,
        results,
    }))
}

/// Cached dataset as a JSON envelope or a CSV attachment
async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let resource = query.resource;
    let mut metadata = BTreeMap::from([("resource".to_string(), resource.to_string())]);

    let data = match resource {
        ExportResource::Aggregate => load_aggregate(&state).await?,
        ExportResource::PlatformTrends => load_platform_trends(&state).await?,
        ExportResource::ProfileStats | ExportResource::ProfileTrends => {
            let profile_id = query.required_profile_id()?;
            metadata.insert("profileId".to_string(), profile_id.to_string());
            if resource == ExportResource::ProfileStats {
                load_profile_stats(&state, profile_id).await?
            } else {
                load_profile_trends(&state, profile_id).await?
            }
        }
    };

    let generated_at = Utc::now();
    tracing::debug!(%resource, format = ?query.format, "Analytics export served");

    match query.format {
        ExportFormat::Csv => {
            let body = export_csv(resource, &data)?;
            let filename = format!("{resource}-{}.csv", generated_at.format("%Y%m%dT%H%M%SZ"));
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, format!("attachment; filename={filename}")),
                    (HeaderName::from_static("x-export-resource"), resource.to_string()),
                ],
                body,
            )
                .into_response())
        }
        ExportFormat::Json => Ok(Json(ExportEnvelope {
            resource,
            format: ExportFormat::Json,
            generated_at,
            metadata,
            data,
        })
        .into_response()),
    }
}

/// Metrics grouped by one dimension
async fn grouped_metrics(
    State(state): State<AppState>,
    Query(query): Query<GroupedQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let (group_by, filters) = query.into_parts();
    filters.validate().map_err(Error::validation)?;

    let ttl = state.config.cache.grouped_ttl();
    let limit = state.config.cache.grouped_results_limit;
    let key = grouped_metrics_key(group_by, &filters);

    let value = state
        .cache
        .remember(
            &key,
            || async {
                let results = state.store.grouped_metrics(group_by, &filters, limit).await?;
                let response = GroupedMetricsResponse {
                    group_by,
                    generated_at: Utc::now(),
                    applied_filters: filters.clone(),
                    results,
                };
                Ok::<_, ApiError>(serde_json::to_value(response)?)
            },
            Some(ttl),
        )
        .await?;

    Ok(Json(value))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RealtimeError;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert!(response.data.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::new("test error");
        assert!(!response.success);
        assert_eq!(response.error, "test error");
    }

    #[test]
    fn test_api_error_status_mapping() {
        let capacity: ApiError = RealtimeError::CapacityExceeded { current: 1, max: 1 }.into();
        assert_eq!(capacity.status(), StatusCode::SERVICE_UNAVAILABLE);

        let invalid: ApiError = Error::validation("bad").into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let internal: ApiError = anyhow::anyhow!("db down").into();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_refresh_response_from_outcome() {
        let skipped = RefreshResponse::from(RefreshOutcome::Skipped);
        assert!(skipped.cache_cleared);
        assert!(!skipped.broadcast);

        let sent = RefreshResponse::from(RefreshOutcome::Broadcast { delivered: 3, evicted: 1 });
        assert!(sent.broadcast);
        assert_eq!(sent.delivered, 3);
        assert_eq!(sent.evicted, 1);
    }

    #[test]
    fn test_grouped_query_into_parts() {
        let query = GroupedQuery {
            group_by: GroupBy::Week,
            profile_id: None,
            program_id: None,
            discipline_id: None,
            status: Some(SessionStatus::Done),
            date_from: None,
            date_to: None,
        };
        let (group_by, filters) = query.into_parts();
        assert_eq!(group_by, GroupBy::Week);
        assert_eq!(filters.status, Some(SessionStatus::Done));
    }

    #[test]
    fn test_export_query_profile_id() {
        let mut query = ExportQuery {
            resource: ExportResource::ProfileStats,
            format: ExportFormat::Csv,
            profile_id: None,
        };
        let missing = query.required_profile_id().unwrap_err();
        assert!(missing.to_string().contains("profileId is required"));

        query.profile_id = Some("  ".to_string());
        assert!(query.required_profile_id().is_err());

        query.profile_id = Some("nope".to_string());
        assert!(query.required_profile_id().unwrap_err().to_string().contains("Invalid profile ID"));

        query.profile_id = Some(Uuid::nil().to_string());
        assert_eq!(query.required_profile_id().unwrap(), Uuid::nil());
    }
}
