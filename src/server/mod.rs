//! HTTP boundary for the analytics service
//!
//! Exposes cached analytics endpoints, a Prometheus scrape endpoint and the
//! realtime snapshot stream on top of axum.
//!
//! # Endpoints
//!
//! | Method | Path                         | Description                        |
//! |--------|------------------------------|------------------------------------|
//! | GET    | `/api/health`                | Liveness, hub and cache status     |
//! | GET    | `/metrics`                   | Prometheus text format             |
//! | GET    | `/api/realtime/metrics`      | `text/event-stream` of snapshots   |
//! | GET    | `/api/aggregate`             | Platform aggregate metrics         |
//! | GET    | `/api/trends/platform`       | Platform weekly trend report       |
//! | GET    | `/api/trends/profile/{id}`   | Weekly trend report for a profile  |
//! | GET    | `/api/stats/{id}`            | Totals and progress for a profile  |
//! | POST   | `/api/batch/profile-stats`   | Stats for many profiles at once    |
//! | GET    | `/api/metrics/grouped`       | Metrics grouped by one dimension   |
//! | GET    | `/api/export`                | Dataset as JSON envelope or CSV    |
//! | POST   | `/api/refresh`               | Refresh views, clear cache, push   |

pub mod api;
pub mod app;

pub use api::{
    create_router, ApiError, ApiResponse, ErrorResponse, ExportQuery, HealthResponse, RefreshResponse,
};
pub use app::{AnalyticsHub, AnalyticsServer, AppState, ResponseCache, ServerError, ServerInfo};
