//! Analytics module for trend insights, exports and cache-key derivation

pub mod export;
pub mod insights;
pub mod keys;

pub use export::{export_csv, to_csv, CsvExport};
pub use insights::{
    build_weekly_insights, completion_percentage, compute_insights, linear_trend_insight,
    MetricSeries, TrendDirection, TrendInsight,
};
pub use keys::{
    grouped_metrics_key, profile_stats_key, profile_trends_key, PLATFORM_AGGREGATE_KEY,
    PLATFORM_TRENDS_KEY,
};
