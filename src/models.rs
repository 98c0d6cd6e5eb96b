// Core data structures for trendcast analytics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::analytics::{build_weekly_insights, TrendInsight};

/// One week of session aggregates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPoint {
    pub week_start: NaiveDate,
    #[serde(default)]
    pub completed_sessions: u64,
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_volume: u64,
}

impl WeeklyPoint {
    pub fn new(week_start: NaiveDate, total_sessions: u64, completed_sessions: u64, total_volume: u64) -> Self {
        Self {
            week_start,
            completed_sessions,
            total_sessions,
            total_volume,
        }
    }
}

/// Training session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Planned,
    InProgress,
    Done,
    Skipped,
}

impl SessionStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Grouping dimension for grouped metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Status,
    Discipline,
    Program,
    Week,
    Profile,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Discipline => "discipline",
            Self::Program => "program",
            Self::Week => "week",
            Self::Profile => "profile",
        }
    }

    /// All grouping dimensions
    pub fn all() -> &'static [GroupBy] {
        &[
            Self::Status,
            Self::Discipline,
            Self::Program,
            Self::Week,
            Self::Profile,
        ]
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|group| group.as_str() == s)
            .ok_or_else(|| format!("unknown groupBy dimension: {s}"))
    }
}

/// Filters applied to aggregate queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsFilters {
    pub profile_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub discipline_id: Option<Uuid>,
    pub status: Option<SessionStatus>,
    /// Start date (inclusive)
    pub date_from: Option<NaiveDate>,
    /// End date (inclusive)
    pub date_to: Option<NaiveDate>,
}

impl AnalyticsFilters {
    /// Reject inverted date ranges
    pub fn validate(&self) -> Result<(), String> {
        match (self.date_from, self.date_to) {
            (Some(from), Some(to)) if to < from => {
                Err("dateTo must be greater than or equal to dateFrom".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Platform-wide summary counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSummary {
    pub total_profiles: u64,
    pub active_profiles_7d: u64,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub total_volume: u64,
    pub average_volume_per_session: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateWeeklyTrend {
    pub week_start: NaiveDate,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub unique_profiles: u64,
    pub total_volume: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopExercise {
    pub exercise_key: String,
    pub usage_count: u64,
}

/// Platform aggregate metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    pub summary: AggregateSummary,
    #[serde(default)]
    pub weekly_trends: Vec<AggregateWeeklyTrend>,
    #[serde(default)]
    pub top_exercises: Vec<TopExercise>,
}

/// Scope of a trend report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendScope {
    Platform,
    Profile,
}

/// Weekly series plus the insights derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub scope: TrendScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<Uuid>,
    pub generated_at: DateTime<Utc>,
    pub window_weeks: usize,
    pub weekly_series: Vec<WeeklyPoint>,
    pub insights: Vec<TrendInsight>,
}

impl TrendReport {
    /// Build a platform-wide report
    pub fn platform(weekly_series: Vec<WeeklyPoint>) -> Self {
        Self::build(TrendScope::Platform, None, weekly_series)
    }

    /// Build a report for one profile
    pub fn profile(profile_id: Uuid, weekly_series: Vec<WeeklyPoint>) -> Self {
        Self::build(TrendScope::Profile, Some(profile_id), weekly_series)
    }

    fn build(scope: TrendScope, profile_id: Option<Uuid>, weekly_series: Vec<WeeklyPoint>) -> Self {
        let insights = build_weekly_insights(&weekly_series);
        Self {
            scope,
            profile_id,
            generated_at: Utc::now(),
            window_weeks: weekly_series.len(),
            weekly_series,
            insights,
        }
    }
}

/// Payload broadcast by the realtime hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSnapshot {
    pub aggregate: AggregateMetrics,
    pub platform_trends: Vec<WeeklyPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedMetricEntry {
    pub key: String,
    pub label: String,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub unique_profiles: u64,
    pub total_volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedMetricsResponse {
    pub group_by: GroupBy,
    pub generated_at: DateTime<Utc>,
    pub applied_filters: AnalyticsFilters,
    pub results: Vec<GroupedMetricEntry>,
}

/// Logged entries for one day, counted per bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPoint {
    pub date: NaiveDate,
    pub total_entries: u64,
    #[serde(default)]
    pub buckets: BTreeMap<String, u64>,
}

/// Totals, weekly stats and daily progress for one profile
///
/// The default value is what an unknown profile reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStats {
    pub total_sessions: u64,
    pub total_exercises: u64,
    pub average_performance: f64,
    #[serde(default)]
    pub weekly_stats: Vec<WeeklyPoint>,
    #[serde(default)]
    pub progress_over_time: Vec<ProgressPoint>,
}

/// Body of `POST /api/batch/profile-stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatsRequest {
    pub profile_ids: Vec<Uuid>,
}

impl BatchStatsRequest {
    /// Requested ids with duplicates removed, first occurrence kept
    pub fn unique_ids(&self) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        self.profile_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatsResponse {
    /// Distinct ids in the request
    pub requested: usize,
    /// Ids answered, at most `limit`
    pub processed: usize,
    pub limit: usize,
    pub results: BTreeMap<Uuid, ProfileStats>,
}

/// Dataset served by `GET /api/export`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportResource {
    ProfileStats,
    Aggregate,
    ProfileTrends,
    PlatformTrends,
}

impl ExportResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileStats => "profile_stats",
            Self::Aggregate => "aggregate",
            Self::ProfileTrends => "profile_trends",
            Self::PlatformTrends => "platform_trends",
        }
    }

    /// Whether the export needs a `profileId`
    pub fn requires_profile(&self) -> bool {
        matches!(self, Self::ProfileStats | Self::ProfileTrends)
    }
}

impl fmt::Display for ExportResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

/// JSON export wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub resource: ExportResource,
    pub format: ExportFormat,
    pub generated_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    pub data: serde_json::Value,
}
