//! CSV rendering of exported analytics datasets
//!
//! Each dataset flattens into rows tagged with a `section` column. Columns a
//! row does not use are left empty; nested values (progress buckets) are
//! written as inline JSON.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::models::{AggregateMetrics, ExportResource, ProfileStats, TrendReport};

type Row = HashMap<&'static str, String>;

/// A dataset that can be written as CSV
pub trait CsvExport {
    /// Header, in output order
    fn columns(&self) -> &'static [&'static str];

    fn rows(&self) -> Vec<Row>;
}

const PROFILE_STATS_COLUMNS: &[&str] = &[
    "section",
    "metric",
    "value",
    "weekStart",
    "completedSessions",
    "totalSessions",
    "totalVolume",
    "date",
    "totalEntries",
    "buckets",
];

const AGGREGATE_COLUMNS: &[&str] = &[
    "section",
    "metric",
    "value",
    "weekStart",
    "totalSessions",
    "completedSessions",
    "uniqueProfiles",
    "totalVolume",
    "exerciseKey",
    "usageCount",
];

const TREND_COLUMNS: &[&str] = &[
    "section",
    "profileId",
    "weekStart",
    "totalSessions",
    "completedSessions",
    "totalVolume",
    "insightMetric",
    "direction",
    "slope",
    "currentValue",
    "forecastValue",
    "confidence",
];

/// Render one cell; `null` is empty, strings are unquoted, the rest is JSON
fn cell(value: impl Serialize) -> String {
    match serde_json::to_value(value) {
        Ok(Value::Null) | Err(_) => String::new(),
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
    }
}

fn row<const N: usize>(section: &str, cells: [(&'static str, String); N]) -> Row {
    let mut row: Row = cells.into_iter().collect();
    row.insert("section", section.to_string());
    row
}

impl CsvExport for ProfileStats {
    fn columns(&self) -> &'static [&'static str] {
        PROFILE_STATS_COLUMNS
    }

    fn rows(&self) -> Vec<Row> {
        let totals = [
            ("totalSessions", cell(self.total_sessions)),
            ("totalExercises", cell(self.total_exercises)),
            ("averagePerformance", cell(self.average_performance)),
        ];
        let mut rows: Vec<Row> = totals
            .into_iter()
            .map(|(metric, value)| row("totals", [("metric", metric.to_string()), ("value", value)]))
            .collect();

        rows.extend(self.weekly_stats.iter().map(|week| {
            row(
                "weeklyStats",
                [
                    ("weekStart", cell(week.week_start)),
                    ("completedSessions", cell(week.completed_sessions)),
                    ("totalSessions", cell(week.total_sessions)),
                    ("totalVolume", cell(week.total_volume)),
                ],
            )
        }));

        rows.extend(self.progress_over_time.iter().map(|point| {
            row(
                "progressOverTime",
                [
                    ("date", cell(point.date)),
                    ("totalEntries", cell(point.total_entries)),
                    ("buckets", cell(&point.buckets)),
                ],
            )
        }));
        rows
    }
}

impl CsvExport for AggregateMetrics {
    fn columns(&self) -> &'static [&'static str] {
        AGGREGATE_COLUMNS
    }

    fn rows(&self) -> Vec<Row> {
        let summary = &self.summary;
        let totals = [
            ("totalProfiles", cell(summary.total_profiles)),
            ("activeProfiles7d", cell(summary.active_profiles_7d)),
            ("totalSessions", cell(summary.total_sessions)),
            ("completedSessions", cell(summary.completed_sessions)),
            ("totalVolume", cell(summary.total_volume)),
            ("averageVolumePerSession", cell(summary.average_volume_per_session)),
        ];
        let mut rows: Vec<Row> = totals
            .into_iter()
            .map(|(metric, value)| row("summary", [("metric", metric.to_string()), ("value", value)]))
            .collect();

        rows.extend(self.weekly_trends.iter().map(|week| {
            row(
                "weeklyTrends",
                [
                    ("weekStart", cell(week.week_start)),
                    ("totalSessions", cell(week.total_sessions)),
                    ("completedSessions", cell(week.completed_sessions)),
                    ("uniqueProfiles", cell(week.unique_profiles)),
                    ("totalVolume", cell(week.total_volume)),
                ],
            )
        }));

        rows.extend(self.top_exercises.iter().map(|exercise| {
            row(
                "topExercises",
                [
                    ("exerciseKey", exercise.exercise_key.clone()),
                    ("usageCount", cell(exercise.usage_count)),
                ],
            )
        }));
        rows
    }
}

impl CsvExport for TrendReport {
    fn columns(&self) -> &'static [&'static str] {
        TREND_COLUMNS
    }

    /// Profile reports repeat the profile id on every row
    fn rows(&self) -> Vec<Row> {
        let profile_id = cell(self.profile_id);

        let mut rows: Vec<Row> = self
            .weekly_series
            .iter()
            .map(|week| {
                row(
                    "weeklySeries",
                    [
                        ("profileId", profile_id.clone()),
                        ("weekStart", cell(week.week_start)),
                        ("totalSessions", cell(week.total_sessions)),
                        ("completedSessions", cell(week.completed_sessions)),
                        ("totalVolume", cell(week.total_volume)),
                    ],
                )
            })
            .collect();

        rows.extend(self.insights.iter().map(|insight| {
            row(
                "insights",
                [
                    ("profileId", profile_id.clone()),
                    ("insightMetric", insight.metric.clone()),
                    ("direction", insight.direction.to_string()),
                    ("slope", cell(insight.slope)),
                    ("currentValue", cell(insight.current_value)),
                    ("forecastValue", cell(insight.forecast_value)),
                    ("confidence", cell(insight.confidence)),
                ],
            )
        }));
        rows
    }
}

/// Write a dataset as CSV with a header row
pub fn to_csv(dataset: &impl CsvExport) -> Result<String> {
    let columns = dataset.columns();
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(columns)?;
    for row in dataset.rows() {
        writer.write_record(columns.iter().map(|column| row.get(column).map_or("", String::as_str)))?;
    }

    let bytes = writer.into_inner().context("flush CSV export")?;
    String::from_utf8(bytes).context("CSV export is not UTF-8")
}

/// Render a cached export payload as CSV
pub fn export_csv(resource: ExportResource, payload: &Value) -> Result<String> {
    let decode = || format!("decode {resource} export payload");

    match resource {
        ExportResource::ProfileStats => {
            to_csv(&serde_json::from_value::<ProfileStats>(payload.clone()).with_context(decode)?)
        }
        ExportResource::Aggregate => {
            to_csv(&serde_json::from_value::<AggregateMetrics>(payload.clone()).with_context(decode)?)
        }
        ExportResource::ProfileTrends | ExportResource::PlatformTrends => {
            to_csv(&serde_json::from_value::<TrendReport>(payload.clone()).with_context(decode)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProgressPoint, TopExercise, WeeklyPoint};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn week(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_cell_formats() {
        assert_eq!(cell(Option::<u64>::None), "");
        assert_eq!(cell(0.0_f64), "0.0");
        assert_eq!(cell(12_u64), "12");
        assert_eq!(cell("done"), "done");
        assert_eq!(cell(week(1)), "2024-01-01");
    }

    #[test]
    fn test_profile_stats_csv() {
        let stats = ProfileStats {
            total_sessions: 4,
            total_exercises: 9,
            average_performance: 0.5,
            weekly_stats: vec![WeeklyPoint::new(week(1), 4, 3, 500)],
            progress_over_time: vec![ProgressPoint {
                date: week(2),
                total_entries: 2,
                buckets: [("strength".to_string(), 2)].into_iter().collect(),
            }],
        };

        let csv = to_csv(&stats).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "section,metric,value,weekStart,completedSessions,totalSessions,totalVolume,date,totalEntries,buckets"
        );
        assert_eq!(lines[1], "totals,totalSessions,4,,,,,,,");
        assert_eq!(lines[3], "totals,averagePerformance,0.5,,,,,,,");
        assert_eq!(lines[4], "weeklyStats,,,2024-01-01,3,4,500,,,");
        assert_eq!(lines[5], r#"progressOverTime,,,,,,,2024-01-02,2,"{""strength"":2}""#);
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn test_aggregate_csv_sections() {
        let mut aggregate = AggregateMetrics::default();
        aggregate.top_exercises.push(TopExercise {
            exercise_key: "squat".to_string(),
            usage_count: 7,
        });

        let csv = to_csv(&aggregate).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 1 + 6 + 1);
        assert_eq!(lines[1], "summary,totalProfiles,0,,,,,,,");
        assert_eq!(lines[6], "summary,averageVolumePerSession,0.0,,,,,,,");
        assert_eq!(lines[7], "topExercises,,,,,,,,squat,7");
    }

    #[test]
    fn test_trend_csv_carries_profile_id() {
        let id = Uuid::nil();
        let report = TrendReport::profile(
            id,
            vec![
                WeeklyPoint::new(week(1), 2, 1, 100),
                WeeklyPoint::new(week(8), 4, 2, 200),
            ],
        );

        let csv = to_csv(&report).unwrap();
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows.len(), 2 + report.insights.len());
        assert!(rows.iter().all(|row| row.contains(&id.to_string())));
        assert!(rows[2].starts_with(&format!("insights,{id},,,,,totalSessions,up,")));

        let platform = to_csv(&TrendReport::platform(vec![WeeklyPoint::new(week(1), 2, 1, 100)])).unwrap();
        assert!(platform.lines().nth(1).unwrap().starts_with("weeklySeries,,2024-01-01,"));
    }

    #[test]
    fn test_export_csv_rejects_mismatched_payload() {
        let err = export_csv(ExportResource::ProfileStats, &serde_json::json!([1, 2])).unwrap_err();
        assert!(format!("{err:#}").contains("decode profile_stats export payload"));
    }
}
