//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde_json::json;
use trendcast::models::{
    AggregateMetrics, AggregateSummary, GroupBy, GroupedMetricEntry, ProfileStats, ProgressPoint,
    WeeklyPoint,
};
use trendcast::realtime::{loader_fn, SnapshotLoader};
use trendcast::store::FixtureData;
use uuid::Uuid;

/// Profile present in [`sample_fixture`]
pub const SAMPLE_PROFILE: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

/// Weekly series with steadily growing sessions, starting 2024-01-01
pub fn growing_weeks(weeks: usize) -> Vec<WeeklyPoint> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..weeks)
        .map(|i| {
            let n = i as u64 + 1;
            WeeklyPoint::new(start + Duration::weeks(i as i64), n * 2, n, n * 100)
        })
        .collect()
}

/// Fixture document covering every store query
pub fn sample_fixture() -> FixtureData {
    let mut data = FixtureData {
        aggregate: AggregateMetrics {
            summary: AggregateSummary {
                total_profiles: 3,
                active_profiles_7d: 2,
                total_sessions: 20,
                completed_sessions: 10,
                total_volume: 1000,
                average_volume_per_session: 50.0,
            },
            ..Default::default()
        },
        platform_weekly: growing_weeks(4),
        ..Default::default()
    };
    data.profile_weekly.insert(SAMPLE_PROFILE, growing_weeks(3));
    data.profile_stats.insert(
        SAMPLE_PROFILE,
        ProfileStats {
            total_sessions: 6,
            total_exercises: 18,
            average_performance: 0.5,
            weekly_stats: growing_weeks(3),
            progress_over_time: vec![ProgressPoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                total_entries: 3,
                buckets: [("strength".to_string(), 2), ("mobility".to_string(), 1)]
                    .into_iter()
                    .collect(),
            }],
        },
    );
    data.grouped.insert(
        GroupBy::Status,
        vec![
            GroupedMetricEntry {
                key: "done".to_string(),
                label: "done".to_string(),
                total_sessions: 10,
                completed_sessions: 10,
                unique_profiles: 2,
                total_volume: 800,
            },
            GroupedMetricEntry {
                key: "planned".to_string(),
                label: "planned".to_string(),
                total_sessions: 10,
                completed_sessions: 0,
                unique_profiles: 3,
                total_volume: 200,
            },
        ],
    );
    data
}

/// Loader that counts its invocations and reports the call number
pub fn counting_loader() -> (impl SnapshotLoader, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let loader = loader_fn(move || {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "generation": n }))
        }
    });
    (loader, calls)
}
