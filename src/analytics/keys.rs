//! Deterministic cache keys derived from request parameters

use std::fmt::Display;
use uuid::Uuid;

use crate::models::{AnalyticsFilters, GroupBy};

pub const PLATFORM_TRENDS_KEY: &str = "trends:platform";
pub const PLATFORM_AGGREGATE_KEY: &str = "aggregate:platform";

pub fn profile_stats_key(profile_id: Uuid) -> String {
    format!("stats:profile:{profile_id}")
}

pub fn profile_trends_key(profile_id: Uuid) -> String {
    format!("trends:profile:{profile_id}")
}

/// Key for a grouped-metrics query
///
/// Every filter field is written in a fixed order, with `null` for absent
/// values, so equal filters always map to the same key.
pub fn grouped_metrics_key(group_by: GroupBy, filters: &AnalyticsFilters) -> String {
    fn part<T: Display>(name: &str, value: Option<T>) -> String {
        match value {
            Some(v) => format!("{name}={v}"),
            None => format!("{name}=null"),
        }
    }

    let parts = [
        format!("groupBy={group_by}"),
        part("profileId", filters.profile_id),
        part("programId", filters.program_id),
        part("disciplineId", filters.discipline_id),
        part("status", filters.status),
        part("dateFrom", filters.date_from),
        part("dateTo", filters.date_to),
    ];

    format!("grouped:{}", parts.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use chrono::NaiveDate;

    #[test]
    fn test_profile_keys() {
        let id = Uuid::nil();
        assert_eq!(
            profile_stats_key(id),
            "stats:profile:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            profile_trends_key(id),
            "trends:profile:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_grouped_key_without_filters() {
        let key = grouped_metrics_key(GroupBy::Week, &AnalyticsFilters::default());
        assert_eq!(
            key,
            "grouped:groupBy=week|profileId=null|programId=null|disciplineId=null|status=null|dateFrom=null|dateTo=null"
        );
    }

    #[test]
    fn test_grouped_key_with_filters() {
        let filters = AnalyticsFilters {
            status: Some(SessionStatus::InProgress),
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        let key = grouped_metrics_key(GroupBy::Status, &filters);
        assert!(key.starts_with("grouped:groupBy=status|"));
        assert!(key.contains("|status=in_progress|"));
        assert!(key.contains("|dateFrom=2024-03-01|"));
        assert!(key.ends_with("|dateTo=null"));
    }

    #[test]
    fn test_grouped_key_distinguishes_dimensions() {
        let filters = AnalyticsFilters::default();
        assert_ne!(
            grouped_metrics_key(GroupBy::Program, &filters),
            grouped_metrics_key(GroupBy::Discipline, &filters)
        );
    }
}
