//! Trend insight computation over short weekly series
//!
//! This module provides functionality for:
//! - Fitting an ordinary least-squares line through an ordered series
//! - Forecasting one step past the observed data
//! - Classifying direction with a tolerance relative to the series mean
//! - Scoring confidence as the coefficient of determination (R²)
//!
//! Every function here is pure: identical input yields identical output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::WeeklyPoint;

/// Metric names produced by [`build_weekly_insights`]
pub const TOTAL_SESSIONS: &str = "totalSessions";
pub const COMPLETED_SESSIONS: &str = "completedSessions";
pub const TOTAL_VOLUME: &str = "totalVolume";
pub const COMPLETION_RATE: &str = "completionRate";

/// Absolute floor of the direction tolerance
const MIN_TOLERANCE: f64 = 0.01;

/// Direction tolerance as a fraction of |mean|
const RELATIVE_TOLERANCE: f64 = 0.05;

/// Trend direction indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    /// Classify a slope against a tolerance derived from the series mean
    ///
    /// # Classification
    /// - `slope > tolerance`: Up
    /// - `slope < -tolerance`: Down
    /// - otherwise: Flat
    ///
    /// where `tolerance = max(0.01, |mean| * 0.05)`. A zero mean is not
    /// replaced by a baseline of 1.0, so its tolerance is the 0.01 floor
    /// rather than 0.05.
    #[must_use]
    pub fn classify(slope: f64, mean: f64) -> Self {
        let tolerance = MIN_TOLERANCE.max(mean.abs() * RELATIVE_TOLERANCE);
        if slope > tolerance {
            Self::Up
        } else if slope < -tolerance {
            Self::Down
        } else {
            Self::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Flat => "flat",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend summary for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendInsight {
    /// Metric name chosen by the caller
    pub metric: String,

    pub direction: TrendDirection,

    /// Change per time step of the fitted line
    pub slope: f64,

    /// Last observed value
    pub current_value: f64,

    /// Fitted value one step past the series, floored at the metric's minimum
    pub forecast_value: f64,

    /// Coefficient of determination in [0, 1]
    pub confidence: f64,
}

/// One named series handed to [`compute_insights`]
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    pub metric: String,
    pub values: Vec<f64>,
    /// Floor applied to the forecast only
    pub clamp_min: Option<f64>,
}

impl MetricSeries {
    pub fn new(metric: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            metric: metric.into(),
            values,
            clamp_min: None,
        }
    }

    /// Set the forecast floor
    #[must_use]
    pub fn with_clamp_min(mut self, clamp_min: f64) -> Self {
        self.clamp_min = Some(clamp_min);
        self
    }
}

/// Fit a linear trend through `values` indexed 0..n-1
///
/// Returns `None` for an empty series. A single value or a constant series
/// yields a flat insight with zero slope and zero confidence. `clamp_min`
/// defaults to 0 and bounds the forecast from below; it never alters the
/// current value or the slope.
#[must_use]
pub fn linear_trend_insight(metric: &str, values: &[f64], clamp_min: Option<f64>) -> Option<TrendInsight> {
    let current = *values.last()?;
    let clamp_min = clamp_min.unwrap_or(0.0);

    if values.len() < 2 || values.iter().all(|v| *v == values[0]) {
        return Some(TrendInsight {
            metric: metric.to_string(),
            direction: TrendDirection::Flat,
            slope: 0.0,
            current_value: current,
            forecast_value: clamp_min.max(current),
            confidence: 0.0,
        });
    }

    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let (numerator, denominator) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    let slope = numerator / denominator;
    let intercept = mean_y - slope * mean_x;
    let forecast = slope * n + intercept;

    let sse: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let sst: f64 = values.iter().map(|y| (y - mean_y).powi(2)).sum();
    let confidence = (1.0 - sse / sst.max(1.0)).clamp(0.0, 1.0);

    Some(TrendInsight {
        metric: metric.to_string(),
        direction: TrendDirection::classify(slope, mean_y),
        slope,
        current_value: current,
        forecast_value: clamp_min.max(forecast),
        confidence,
    })
}

/// Compute one insight per non-empty series, preserving input order
#[must_use]
pub fn compute_insights(series: &[MetricSeries]) -> Vec<TrendInsight> {
    series
        .iter()
        .filter_map(|s| linear_trend_insight(&s.metric, &s.values, s.clamp_min))
        .collect()
}

/// Insights for sessions, completions, volume and completion rate
#[must_use]
pub fn build_weekly_insights(points: &[WeeklyPoint]) -> Vec<TrendInsight> {
    if points.is_empty() {
        return Vec::new();
    }

    let sessions: Vec<f64> = points.iter().map(|p| p.total_sessions as f64).collect();
    let completed: Vec<f64> = points.iter().map(|p| p.completed_sessions as f64).collect();
    let volume: Vec<f64> = points.iter().map(|p| p.total_volume as f64).collect();
    let completion_rate: Vec<f64> = points
        .iter()
        .map(|p| {
            if p.total_sessions == 0 {
                0.0
            } else {
                p.completed_sessions as f64 / p.total_sessions as f64
            }
        })
        .collect();

    compute_insights(&[
        MetricSeries::new(TOTAL_SESSIONS, sessions),
        MetricSeries::new(COMPLETED_SESSIONS, completed),
        MetricSeries::new(TOTAL_VOLUME, volume),
        MetricSeries::new(COMPLETION_RATE, completion_rate).with_clamp_min(0.0),
    ])
}

/// Completed share of `total` as a percentage in [0, 100], one decimal
#[must_use]
pub fn completion_percentage(total: u64, completed: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    (pct * 10.0).round() / 10.0
}
