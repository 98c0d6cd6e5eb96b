use anyhow::{Context, Result};
use std::path::PathBuf;

use trendcast::analytics::build_weekly_insights;
use trendcast::models::WeeklyPoint;

/// Compute insights for a JSON array of weekly points and print them
pub async fn insights(input: PathBuf) -> Result<()> {
    let content = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;

    let points: Vec<WeeklyPoint> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse weekly points: {}", input.display()))?;

    tracing::debug!(points = points.len(), "Computing weekly insights");
    let insights = build_weekly_insights(&points);

    println!("{}", serde_json::to_string_pretty(&insights)?);
    Ok(())
}
