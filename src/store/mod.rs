//! Aggregation store abstraction
//!
//! The analytics service reads pre-aggregated rows from an external store.
//! This module defines the trait the rest of the crate consumes, plus a
//! JSON-fixture implementation so the service and its tests run without a
//! database.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │    HTTP handlers / StoreSnapshotLoader       │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │            AggregationStore trait            │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │   FixtureStore (JSON file or in-memory)      │
//! └──────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AggregateMetrics, AnalyticsFilters, GroupBy, GroupedMetricEntry, ProfileStats, RealtimeSnapshot,
    WeeklyPoint,
};
use crate::realtime::SnapshotLoader;

// ============================================================================
// Store Trait
// ============================================================================

/// Source of pre-aggregated analytics rows
#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Platform summary, weekly trends and top exercises
    async fn aggregate_metrics(&self) -> Result<AggregateMetrics>;

    /// Platform-wide weekly series, oldest first
    async fn platform_weekly(&self) -> Result<Vec<WeeklyPoint>>;

    /// Weekly series for one profile, oldest first; empty when unknown
    async fn profile_weekly(&self, profile_id: Uuid) -> Result<Vec<WeeklyPoint>>;

    /// Stats for several profiles in one query
    ///
    /// Unknown profiles are absent from the result.
    async fn profile_stats_batch(&self, profile_ids: &[Uuid]) -> Result<HashMap<Uuid, ProfileStats>>;

    /// Stats for one profile; empty when unknown
    async fn profile_stats(&self, profile_id: Uuid) -> Result<ProfileStats> {
        let mut batch = self.profile_stats_batch(&[profile_id]).await?;
        Ok(batch.remove(&profile_id).unwrap_or_default())
    }

    /// Grouped metrics, at most `limit` entries
    async fn grouped_metrics(
        &self,
        group_by: GroupBy,
        filters: &AnalyticsFilters,
        limit: usize,
    ) -> Result<Vec<GroupedMetricEntry>>;

    /// Refresh materialized views
    async fn refresh_views(&self) -> Result<()>;
}

// ============================================================================
// Fixture Implementation
// ============================================================================

/// Document backing a [`FixtureStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureData {
    #[serde(default)]
    pub aggregate: AggregateMetrics,
    #[serde(default)]
    pub platform_weekly: Vec<WeeklyPoint>,
    #[serde(default)]
    pub profile_weekly: HashMap<Uuid, Vec<WeeklyPoint>>,
    #[serde(default)]
    pub profile_stats: HashMap<Uuid, ProfileStats>,
    #[serde(default)]
    pub grouped: HashMap<GroupBy, Vec<GroupedMetricEntry>>,
}

/// Aggregation store served from a JSON document
///
/// Filters other than the profile are not applied to fixture data; the
/// profile filter narrows `profile`-grouped results to that profile's key.
pub struct FixtureStore {
    path: Option<PathBuf>,
    data: RwLock<FixtureData>,
}

impl FixtureStore {
    /// Create an in-memory store
    pub fn new(data: FixtureData) -> Self {
        Self {
            path: None,
            data: RwLock::new(data),
        }
    }

    /// Create an empty in-memory store
    pub fn empty() -> Self {
        Self::new(FixtureData::default())
    }

    /// Load a store from a JSON file; `refresh_views` re-reads it
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = read_fixture(&path).await?;
        tracing::info!(path = %path.display(), "Fixture store loaded");
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Replace the backing document
    pub fn replace(&self, data: FixtureData) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
    }

    fn read<T>(&self, f: impl FnOnce(&FixtureData) -> T) -> T {
        f(&self.data.read().unwrap_or_else(PoisonError::into_inner))
    }
}

async fn read_fixture(path: &Path) -> Result<FixtureData> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read fixture file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fixture file: {}", path.display()))
}

#[async_trait]
impl AggregationStore for FixtureStore {
    async fn aggregate_metrics(&self) -> Result<AggregateMetrics> {
        Ok(self.read(|d| d.aggregate.clone()))
    }

    async fn platform_weekly(&self) -> Result<Vec<WeeklyPoint>> {
        Ok(self.read(|d| d.platform_weekly.clone()))
    }

    async fn profile_weekly(&self, profile_id: Uuid) -> Result<Vec<WeeklyPoint>> {
        Ok(self.read(|d| d.profile_weekly.get(&profile_id).cloned().unwrap_or_default()))
    }

    async fn profile_stats_batch(&self, profile_ids: &[Uuid]) -> Result<HashMap<Uuid, ProfileStats>> {
        Ok(self.read(|d| {
            profile_ids
                .iter()
                .filter_map(|id| d.profile_stats.get(id).map(|stats| (*id, stats.clone())))
                .collect()
        }))
    }

    async fn grouped_metrics(
        &self,
        group_by: GroupBy,
        filters: &AnalyticsFilters,
        limit: usize,
    ) -> Result<Vec<GroupedMetricEntry>> {
        let profile_key = filters.profile_id.map(|id| id.to_string());
        Ok(self.read(|d| {
            d.grouped
                .get(&group_by)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|entry| match (&profile_key, group_by) {
                            (Some(key), GroupBy::Profile) => &entry.key == key,
                            _ => true,
                        })
                        .take(limit)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn refresh_views(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let data = read_fixture(path).await?;
            self.replace(data);
            tracing::info!(path = %path.display(), "Fixture store reloaded");
        }
        Ok(())
    }
}

// ============================================================================
// Snapshot Loader
// ============================================================================

/// Adapts an aggregation store into the realtime hub's loader
pub struct StoreSnapshotLoader {
    store: Arc<dyn AggregationStore>,
}

impl StoreSnapshotLoader {
    pub fn new(store: Arc<dyn AggregationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SnapshotLoader for StoreSnapshotLoader {
    type Snapshot = RealtimeSnapshot;

    async fn load(&self) -> Result<RealtimeSnapshot> {
        let (aggregate, platform_trends) =
            tokio::try_join!(self.store.aggregate_metrics(), self.store.platform_weekly())
                .context("fetch realtime snapshot")?;

        Ok(RealtimeSnapshot {
            aggregate,
            platform_trends,
        })
    }
}
