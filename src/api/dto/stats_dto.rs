//! Rolling stats and purge payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{GlobalEntry, NestId, NestSummary, PurgeResult, SpeciesKey, SummaryEntry};

/// One species row of a nest's stats.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsEntryDto {
    /// 1-based rank inside the nest.
    pub rank: usize,
    /// `species:form`.
    #[schema(value_type = String, example = "7:0")]
    pub species: SpeciesKey,
    /// Observations of the species in the nest.
    pub count: u64,
    /// All observations in the nest.
    pub total: u64,
    /// `count / total` in percent.
    pub nest_pct: f64,
    /// Observations of the species everywhere.
    pub global: u64,
    /// All observations everywhere.
    pub global_total: u64,
    /// `global / global_total` in percent.
    pub global_pct: f64,
}

impl From<&SummaryEntry> for StatsEntryDto {
    fn from(entry: &SummaryEntry) -> Self {
        Self {
            rank: entry.rank,
            species: entry.key,
            count: entry.count,
            total: entry.total,
            nest_pct: entry.nest_pct(),
            global: entry.global,
            global_total: entry.global_total,
            global_pct: entry.global_pct(),
        }
    }
}

/// One species row of the global stats.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GlobalEntryDto {
    /// 1-based rank.
    pub rank: usize,
    /// `species:form`.
    #[schema(value_type = String, example = "7:0")]
    pub species: SpeciesKey,
    /// Observations of the species.
    pub count: u64,
    /// All observations.
    pub total: u64,
    /// `count / total` in percent.
    pub pct: f64,
}

impl From<&GlobalEntry> for GlobalEntryDto {
    fn from(entry: &GlobalEntry) -> Self {
        Self {
            rank: entry.rank,
            species: entry.key,
            count: entry.count,
            total: entry.total,
            pct: entry.pct(),
        }
    }
}

/// `GET /api/nests/{id}/stats`
#[derive(Debug, Serialize, ToSchema)]
pub struct NestStatsResponse {
    /// Nest id.
    #[schema(value_type = i64)]
    pub nest_id: NestId,
    /// Start of the oldest period held.
    pub start_time: DateTime<Utc>,
    /// Snapshot instant.
    pub end_time: DateTime<Utc>,
    /// Accumulated stats duration.
    pub duration_minutes: i64,
    /// Species ranked by count.
    pub entries: Vec<StatsEntryDto>,
}

impl From<&NestSummary> for NestStatsResponse {
    fn from(summary: &NestSummary) -> Self {
        Self {
            nest_id: summary.nest_id,
            start_time: summary.start_time,
            end_time: summary.end_time,
            duration_minutes: summary.duration.num_minutes(),
            entries: summary.entries.iter().map(StatsEntryDto::from).collect(),
        }
    }
}

/// `GET /api/nests/_/stats`
#[derive(Debug, Serialize, ToSchema)]
pub struct AllStatsResponse {
    /// Accumulated stats duration.
    pub duration_minutes: i64,
    /// Start of the oldest period held.
    pub start_time: DateTime<Utc>,
    /// Snapshot instant.
    pub end_time: DateTime<Utc>,
    /// Global species ranked by count.
    pub global: Vec<GlobalEntryDto>,
    /// Ranked species per nest id.
    pub nests: BTreeMap<i64, Vec<StatsEntryDto>>,
}

/// Body of `PUT /api/stats/purge/{keep,oldest}`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PurgeRequest {
    /// Minutes to keep or remove; must be positive.
    pub duration_minutes: i64,
}

/// Body of `PUT /api/stats/purge/newest`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PurgeNewestRequest {
    /// Minutes to remove; must be positive.
    pub duration_minutes: i64,
    /// Whether the period being filled counts as the newest.
    #[serde(default)]
    pub include_current: bool,
}

/// Result of a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PurgeResponse {
    /// Periods removed.
    pub time_periods: usize,
    /// Minutes removed.
    pub duration_minutes: i64,
}

impl From<PurgeResult> for PurgeResponse {
    fn from(result: PurgeResult) -> Self {
        Self {
            time_periods: result.periods,
            duration_minutes: result.duration.num_minutes(),
        }
    }
}
