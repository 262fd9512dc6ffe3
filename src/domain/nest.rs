//! Nest records and their nesting-species state.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geo::Point;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AreaName, NestGeometry, NestId, SpeciesKey};

/// Why a nest is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiscardReason {
    /// Area outside the configured bounds. Re-checked on every load.
    Area,
    /// Too few spawnpoints inside.
    Spawnpoints,
    /// Overlaps a larger nest too much.
    Overlap,
    /// Geometry could not be parsed or is unsupported.
    Invalid,
    /// Imported but not yet reviewed.
    Unverified,
}

impl DiscardReason {
    /// Value stored in the `discarded` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Spawnpoints => "spawnpoints",
            Self::Overlap => "overlap",
            Self::Invalid => "invalid",
            Self::Unverified => "unverified",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscardReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "area" => Ok(Self::Area),
            "spawnpoints" => Ok(Self::Spawnpoints),
            "overlap" => Ok(Self::Overlap),
            "invalid" => Ok(Self::Invalid),
            "unverified" => Ok(Self::Unverified),
            other => Err(format!("unknown discard reason '{other}'")),
        }
    }
}

/// The species a nest is currently attributed to, with the counts that
/// backed the decision. Counts are for the species; totals are for all
/// species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NestingSpecies {
    /// Nesting species.
    #[serde(rename = "pokemon")]
    #[schema(value_type = String, example = "7:0")]
    pub key: SpeciesKey,
    /// Length of the stats window the decision was made on.
    pub stats_duration_minutes: u64,
    /// Observations of the species inside the nest.
    pub nest_count: u64,
    /// All observations inside the nest.
    pub nest_total: u64,
    /// `nest_count` per hour.
    pub nest_hourly_count: f64,
    /// `nest_total` per hour.
    pub nest_hourly_total: f64,
    /// Observations of the species everywhere.
    pub global_count: u64,
    /// All observations everywhere.
    pub global_total: u64,
    /// `global_count` per hour.
    pub global_hourly_count: f64,
    /// `global_total` per hour.
    pub global_hourly_total: f64,
    /// When this species was first declared for the nest.
    pub detected_at: DateTime<Utc>,
    /// End of the stats window of the latest decision.
    pub updated_at: DateTime<Utc>,
}

impl NestingSpecies {
    /// Species share inside the nest, in percent.
    #[must_use]
    pub fn nest_pct(&self) -> f64 {
        pct(self.nest_count, self.nest_total)
    }

    /// Species share globally, in percent.
    #[must_use]
    pub fn global_pct(&self) -> f64 {
        pct(self.global_count, self.global_total)
    }

    /// Species count against every other species inside the nest.
    #[must_use]
    pub fn nest_ratio(&self) -> f64 {
        ratio(self.nest_count, self.nest_total)
    }

    /// Species count against every other species globally.
    #[must_use]
    pub fn global_ratio(&self) -> f64 {
        ratio(self.global_count, self.global_total)
    }
}

#[allow(clippy::cast_precision_loss)]
fn pct(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * count as f64 / total as f64
}

#[allow(clippy::cast_precision_loss)]
fn ratio(count: u64, total: u64) -> f64 {
    if count >= total {
        return 0.0;
    }
    count as f64 / (total - count) as f64
}

/// Nesting state of a nest: what it nests and when that was last written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestStatus {
    /// Value of the store's `updated` column, if the row was ever written.
    pub updated_at: Option<DateTime<Utc>>,
    /// Current nesting species.
    pub nesting: Option<NestingSpecies>,
}

/// Result of [`NestStatsInfo::set_nesting`].
#[derive(Debug, Clone, PartialEq)]
pub struct NestingChange {
    /// Nesting species before the call.
    pub old: Option<NestingSpecies>,
    /// Nesting species after the call, with `detected_at` carried over when
    /// the species did not change.
    pub current: Option<NestingSpecies>,
    /// `updated_at` after the call.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-nest mutable state shared between the processors of successive
/// reloads, so a surviving nest keeps its nesting history.
#[derive(Debug, Default)]
pub struct NestStatsInfo {
    status: Mutex<NestStatus>,
}

impl NestStatsInfo {
    /// Creates state seeded from the store.
    #[must_use]
    pub fn new(nesting: Option<NestingSpecies>, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: Mutex::new(NestStatus {
                updated_at,
                nesting,
            }),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> NestStatus {
        self.status.lock().clone()
    }

    /// Current nesting species.
    #[must_use]
    pub fn nesting(&self) -> Option<NestingSpecies> {
        self.status.lock().nesting.clone()
    }

    /// Records a new decision.
    ///
    /// A present decision moves `updated_at` to `now` and keeps the old
    /// `detected_at` when the species is unchanged. An absent decision
    /// leaves `updated_at` alone: the loss is not written until it has
    /// lasted long enough.
    pub fn set_nesting(&self, new: Option<NestingSpecies>, now: DateTime<Utc>) -> NestingChange {
        let mut status = self.status.lock();
        let old = status.nesting.take();
        let current = new.map(|mut new| {
            if let Some(old) = &old
                && old.key == new.key
            {
                new.detected_at = old.detected_at;
            }
            new
        });
        if current.is_some() {
            status.updated_at = Some(now);
        }
        status.nesting.clone_from(&current);
        NestingChange {
            old,
            current,
            updated_at: status.updated_at,
        }
    }

    /// Sets `updated_at`, returning the previous value.
    pub fn set_updated_at(&self, updated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.status.lock().updated_at.replace(updated_at)
    }
}

/// A nest as loaded into the matcher.
#[derive(Debug)]
pub struct Nest {
    /// Stable id.
    pub id: NestId,
    /// Display name.
    pub name: String,
    /// Parent area name.
    pub area_name: Option<String>,
    /// Boundary.
    pub geometry: NestGeometry,
    /// Label point.
    pub center: Point<f64>,
    /// Geodesic area in m².
    pub area_m2: f64,
    /// Whether the nest is tracked.
    pub active: bool,
    /// Why the nest is disabled, when inactive.
    pub discarded: Option<DiscardReason>,
    /// Number of spawnpoints inside, when known.
    pub spawnpoints: Option<i64>,
    /// Whether a row exists in the store.
    pub exists_in_db: bool,
    /// Whether the row matches this record.
    pub synced_to_db: bool,
    /// Nesting state, shared across reloads.
    pub stats: Arc<NestStatsInfo>,
}

impl Nest {
    /// Latitude of the label point.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.center.y()
    }

    /// Longitude of the label point.
    #[must_use]
    pub fn lon(&self) -> f64 {
        self.center.x()
    }

    /// Area for webhook filtering: the nest's `area_name` with no parent,
    /// so a bare `"Town"` pattern selects every nest in `Town`.
    #[must_use]
    pub fn area(&self) -> AreaName {
        AreaName::new("", self.area_name.clone().unwrap_or_default())
    }

    /// `area/name(NestId:id)`, the form used in log lines.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.area_name {
            Some(area) => format!("{area}/{}(NestId:{})", self.name, self.id),
            None => format!("{}(NestId:{})", self.name, self.id),
        }
    }
}

impl fmt::Display for Nest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' centered at {:.5},{:.5}",
            self.full_name(),
            self.lat(),
            self.lon()
        )
    }
}
