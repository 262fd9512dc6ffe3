//! Rows of the `nests` table and sparse updates to them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};

use crate::domain::{
    DiscardReason, Nest, NestGeometry, NestId, NestStatsInfo, NestingSpecies, SpeciesKey,
};
use crate::error::NestError;

/// A row of the `nests` table.
///
/// `polygon` holds the GeoJSON geometry text; it is `None` when the row was
/// read without its geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredNest {
    /// Primary key.
    pub nest_id: i64,
    /// Label point latitude.
    pub lat: f64,
    /// Label point longitude.
    pub lon: f64,
    /// Display name.
    pub name: String,
    /// GeoJSON geometry.
    pub polygon: Option<String>,
    /// Parent area.
    pub area_name: Option<String>,
    /// Spawnpoints inside, when counted.
    pub spawnpoints: Option<i64>,
    /// Area in m², when computed.
    pub m2: Option<f64>,
    /// Whether the nest is tracked.
    pub active: Option<bool>,
    /// Nesting species id.
    pub pokemon_id: Option<i32>,
    /// Nesting form id.
    pub pokemon_form: Option<i32>,
    /// Nesting species per hour.
    pub pokemon_avg: Option<f64>,
    /// Nesting species share of the nest, percent.
    pub pokemon_ratio: Option<f64>,
    /// Nesting species count over the stats window.
    pub pokemon_count: Option<f64>,
    /// Why the nest is disabled.
    pub discarded: Option<String>,
    /// Unix seconds of the last write by the service.
    pub updated: Option<i64>,
}

impl StoredNest {
    /// Builds a new active row for an imported geometry.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::Internal`] if the geometry cannot be
    /// serialized.
    pub fn new_imported(
        id: NestId,
        name: String,
        area_name: Option<String>,
        geometry: &NestGeometry,
        center: Point<f64>,
        now: DateTime<Utc>,
    ) -> Result<Self, NestError> {
        Ok(Self {
            nest_id: id.get(),
            lat: center.y(),
            lon: center.x(),
            name,
            polygon: Some(geometry.to_geojson_string()?),
            area_name,
            spawnpoints: None,
            m2: Some(geometry.area_m2()),
            active: Some(true),
            pokemon_id: None,
            pokemon_form: None,
            pokemon_avg: None,
            pokemon_ratio: None,
            pokemon_count: None,
            discarded: None,
            updated: Some(now.timestamp()),
        })
    }

    /// Typed id.
    #[must_use]
    pub const fn id(&self) -> NestId {
        NestId::new(self.nest_id)
    }

    /// Whether the row is active. A null column counts as inactive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(false)
    }

    /// `area/name(NestId:id)`.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.area_name.as_deref().filter(|a| !a.is_empty()) {
            Some(area) => format!("{area}/{}(NestId:{})", self.name, self.nest_id),
            None => format!("{}(NestId:{})", self.name, self.nest_id),
        }
    }

    /// Parses the stored geometry.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::GeometryInvalid`] if the row was read without
    /// its geometry or the text is not a supported GeoJSON geometry.
    pub fn geometry(&self) -> Result<NestGeometry, NestError> {
        let text = self.polygon.as_deref().ok_or_else(|| {
            NestError::GeometryInvalid(format!("{} was read without a polygon", self.full_name()))
        })?;
        NestGeometry::parse(text)
    }

    /// `updated` as a timestamp; unset and non-positive values are `None`.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated
            .filter(|epoch| *epoch > 0)
            .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
    }

    /// Parsed discard reason. Unknown values are logged and ignored.
    #[must_use]
    pub fn discard_reason(&self) -> Option<DiscardReason> {
        let raw = self.discarded.as_deref().filter(|d| !d.is_empty())?;
        match raw.parse() {
            Ok(reason) => Some(reason),
            Err(err) => {
                tracing::warn!(nest = %self.full_name(), "NEST-LOAD[{}]: {err}", self.full_name());
                None
            }
        }
    }

    /// Nesting species recorded in the row, if any.
    ///
    /// Only the species and rates survive a restart; the window counts are
    /// rebuilt by the next decision.
    #[must_use]
    pub fn stored_nesting(&self, now: DateTime<Utc>) -> Option<NestingSpecies> {
        let species_id = self.pokemon_id.filter(|id| *id > 0)?;
        let key = SpeciesKey::new(
            u16::try_from(species_id).ok()?,
            u16::try_from(self.pokemon_form.unwrap_or(0)).unwrap_or(0),
        );
        let count = self.pokemon_count.unwrap_or(0.0).max(0.0);
        let pct = self.pokemon_ratio.unwrap_or(0.0);
        let total = if pct > 0.0 { 100.0 * count / pct } else { 0.0 };
        let at = self.updated_at().unwrap_or(now);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(NestingSpecies {
            key,
            stats_duration_minutes: 0,
            nest_count: count.round() as u64,
            nest_total: total.round() as u64,
            nest_hourly_count: self.pokemon_avg.unwrap_or(0.0),
            nest_hourly_total: 0.0,
            global_count: 0,
            global_total: 0,
            global_hourly_count: 0.0,
            global_hourly_total: 0.0,
            detected_at: at,
            updated_at: at,
        })
    }

    /// Converts the row into a [`Nest`] with fresh nesting state seeded
    /// from the row.
    ///
    /// The label point comes from `lat`/`lon`, or is computed when both
    /// are zero; the area comes from `m2`, or is computed when unset.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::GeometryInvalid`] if the geometry cannot be
    /// parsed.
    pub fn to_nest(&self, now: DateTime<Utc>) -> Result<Nest, NestError> {
        let geometry = self.geometry()?;
        let center = if self.lat == 0.0 && self.lon == 0.0 {
            geometry.label_point().ok_or_else(|| {
                NestError::GeometryInvalid(format!("{} has no label point", self.full_name()))
            })?
        } else {
            Point::new(self.lon, self.lat)
        };
        let area_m2 = self.m2.unwrap_or_else(|| geometry.area_m2());
        let stats = NestStatsInfo::new(self.stored_nesting(now), self.updated_at());

        Ok(Nest {
            id: self.id(),
            name: self.name.clone(),
            area_name: self.area_name.clone(),
            geometry,
            center,
            area_m2,
            active: self.is_active(),
            discarded: self.discard_reason(),
            spawnpoints: self.spawnpoints,
            exists_in_db: true,
            synced_to_db: true,
            stats: Arc::new(stats),
        })
    }
}

/// A sparse update of a `nests` row. `None` leaves a column alone; for
/// nullable columns `Some(None)` writes NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestPartialUpdate {
    /// `area_name`
    pub area_name: Option<Option<String>>,
    /// `spawnpoints`
    pub spawnpoints: Option<Option<i64>>,
    /// `m2`
    pub m2: Option<Option<f64>>,
    /// `active`
    pub active: Option<bool>,
    /// `pokemon_id`
    pub pokemon_id: Option<Option<i32>>,
    /// `pokemon_form`
    pub pokemon_form: Option<Option<i32>>,
    /// `pokemon_avg`
    pub pokemon_avg: Option<Option<f64>>,
    /// `pokemon_ratio`
    pub pokemon_ratio: Option<Option<f64>>,
    /// `pokemon_count`
    pub pokemon_count: Option<Option<f64>>,
    /// `discarded`
    pub discarded: Option<Option<String>>,
    /// `updated`
    pub updated: Option<Option<i64>>,
}

impl NestPartialUpdate {
    /// Writes the nesting species columns.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn nesting(nesting: &NestingSpecies) -> Self {
        Self {
            pokemon_id: Some(Some(i32::from(nesting.key.species_id))),
            pokemon_form: Some(Some(i32::from(nesting.key.form_id))),
            pokemon_count: Some(Some(nesting.nest_count as f64)),
            pokemon_avg: Some(Some(nesting.nest_hourly_count)),
            pokemon_ratio: Some(Some(nesting.nest_pct())),
            ..Self::default()
        }
    }

    /// Nulls the nesting species columns.
    #[must_use]
    pub fn clear_nesting(self) -> Self {
        Self {
            pokemon_id: Some(None),
            pokemon_form: Some(None),
            pokemon_count: Some(None),
            pokemon_avg: Some(None),
            pokemon_ratio: Some(None),
            ..self
        }
    }

    /// Sets `updated`.
    #[must_use]
    pub fn updated_at(self, at: DateTime<Utc>) -> Self {
        Self {
            updated: Some(Some(at.timestamp())),
            ..self
        }
    }

    /// Deactivates with `reason`.
    #[must_use]
    pub fn disable(self, reason: DiscardReason) -> Self {
        Self {
            active: Some(false),
            discarded: Some(Some(reason.as_str().to_string())),
            ..self
        }
    }

    /// Activates and clears the discard reason.
    #[must_use]
    pub fn enable(self) -> Self {
        Self {
            active: Some(true),
            discarded: Some(None),
            ..self
        }
    }

    /// Sets `spawnpoints`.
    #[must_use]
    pub fn spawnpoints(self, spawnpoints: Option<i64>) -> Self {
        Self {
            spawnpoints: Some(spawnpoints),
            ..self
        }
    }

    /// Whether the update touches no column.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the update to an in-memory row.
    pub fn apply_to(&self, row: &mut StoredNest) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }
        set(&mut row.area_name, self.area_name.as_ref());
        set(&mut row.spawnpoints, self.spawnpoints.as_ref());
        set(&mut row.m2, self.m2.as_ref());
        if let Some(active) = self.active {
            row.active = Some(active);
        }
        set(&mut row.pokemon_id, self.pokemon_id.as_ref());
        set(&mut row.pokemon_form, self.pokemon_form.as_ref());
        set(&mut row.pokemon_avg, self.pokemon_avg.as_ref());
        set(&mut row.pokemon_ratio, self.pokemon_ratio.as_ref());
        set(&mut row.pokemon_count, self.pokemon_count.as_ref());
        set(&mut row.discarded, self.discarded.as_ref());
        set(&mut row.updated, self.updated.as_ref());
    }
}
