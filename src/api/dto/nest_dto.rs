//! Nest representations returned by `/api/nests`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{Nest, NestId, NestingSpecies};

/// A nest as served by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NestDto {
    /// Nest id.
    #[schema(value_type = i64)]
    pub id: NestId,
    /// Display name.
    pub name: String,
    /// Latitude of the label point.
    pub lat: f64,
    /// Longitude of the label point.
    pub lon: f64,
    /// GeoJSON geometry; only in single-nest responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub geometry: Option<geojson::Geometry>,
    /// Parent area.
    pub area_name: Option<String>,
    /// Spawnpoints inside, when known.
    pub spawnpoints: Option<i64>,
    /// Geodesic area in m².
    pub area_m2: f64,
    /// Whether the nest is tracked.
    pub active: bool,
    /// Discard reason of an inactive nest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_reason: Option<String>,
    /// Last nesting decision or reset.
    pub updated_at: Option<DateTime<Utc>>,
    /// Current nesting species.
    pub nesting_pokemon: Option<NestingSpecies>,
}

impl NestDto {
    /// Builds the API form of `nest`.
    #[must_use]
    pub fn from_nest(nest: &Nest, include_geometry: bool) -> Self {
        let status = nest.stats.status();
        Self {
            id: nest.id,
            name: nest.name.clone(),
            lat: nest.lat(),
            lon: nest.lon(),
            geometry: include_geometry.then(|| nest.geometry.to_geojson()),
            area_name: nest.area_name.clone(),
            spawnpoints: nest.spawnpoints,
            area_m2: nest.area_m2,
            active: nest.active,
            inactive_reason: nest.discarded.map(|reason| reason.as_str().to_string()),
            updated_at: status.updated_at,
            nesting_pokemon: status.nesting,
        }
    }
}

/// `GET /api/nests`
#[derive(Debug, Serialize, ToSchema)]
pub struct NestListResponse {
    /// Loaded nests ordered by id, without geometry.
    pub nests: Vec<NestDto>,
}

/// `GET /api/nests/{id}`
#[derive(Debug, Serialize, ToSchema)]
pub struct NestResponse {
    /// The nest, with geometry.
    pub nest: NestDto,
}
