//! Nest import from a local GeoJSON or path-list file into the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use geo::Point;
use geojson::{Feature, GeoJson, JsonValue};
use serde::Deserialize;

use crate::config::{FiltersConfig, ImporterConfig};
use crate::domain::{DiscardReason, NestGeometry, NestId, RegionIndex};
use crate::error::NestError;
use crate::persistence::{NestStore, StoredNest};

/// What an import did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Features in the source.
    pub features: usize,
    /// Features without a usable polygon.
    pub invalid: usize,
    /// Features without a name and no default configured.
    pub unnamed: usize,
    /// Features without an integer id.
    pub missing_id: usize,
    /// Features outside the area bounds.
    pub area_filtered: usize,
    /// Features whose label point lies in another feature.
    pub contained: usize,
    /// Rows inserted.
    pub created: usize,
    /// Existing rows updated.
    pub updated: usize,
    /// Rows that could not be read or written.
    pub failed: usize,
}

/// A feature that passed every import check.
#[derive(Debug, Clone)]
pub struct ImportFeature {
    /// Nest id from `properties.id`.
    pub id: NestId,
    /// Display name.
    pub name: String,
    /// `properties.parent`.
    pub area_name: Option<String>,
    /// Nest polygon.
    pub geometry: NestGeometry,
    /// Label point.
    pub center: Point<f64>,
}

impl ImportFeature {
    /// `parent/name(NestId:id)`.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.area_name {
            Some(area) => format!("{area}/{}(NestId:{})", self.name, self.id),
            None => format!("{}(NestId:{})", self.name, self.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PathEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<JsonValue>,
    #[serde(default)]
    parent: Option<String>,
    path: Vec<[f64; 2]>,
}

impl PathEntry {
    fn into_feature(self) -> Feature {
        let mut ring: Vec<Vec<f64>> = self.path.iter().map(|&[lon, lat]| vec![lon, lat]).collect();
        if let (Some(first), Some(last)) = (ring.first(), ring.last())
            && first != last
        {
            let first = first.clone();
            ring.push(first);
        }
        let mut feature = Feature {
            geometry: Some(geojson::Geometry::new(geojson::Value::Polygon(vec![ring]))),
            ..Feature::default()
        };
        if let Some(name) = self.name {
            feature.set_property("name", name);
        }
        if let Some(id) = self.id {
            feature.set_property("id", id);
        }
        if let Some(parent) = self.parent {
            feature.set_property("parent", parent);
        }
        feature
    }
}

/// Reads features from a GeoJSON `FeatureCollection` (or single
/// `Feature`), or from a `[{name, path: [[lon, lat], ...]}]` array.
///
/// # Errors
///
/// Returns [`NestError::InvalidRequest`] if the text is not JSON, or
/// [`NestError::GeometryInvalid`] if it is neither supported shape.
pub fn parse_source(text: &str) -> Result<Vec<Feature>, NestError> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| NestError::InvalidRequest(format!("source is not JSON: {e}")))?;
    if value.is_array() {
        let entries: Vec<PathEntry> = serde_json::from_value(value)
            .map_err(|e| NestError::InvalidRequest(format!("invalid path list: {e}")))?;
        return Ok(entries.into_iter().map(PathEntry::into_feature).collect());
    }
    match GeoJson::from_json_value(value)? {
        GeoJson::FeatureCollection(collection) => Ok(collection.features),
        GeoJson::Feature(feature) => Ok(vec![feature]),
        GeoJson::Geometry(_) => Err(NestError::GeometryInvalid(
            "expected a feature collection, got a bare geometry".to_string(),
        )),
    }
}

fn parse_id(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(number) => number.as_i64(),
        JsonValue::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty_property(feature: &Feature, key: &str) -> Option<String> {
    feature
        .property(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Imports features into a [`NestStore`].
#[derive(Debug, Clone)]
pub struct NestImporter {
    store: Arc<dyn NestStore>,
    config: ImporterConfig,
    filters: FiltersConfig,
}

impl NestImporter {
    /// Creates an importer. Only the area bounds of `filters` apply.
    #[must_use]
    pub fn new(store: Arc<dyn NestStore>, config: ImporterConfig, filters: FiltersConfig) -> Self {
        Self {
            store,
            config,
            filters,
        }
    }

    /// Names, validates and de-duplicates `features`.
    pub fn prepare(&self, features: Vec<Feature>, report: &mut ImportReport) -> Vec<ImportFeature> {
        report.features += features.len();
        let mut prepared = Vec::with_capacity(features.len());

        for feature in features {
            let parsed = feature
                .geometry
                .clone()
                .ok_or_else(|| NestError::GeometryInvalid("feature has no geometry".to_string()))
                .and_then(NestGeometry::from_geojson);
            let geometry = match parsed {
                Ok(geometry) => geometry,
                Err(err) => {
                    tracing::warn!("IMPORTER: skipping feature: {err}");
                    report.invalid += 1;
                    continue;
                }
            };
            let Some(center) = geometry.label_point() else {
                tracing::warn!("IMPORTER: skipping feature: no label point");
                report.invalid += 1;
                continue;
            };

            let name = match (non_empty_property(&feature, "name"), &self.config.default_name) {
                (Some(name), _) => name,
                (None, Some(default)) if self.config.default_name_location => {
                    format!("{default} at {:.5},{:.5}", center.y(), center.x())
                }
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    tracing::warn!(
                        "IMPORTER: skipping feature with no name and no default name configured"
                    );
                    report.unnamed += 1;
                    continue;
                }
            };
            let area_name = non_empty_property(&feature, "parent");

            let Some(id) = feature.property("id").and_then(parse_id) else {
                tracing::debug!("IMPORTER: skipping feature '{name}': no integer id");
                report.missing_id += 1;
                continue;
            };

            let candidate = ImportFeature {
                id: NestId::new(id),
                name,
                area_name,
                geometry,
                center,
            };
            let area = candidate.geometry.area_m2();
            if !self.filters.area_in_bounds(area) {
                tracing::warn!(
                    "IMPORTER: skipping feature '{}': area {area:.3} m² outside [{:.3}, {:.3}]",
                    candidate.full_name(),
                    self.filters.min_area_m2,
                    self.filters.max_area_m2
                );
                report.area_filtered += 1;
                continue;
            }
            prepared.push(candidate);
        }

        if self.config.allow_contained {
            return prepared;
        }

        let index = RegionIndex::new();
        for (position, feature) in prepared.iter().enumerate() {
            if let Err(err) = index.insert(&feature.geometry, position) {
                tracing::warn!("IMPORTER: '{}' not checked for containment: {err}", feature.full_name());
            }
        }
        let mut kept = Vec::with_capacity(prepared.len());
        for (position, feature) in prepared.iter().enumerate() {
            let container = index
                .search(feature.center.y(), feature.center.x())
                .into_iter()
                .find(|&other| other != position)
                .and_then(|other| prepared.get(other));
            if let Some(container) = container {
                tracing::warn!(
                    "IMPORTER: skipping feature '{}': center at {:.5},{:.5} appears contained by feature '{}'",
                    feature.full_name(),
                    feature.center.y(),
                    feature.center.x(),
                    container.full_name()
                );
                report.contained += 1;
                continue;
            }
            kept.push(feature.clone());
        }
        kept
    }

    /// Prepares `features` and writes them. With `dry_run` nothing is
    /// written and the rows that would change are only logged.
    pub async fn import(
        &self,
        features: Vec<Feature>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> ImportReport {
        let mut report = ImportReport::default();
        let prepared = self.prepare(features, &mut report);

        for feature in prepared {
            let full_name = feature.full_name();
            let existing = match self.store.get_nest_by_id(feature.id).await {
                Ok(existing) => existing,
                Err(err) => {
                    tracing::warn!("IMPORTER: skipping feature '{full_name}': {err}");
                    report.failed += 1;
                    continue;
                }
            };
            let row = match StoredNest::new_imported(
                feature.id,
                feature.name,
                feature.area_name,
                &feature.geometry,
                feature.center,
                now,
            ) {
                Ok(row) => row,
                Err(err) => {
                    tracing::warn!("IMPORTER: skipping feature '{full_name}': {err}");
                    report.failed += 1;
                    continue;
                }
            };
            let row = match &existing {
                Some(existing) => merge_existing(row, existing),
                None => row,
            };

            if dry_run {
                let action = if existing.is_some() { "update" } else { "import" };
                tracing::info!("IMPORTER: dry run, would {action} nest '{}'", row.full_name());
            } else if let Err(err) = self.store.insert_or_update_nest(&row).await {
                tracing::warn!("IMPORTER: skipping feature '{full_name}': failed to write: {err}");
                report.failed += 1;
                continue;
            } else if existing.is_some() {
                tracing::info!("IMPORTER: updated existing nest '{}'", row.full_name());
            } else {
                tracing::info!("IMPORTER: imported new nest '{}'", row.full_name());
            }

            if existing.is_some() {
                report.updated += 1;
            } else {
                report.created += 1;
            }
        }
        report
    }
}

/// Keeps what operators or the engine decided for an existing row: its
/// name, spawnpoints, activity and nesting species.
fn merge_existing(row: StoredNest, existing: &StoredNest) -> StoredNest {
    let active = existing.is_active();
    let merged = StoredNest {
        name: existing.name.clone(),
        area_name: row.area_name.clone().or_else(|| existing.area_name.clone()),
        spawnpoints: existing.spawnpoints,
        active: Some(active),
        discarded: if active {
            None
        } else {
            existing
                .discarded
                .clone()
                .or_else(|| Some(DiscardReason::Unverified.as_str().to_string()))
        },
        updated: existing.updated.filter(|at| *at > 0).or(row.updated),
        ..row
    };
    if active {
        StoredNest {
            pokemon_id: existing.pokemon_id,
            pokemon_form: existing.pokemon_form,
            pokemon_avg: existing.pokemon_avg,
            pokemon_ratio: existing.pokemon_ratio,
            pokemon_count: existing.pokemon_count,
            ..merged
        }
    } else {
        merged
    }
}
