//! Store export as a GeoJSON `FeatureCollection`.

use std::collections::HashSet;
use std::pin::pin;

use futures_util::TryStreamExt;
use geojson::{Feature, FeatureCollection, JsonObject, JsonValue};
use tokio_util::sync::CancellationToken;

use crate::domain::{NestGeometry, NestId};
use crate::error::NestError;
use crate::persistence::{NestStore, StoredNest, stream_nests};

/// Which nests to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSelection {
    /// Every area.
    pub all_areas: bool,
    /// Areas by full `parent` value or by its last `/` segment.
    pub areas: Vec<String>,
    /// Individual nests.
    pub nest_ids: Vec<NestId>,
    /// Also export inactive nests.
    pub include_inactive: bool,
}

impl ExportSelection {
    /// Checks that exactly one kind of selector is used.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::InvalidRequest`] when nothing is selected, or
    /// when `all_areas` is combined with areas or ids.
    pub fn validate(&self) -> Result<(), NestError> {
        let narrowed = !self.areas.is_empty() || !self.nest_ids.is_empty();
        match (self.all_areas, narrowed) {
            (true, true) => Err(NestError::InvalidRequest(
                "do not give areas or nest ids together with all areas".to_string(),
            )),
            (false, false) => Err(NestError::InvalidRequest(
                "one of all areas, an area or a nest id is required".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn matches(&self, row: &StoredNest, ids: &HashSet<NestId>) -> bool {
        if !self.include_inactive && !row.is_active() {
            return false;
        }
        if self.all_areas || ids.contains(&row.id()) {
            return true;
        }
        let Some(area) = row.area_name.as_deref() else {
            return false;
        };
        let last = area.rsplit('/').next().unwrap_or(area);
        self.areas.iter().any(|wanted| wanted == area || wanted == last)
    }
}

/// Counters of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Rows scanned.
    pub scanned: usize,
    /// Features written.
    pub exported: usize,
    /// Selected rows whose geometry could not be parsed.
    pub invalid: usize,
}

/// A stored nest as a GeoJSON feature.
///
/// # Errors
///
/// Returns [`NestError::GeometryInvalid`] if the stored geometry cannot be
/// parsed.
pub fn nest_feature(row: &StoredNest) -> Result<Feature, NestError> {
    let geometry: NestGeometry = row.geometry()?;

    let mut properties = JsonObject::new();
    properties.insert("id".to_string(), JsonValue::from(row.nest_id));
    properties.insert("name".to_string(), JsonValue::from(row.name.clone()));
    if let Some(parent) = &row.area_name {
        properties.insert("parent".to_string(), JsonValue::from(parent.clone()));
    }
    properties.insert("active".to_string(), JsonValue::from(row.is_active()));
    if let Some(spawnpoints) = row.spawnpoints {
        properties.insert("spawnpoints".to_string(), JsonValue::from(spawnpoints));
    }
    if let Some(m2) = row.m2 {
        properties.insert("area_m2".to_string(), JsonValue::from(m2));
    }
    if let Some(pokemon_id) = row.pokemon_id {
        properties.insert("pokemon_id".to_string(), JsonValue::from(pokemon_id));
    }
    if let Some(form) = row.pokemon_form {
        properties.insert("pokemon_form".to_string(), JsonValue::from(form));
    }

    Ok(Feature {
        geometry: Some(geometry.to_geojson()),
        properties: Some(properties),
        ..Feature::default()
    })
}

/// Streams the store ordered by id and collects the selected nests.
///
/// # Errors
///
/// Returns [`NestError::InvalidRequest`] for an invalid selection,
/// [`NestError::StoreUnavailable`] if the scan fails, or
/// [`NestError::Cancelled`].
pub async fn export_nests(
    store: &dyn NestStore,
    selection: &ExportSelection,
    cancel: &CancellationToken,
) -> Result<(FeatureCollection, ExportReport), NestError> {
    selection.validate()?;
    let ids: HashSet<NestId> = selection.nest_ids.iter().copied().collect();
    let mut report = ExportReport::default();
    let mut features = Vec::new();

    let mut rows = pin!(stream_nests(store, true));
    loop {
        let row = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(NestError::Cancelled),
            row = rows.try_next() => row?,
        };
        let Some(row) = row else {
            break;
        };
        report.scanned += 1;
        if !selection.matches(&row, &ids) {
            continue;
        }
        match nest_feature(&row) {
            Ok(feature) => features.push(feature),
            Err(err) => {
                tracing::warn!("EXPORTER[{}]: skipping: {err}", row.full_name());
                report.invalid += 1;
            }
        }
    }
    report.exported = features.len();
    tracing::info!(
        scanned = report.scanned,
        exported = report.exported,
        "EXPORTER: export done"
    );

    Ok((
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        },
        report,
    ))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::geometry::tests::square;
    use crate::persistence::memory::MemoryNestStore;
    use crate::persistence::models::tests::stored;

    fn store() -> Arc<MemoryNestStore> {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        let mut other = stored(2, &square(1.0, 1.0, 0.01));
        other.area_name = Some("City/North".to_string());
        store.put(other);
        let mut inactive = stored(3, &square(2.0, 2.0, 0.01));
        inactive.active = Some(false);
        store.put(inactive);
        let mut broken = stored(4, &square(3.0, 3.0, 0.01));
        broken.polygon = Some("{}".to_string());
        store.put(broken);
        store
    }

    async fn ids(store: &Arc<MemoryNestStore>, selection: ExportSelection) -> Vec<i64> {
        let cancel = CancellationToken::new();
        let Ok((collection, _)) = export_nests(&**store, &selection, &cancel).await else {
            panic!("export succeeds");
        };
        collection
            .features
            .iter()
            .filter_map(|f| f.property("id").and_then(JsonValue::as_i64))
            .collect()
    }

    #[test]
    fn selection_requires_one_selector() {
        assert!(ExportSelection::default().validate().is_err());
        let mixed = ExportSelection {
            all_areas: true,
            areas: vec!["Town".to_string()],
            ..ExportSelection::default()
        };
        assert!(mixed.validate().is_err());
    }

    #[tokio::test]
    async fn all_areas_skips_inactive_and_invalid() {
        let store = store();
        let all = ExportSelection {
            all_areas: true,
            ..ExportSelection::default()
        };
        assert_eq!(ids(&store, all.clone()).await, [1, 2]);
        let with_inactive = ExportSelection {
            include_inactive: true,
            ..all
        };
        assert_eq!(ids(&store, with_inactive).await, [1, 2, 3]);
    }

    #[tokio::test]
    async fn areas_and_ids_narrow_the_export() {
        let store = store();
        let by_segment = ExportSelection {
            areas: vec!["North".to_string()],
            ..ExportSelection::default()
        };
        assert_eq!(ids(&store, by_segment).await, [2]);
        let by_id = ExportSelection {
            nest_ids: vec![NestId::new(1)],
            ..ExportSelection::default()
        };
        assert_eq!(ids(&store, by_id).await, [1]);
    }

    #[test]
    fn feature_carries_properties() {
        let mut row = stored(5, &square(0.0, 0.0, 0.01));
        row.pokemon_id = Some(25);
        let Ok(feature) = nest_feature(&row) else {
            panic!("feature builds");
        };
        assert_eq!(feature.property("name"), Some(&JsonValue::from("nest 5")));
        assert_eq!(feature.property("parent"), Some(&JsonValue::from("Town")));
        assert_eq!(feature.property("spawnpoints"), Some(&JsonValue::from(20)));
        assert_eq!(feature.property("pokemon_id"), Some(&JsonValue::from(25)));
        assert!(feature.property("pokemon_form").is_none());
    }

    #[tokio::test]
    async fn cancelled_export_stops() {
        let store = store();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let selection = ExportSelection {
            all_areas: true,
            ..ExportSelection::default()
        };
        assert!(matches!(
            export_nests(&*store, &selection, &cancel).await,
            Err(NestError::Cancelled)
        ));
    }
}
