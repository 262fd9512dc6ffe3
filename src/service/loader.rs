//! Load-time nest filtering.
//!
//! Every stored nest is read, checked against the area and spawnpoint
//! filters, and the survivors are put in a fresh [`NestMatcher`]. Filter
//! outcomes are written back so the store reflects what is tracked.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::FiltersConfig;
use crate::domain::{DiscardReason, Nest, NestId, NestMatcher};
use crate::error::NestError;
use crate::persistence::{NestPartialUpdate, NestStore, PointStore, StoredNest};

/// What a load did with the stored nests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows read from the store.
    pub rows: usize,
    /// Nests added to the matcher.
    pub loaded: usize,
    /// Inactive rows left alone.
    pub inactive: usize,
    /// Rows whose id was already seen.
    pub duplicates: usize,
    /// Rows whose geometry could not be used.
    pub invalid: usize,
    /// Nests outside the area bounds.
    pub area_filtered: usize,
    /// Nests with too few spawnpoints.
    pub spawnpoint_filtered: usize,
    /// Nests activated by this load.
    pub enabled: usize,
}

/// Reads nests from the store and filters them into a matcher.
#[derive(Debug, Clone)]
pub struct NestLoader {
    store: Arc<dyn NestStore>,
    points: Option<Arc<dyn PointStore>>,
}

impl NestLoader {
    /// Creates a loader. Without a point store, unknown spawnpoint counts
    /// stay unknown and are not filtered.
    #[must_use]
    pub fn new(store: Arc<dyn NestStore>, points: Option<Arc<dyn PointStore>>) -> Self {
        Self { store, points }
    }

    /// The nest store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn NestStore> {
        &self.store
    }

    /// The spawnpoint store, when configured.
    #[must_use]
    pub const fn points(&self) -> Option<&Arc<dyn PointStore>> {
        self.points.as_ref()
    }

    /// Builds a matcher from the store.
    ///
    /// Nests present in `previous` keep their nesting state. Write-backs
    /// that fail are logged and do not fail the load.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] if the nests cannot be read.
    pub async fn load(
        &self,
        filters: &FiltersConfig,
        previous: Option<&NestMatcher>,
        now: DateTime<Utc>,
    ) -> Result<(NestMatcher, LoadReport), NestError> {
        let rows = self.store.get_all_nests().await?;
        tracing::info!(rows = rows.len(), "NEST-LOAD[]: got {} nest(s) from the store", rows.len());
        if self.points.is_none() {
            tracing::warn!(
                "NEST-LOAD[]: no golbat database configured; unknown spawnpoint counts will not be filtered"
            );
        }

        let mut report = LoadReport {
            rows: rows.len(),
            ..LoadReport::default()
        };
        let mut seen = HashSet::with_capacity(rows.len());
        let mut matcher = NestMatcher::new();

        for row in rows {
            let Some(nest) = self.filter_row(row, filters, &mut seen, &mut report, now).await else {
                continue;
            };
            let nest = match previous.and_then(|m| m.by_id(nest.id)) {
                Some(old) => Nest {
                    stats: Arc::clone(&old.stats),
                    ..nest
                },
                None => nest,
            };
            let full_name = nest.full_name();
            let spawnpoints = nest.spawnpoints;
            if let Err(err) = matcher.add(Arc::new(nest)) {
                tracing::warn!("NEST-LOAD[{full_name}]: failed to add nest to matcher: {err}");
                report.invalid += 1;
                continue;
            }
            report.loaded += 1;
            match spawnpoints {
                Some(count) => tracing::info!(
                    "NEST-LOAD[{full_name}]: loaded and active with {count} spawnpoint(s)"
                ),
                None => tracing::info!(
                    "NEST-LOAD[{full_name}]: loaded and active with unknown number of spawnpoints"
                ),
            }
        }

        tracing::info!(
            loaded = report.loaded,
            inactive = report.inactive,
            area_filtered = report.area_filtered,
            spawnpoint_filtered = report.spawnpoint_filtered,
            invalid = report.invalid,
            "NEST-LOAD[]: {} nest(s) active",
            report.loaded
        );
        Ok((matcher, report))
    }

    async fn filter_row(
        &self,
        row: StoredNest,
        filters: &FiltersConfig,
        seen: &mut HashSet<NestId>,
        report: &mut LoadReport,
        now: DateTime<Utc>,
    ) -> Option<Nest> {
        let full_name = row.full_name();
        let was_active = row.is_active();

        // Area is re-checked on every load; other reasons stick.
        if !was_active && row.discard_reason() != Some(DiscardReason::Area) {
            tracing::debug!("NEST-LOAD[{full_name}]: nest is disabled, skipping");
            report.inactive += 1;
            return None;
        }
        if !seen.insert(row.id()) {
            tracing::warn!("NEST-LOAD[{full_name}]: nest already loaded, skipping");
            report.duplicates += 1;
            return None;
        }

        let nest = match row.to_nest(now) {
            Ok(nest) => nest,
            Err(err) => {
                tracing::warn!("NEST-LOAD[{full_name}]: skipping nest: {err}");
                report.invalid += 1;
                return None;
            }
        };

        if !filters.area_in_bounds(nest.area_m2) {
            tracing::warn!(
                area_m2 = nest.area_m2,
                "NEST-LOAD[{full_name}]: skipping nest: area {:.3} m² outside [{}, {}]",
                nest.area_m2,
                filters.min_area_m2,
                filters.max_area_m2
            );
            report.area_filtered += 1;
            if was_active {
                let update = NestPartialUpdate::default()
                    .disable(DiscardReason::Area)
                    .clear_nesting();
                self.write_back(&nest, &update, "disabling due to area filter")
                    .await;
            }
            return None;
        }

        // A 0 in a never-written row is the column default, not a count.
        let unknown =
            row.spawnpoints.is_none() || (row.spawnpoints == Some(0) && row.updated_at().is_none());
        let mut spawnpoints = if unknown { None } else { row.spawnpoints };
        let mut fetched = false;
        if unknown && let Some(points) = &self.points {
            tracing::info!("NEST-LOAD[{full_name}]: spawnpoint count unknown, querying golbat");
            match points.count_points_contained(&nest.geometry).await {
                Ok(count) => {
                    spawnpoints = Some(count);
                    fetched = true;
                }
                Err(err) => tracing::warn!("NEST-LOAD[{full_name}]: couldn't query spawnpoints: {err}"),
            }
        }

        match spawnpoints {
            None => tracing::warn!(
                "NEST-LOAD[{full_name}]: allowing nest with unknown number of spawnpoints"
            ),
            Some(count) if count < filters.min_points => {
                tracing::warn!(
                    "NEST-LOAD[{full_name}]: skipping nest: {count} spawnpoint(s) < min_points {}",
                    filters.min_points
                );
                report.spawnpoint_filtered += 1;
                if was_active || fetched {
                    let update = NestPartialUpdate::default()
                        .spawnpoints(spawnpoints)
                        .disable(DiscardReason::Spawnpoints)
                        .clear_nesting();
                    self.write_back(&nest, &update, "disabling due to spawnpoints filter")
                        .await;
                }
                return None;
            }
            Some(_) => {}
        }

        if !was_active || fetched {
            let update = NestPartialUpdate::default().spawnpoints(spawnpoints).enable();
            self.write_back(&nest, &update, "enabling").await;
            if !was_active {
                report.enabled += 1;
            }
        }

        Some(Nest {
            active: true,
            discarded: None,
            spawnpoints,
            ..nest
        })
    }

    async fn write_back(&self, nest: &Nest, update: &NestPartialUpdate, what: &str) {
        tracing::info!(nest_id = %nest.id, "NEST-LOAD[{}]: {what}", nest.full_name());
        if let Err(err) = self.store.update_nest_partial(nest.id, update).await {
            tracing::error!(nest_id = %nest.id, "NEST-LOAD[{}]: failed {what}: {err}", nest.full_name());
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::geometry::tests::square;
    use crate::domain::nest::tests::{nesting, t0};
    use crate::persistence::memory::{MemoryNestStore, MemoryPointStore};
    use crate::persistence::models::tests::stored;

    fn filters() -> FiltersConfig {
        FiltersConfig {
            min_points: 10,
            min_area_m2: 100.0,
            max_area_m2: 10_000_000.0,
            ..FiltersConfig::default()
        }
    }

    fn loader(store: &Arc<MemoryNestStore>, points: Option<Arc<MemoryPointStore>>) -> NestLoader {
        NestLoader::new(
            Arc::clone(store) as Arc<dyn NestStore>,
            points.map(|p| p as Arc<dyn PointStore>),
        )
    }

    async fn load(loader: &NestLoader, previous: Option<&NestMatcher>) -> (NestMatcher, LoadReport) {
        let Ok(loaded) = loader.load(&filters(), previous, t0()).await else {
            panic!("load succeeds");
        };
        loaded
    }

    // ~1.1 km squares near the equator
    fn nest_square(lat: f64) -> crate::domain::NestGeometry {
        square(lat, 0.0, 0.01)
    }

    #[tokio::test]
    async fn active_nests_load_and_inactive_stay_out() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &nest_square(0.0)));
        let mut disabled = stored(2, &nest_square(1.0));
        disabled.active = Some(false);
        disabled.discarded = Some("overlap".to_string());
        store.put(disabled);

        let (matcher, report) = load(&loader(&store, None), None).await;
        assert_eq!(matcher.len(), 1);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.inactive, 1);
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn area_out_of_bounds_disables_active_nest() {
        let store = Arc::new(MemoryNestStore::default());
        let mut tiny = stored(1, &square(0.0, 0.0, 0.00001));
        tiny.pokemon_id = Some(7);
        store.put(tiny);

        let (matcher, report) = load(&loader(&store, None), None).await;
        assert!(matcher.is_empty());
        assert_eq!(report.area_filtered, 1);
        let Some(row) = store.row(1) else {
            panic!("row kept");
        };
        assert_eq!(row.active, Some(false));
        assert_eq!(row.discarded.as_deref(), Some("area"));
        assert_eq!(row.pokemon_id, None);

        // Still out of bounds on the next load: no further writes.
        let (_, again) = load(&loader(&store, None), None).await;
        assert_eq!(again.area_filtered, 1);
        assert_eq!(store.updates().len(), 1);
    }

    #[tokio::test]
    async fn area_disabled_nest_comes_back_when_in_bounds() {
        let store = Arc::new(MemoryNestStore::default());
        let mut row = stored(1, &nest_square(0.0));
        row.active = Some(false);
        row.discarded = Some("area".to_string());
        store.put(row);

        let (matcher, report) = load(&loader(&store, None), None).await;
        assert_eq!(matcher.len(), 1);
        assert_eq!(report.enabled, 1);
        let Some(row) = store.row(1) else {
            panic!("row kept");
        };
        assert_eq!(row.active, Some(true));
        assert_eq!(row.discarded, None);
    }

    #[tokio::test]
    async fn unknown_spawnpoints_are_fetched_and_filtered() {
        let store = Arc::new(MemoryNestStore::default());
        let mut sparse = stored(1, &nest_square(0.0));
        sparse.spawnpoints = None;
        store.put(sparse);
        let mut defaulted = stored(2, &nest_square(1.0));
        defaulted.spawnpoints = Some(0);
        defaulted.updated = None;
        store.put(defaulted);

        // three points in nest 1, twelve in nest 2
        let mut points = vec![(0.0, 0.0); 3];
        points.extend(vec![(1.0, 0.0); 12]);
        let points = Arc::new(MemoryPointStore::new(points));

        let (matcher, report) = load(&loader(&store, Some(Arc::clone(&points))), None).await;
        assert_eq!(points.queries(), 2);
        assert_eq!(report.spawnpoint_filtered, 1);
        assert_eq!(matcher.len(), 1);
        let Some(loaded) = matcher.by_id(NestId::new(2)) else {
            panic!("nest 2 loaded");
        };
        assert_eq!(loaded.spawnpoints, Some(12));

        let Some(row) = store.row(1) else {
            panic!("row kept");
        };
        assert_eq!(row.spawnpoints, Some(3));
        assert_eq!(row.discarded.as_deref(), Some("spawnpoints"));
        let Some(row) = store.row(2) else {
            panic!("row kept");
        };
        assert_eq!(row.spawnpoints, Some(12));
        assert_eq!(row.active, Some(true));
    }

    #[tokio::test]
    async fn unknown_spawnpoints_without_point_store_are_allowed() {
        let store = Arc::new(MemoryNestStore::default());
        let mut row = stored(1, &nest_square(0.0));
        row.spawnpoints = None;
        store.put(row);
        let (matcher, _) = load(&loader(&store, None), None).await;
        assert_eq!(matcher.len(), 1);
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn reload_carries_nesting_state() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &nest_square(0.0)));
        let loader = loader(&store, None);
        let (first, _) = load(&loader, None).await;
        let Some(nest) = first.by_id(NestId::new(1)) else {
            panic!("loaded");
        };
        nest.stats.set_nesting(Some(nesting(7, t0())), t0());

        let (second, _) = load(&loader, Some(&first)).await;
        let Some(reloaded) = second.by_id(NestId::new(1)) else {
            panic!("reloaded");
        };
        assert!(Arc::ptr_eq(&nest.stats, &reloaded.stats));
        assert!(reloaded.stats.nesting().is_some());
    }

    #[tokio::test]
    async fn unusable_geometry_is_skipped() {
        let store = Arc::new(MemoryNestStore::default());
        let mut row = stored(1, &nest_square(0.0));
        row.polygon = Some("not json".to_string());
        store.put(row);
        store.put(stored(2, &nest_square(1.0)));
        let (matcher, report) = load(&loader(&store, None), None).await;
        assert_eq!(report.invalid, 1);
        assert_eq!(matcher.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_fails_the_load() {
        let store = Arc::new(MemoryNestStore::default());
        store.set_failing(true);
        let result = loader(&store, None).load(&filters(), None, t0()).await;
        assert!(matches!(result, Err(NestError::StoreUnavailable(_))));
    }
}
