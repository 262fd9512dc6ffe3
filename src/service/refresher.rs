//! Store-wide refresh: re-runs the load-time filters over every stored
//! nest and disables overlapping nests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::FiltersConfig;
use crate::domain::{DiscardReason, NestGeometry, NestId, RegionIndex};
use crate::error::NestError;
use crate::persistence::{
    NestPartialUpdate, NestStore, PointStore, StoredNest, iterate_nests_concurrently,
};

/// Stored areas within this many m² of the computed one are kept.
const AREA_TOLERANCE_M2: f64 = 100.0;

/// Outcome of [`NestRefresher::refresh_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Rows visited.
    pub visited: usize,
    /// Rows written.
    pub updated: usize,
    /// Nests disabled for overlapping a larger one.
    pub overlap_disabled: usize,
}

/// Re-evaluates stored nests against the filters.
#[derive(Debug, Clone)]
pub struct NestRefresher {
    store: Arc<dyn NestStore>,
    points: Option<Arc<dyn PointStore>>,
}

impl NestRefresher {
    /// Creates a refresher. Without a point store spawnpoint counts are
    /// left as stored.
    #[must_use]
    pub fn new(store: Arc<dyn NestStore>, points: Option<Arc<dyn PointStore>>) -> Self {
        Self { store, points }
    }

    /// Re-evaluates one row and writes what changed.
    ///
    /// Returns the update written, or `None` when the row was already
    /// consistent.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] if the write fails.
    pub async fn refresh_nest(
        &self,
        filters: &FiltersConfig,
        force_spawnpoints: bool,
        row: &StoredNest,
        now: DateTime<Utc>,
    ) -> Result<Option<NestPartialUpdate>, NestError> {
        let full_name = row.full_name();

        let geometry = match row.geometry() {
            Ok(geometry) => Some(geometry),
            Err(err) => {
                tracing::warn!("DB-REFRESHER[{full_name}]: found invalid geometry: {err}");
                None
            }
        };
        let m2 = geometry.as_ref().map(|geometry| {
            let area = geometry.area_m2();
            match row.m2 {
                Some(stored) if (stored - area).abs() <= AREA_TOLERANCE_M2 => stored,
                Some(stored) => {
                    tracing::info!(
                        "DB-REFRESHER[{full_name}]: area is {area:.3} m², stored {stored:.3} m², updating"
                    );
                    area
                }
                None => {
                    tracing::info!("DB-REFRESHER[{full_name}]: area computed as {area:.3} m²");
                    area
                }
            }
        });

        let mut spawnpoints = if geometry.is_some() { row.spawnpoints } else { None };
        if let (Some(geometry), Some(area), Some(points)) = (&geometry, m2, &self.points)
            && (filters.max_area_m2 <= 0.0 || area <= filters.max_area_m2)
            && (spawnpoints.is_none() || force_spawnpoints)
        {
            match points.count_points_contained(geometry).await {
                Ok(count) => {
                    match spawnpoints {
                        Some(old) if old != count => tracing::info!(
                            "DB-REFRESHER[{full_name}]: spawnpoint count changed from {old} to {count}"
                        ),
                        None => tracing::info!(
                            "DB-REFRESHER[{full_name}]: spawnpoint count is {count}"
                        ),
                        Some(_) => {}
                    }
                    spawnpoints = Some(count);
                }
                Err(err) => tracing::warn!(
                    "DB-REFRESHER[{full_name}]: couldn't query spawnpoints, keeping {spawnpoints:?}: {err}"
                ),
            }
        }

        let discarded = match (m2, spawnpoints) {
            (None, _) => Some(DiscardReason::Invalid),
            (Some(area), _) if !filters.area_in_bounds(area) => Some(DiscardReason::Area),
            (Some(_), Some(count)) if count < filters.min_points => Some(DiscardReason::Spawnpoints),
            _ => None,
        };
        let active = discarded.is_none();
        let discarded_text = discarded.map(|reason| reason.as_str().to_string());

        let mut update = NestPartialUpdate::default();
        if discarded_text != row.discarded {
            match discarded {
                Some(reason) => tracing::warn!("DB-REFRESHER[{full_name}]: deactivating: {reason}"),
                None => tracing::info!(
                    "DB-REFRESHER[{full_name}]: activating (overlap pruning may still disable it)"
                ),
            }
            update.discarded = Some(discarded_text);
        }
        if m2 != row.m2 {
            update.m2 = Some(m2);
        }
        if spawnpoints != row.spawnpoints {
            update.spawnpoints = Some(spawnpoints);
        }
        if row.active != Some(active) {
            update.active = Some(active);
        }
        if !active && row.pokemon_id.is_some() {
            update = update.clear_nesting();
        }
        if update.is_empty() {
            return Ok(None);
        }

        let update = update.updated_at(now);
        if let Err(err) = self.store.update_nest_partial(row.id(), &update).await {
            tracing::error!(
                "DB-REFRESHER[{full_name}]: failed to update nest to active={active}, discarded={discarded:?}: {err}"
            );
            return Err(err);
        }
        Ok(Some(update))
    }

    /// Refreshes every stored nest with `filters.concurrency` workers, then
    /// prunes overlaps unless `filters.max_overlap_pct` disables it.
    ///
    /// # Errors
    ///
    /// Returns the first store error, or [`NestError::Cancelled`].
    pub async fn refresh_all(
        &self,
        filters: &FiltersConfig,
        force_spawnpoints: bool,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport, NestError> {
        let visited = AtomicUsize::new(0);
        let updated = AtomicUsize::new(0);
        let (visited_ref, updated_ref) = (&visited, &updated);

        iterate_nests_concurrently(
            self.store.as_ref(),
            filters.concurrency,
            true,
            cancel,
            |row| async move {
                visited_ref.fetch_add(1, Ordering::Relaxed);
                if self
                    .refresh_nest(filters, force_spawnpoints, &row, now)
                    .await?
                    .is_some()
                {
                    updated_ref.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            },
        )
        .await?;

        let mut report = RefreshReport {
            visited: visited.into_inner(),
            updated: updated.into_inner(),
            overlap_disabled: 0,
        };
        tracing::info!(
            visited = report.visited,
            updated = report.updated,
            "DB-REFRESHER: refreshed nests"
        );

        if filters.overlap_enabled() {
            tracing::info!("DB-REFRESHER: disabling overlapping nests");
            report.overlap_disabled = self
                .disable_overlapping(filters.max_overlap_pct, now)
                .await?;
            tracing::info!(
                disabled = report.overlap_disabled,
                "DB-REFRESHER: overlap pruning done, disabled {} nest(s)",
                report.overlap_disabled
            );
        } else {
            tracing::info!(
                max_overlap_pct = filters.max_overlap_pct,
                "DB-REFRESHER: skipping overlap pruning"
            );
        }
        Ok(report)
    }

    /// Disables each active nest whose intersection with a larger active
    /// nest exceeds `max_overlap_pct` percent of its own area. Nests are
    /// visited smallest first, and a disabled nest no longer disables
    /// others. Returns the number disabled.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] if nests cannot be read or a
    /// write fails.
    pub async fn disable_overlapping(
        &self,
        max_overlap_pct: f64,
        now: DateTime<Utc>,
    ) -> Result<usize, NestError> {
        let mut nests: Vec<(NestId, String, NestGeometry, f64)> = self
            .store
            .get_active_nests()
            .await?
            .into_iter()
            .filter_map(|row| {
                let geometry = row.geometry().ok()?;
                let area = geometry.area_m2();
                (area > 0.0).then(|| (row.id(), row.full_name(), geometry, area))
            })
            .collect();
        nests.sort_by(|a, b| a.3.total_cmp(&b.3).then(a.0.cmp(&b.0)));

        let index = RegionIndex::new();
        for (position, (_, full_name, geometry, _)) in nests.iter().enumerate() {
            if let Err(err) = index.insert(geometry, position) {
                tracing::warn!("DB-REFRESHER[{full_name}]: not checked for overlap: {err}");
            }
        }

        let mut disabled = vec![false; nests.len()];
        let mut count = 0;
        for (position, (id, full_name, geometry, area)) in nests.iter().enumerate() {
            let overlapping = index
                .candidates(geometry)
                .into_iter()
                .filter(|&other| other > position && !disabled.get(other).copied().unwrap_or(true))
                .find_map(|other| {
                    let (other_id, other_name, other_geometry, _) = nests.get(other)?;
                    let pct = 100.0 * geometry.intersection_area_m2(other_geometry) / area;
                    (pct > max_overlap_pct).then(|| (*other_id, other_name.clone(), pct))
                });
            let Some((other_id, other_name, pct)) = overlapping else {
                continue;
            };

            tracing::warn!(
                nest_id = %id,
                other_nest_id = %other_id,
                "DB-REFRESHER[{full_name}]: disabling, {pct:.1}% inside {other_name}"
            );
            let update = NestPartialUpdate::default()
                .disable(DiscardReason::Overlap)
                .clear_nesting()
                .updated_at(now);
            self.store.update_nest_partial(*id, &update).await?;
            if let Some(flag) = disabled.get_mut(position) {
                *flag = true;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::geometry::tests::square;
    use crate::domain::nest::tests::t0;
    use crate::persistence::memory::{MemoryNestStore, MemoryPointStore};
    use crate::persistence::models::tests::stored;

    fn refresher(store: &Arc<MemoryNestStore>, points: Vec<(f64, f64)>) -> NestRefresher {
        NestRefresher::new(
            Arc::clone(store) as Arc<dyn NestStore>,
            Some(Arc::new(MemoryPointStore::new(points)) as Arc<dyn PointStore>),
        )
    }

    fn filters() -> FiltersConfig {
        FiltersConfig {
            min_points: 2,
            ..FiltersConfig::default()
        }
    }

    async fn refresh(refresher: &NestRefresher, row: &StoredNest) -> Option<NestPartialUpdate> {
        let Ok(update) = refresher.refresh_nest(&filters(), false, row, t0()).await else {
            panic!("refresh succeeds");
        };
        update
    }

    #[tokio::test]
    async fn consistent_row_is_left_alone() {
        let store = Arc::new(MemoryNestStore::default());
        let row = stored(1, &square(0.0, 0.0, 0.01));
        store.put(row.clone());
        assert!(refresh(&refresher(&store, vec![]), &row).await.is_none());
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn missing_area_and_spawnpoints_are_filled_in() {
        let store = Arc::new(MemoryNestStore::default());
        let geometry = square(0.0, 0.0, 0.01);
        let mut row = stored(1, &geometry);
        row.m2 = None;
        row.spawnpoints = None;
        row.active = Some(false);
        row.discarded = Some("overlap".to_string());
        store.put(row.clone());

        let Some(update) = refresh(&refresher(&store, vec![(0.0, 0.0); 5]), &row).await else {
            panic!("row updated");
        };
        assert_eq!(update.spawnpoints, Some(Some(5)));
        assert_eq!(update.active, Some(true));
        assert_eq!(update.discarded, Some(None));
        assert_eq!(update.updated, Some(Some(t0().timestamp())));
        let Some(Some(m2)) = update.m2 else {
            panic!("area written");
        };
        assert!((m2 - geometry.area_m2()).abs() < 1e-6);
    }

    #[tokio::test]
    async fn stored_area_within_tolerance_is_kept() {
        let store = Arc::new(MemoryNestStore::default());
        let mut row = stored(1, &square(0.0, 0.0, 0.01));
        let area = row.m2.unwrap_or_default();
        row.m2 = Some(area + 50.0);
        assert!(refresh(&refresher(&store, vec![]), &row).await.is_none());
        row.m2 = Some(area + 500.0);
        let Some(update) = refresh(&refresher(&store, vec![]), &row).await else {
            panic!("row updated");
        };
        assert!(matches!(update.m2, Some(Some(m2)) if (m2 - area).abs() < 1e-6));
    }

    #[tokio::test]
    async fn invalid_geometry_is_discarded() {
        let store = Arc::new(MemoryNestStore::default());
        let mut row = stored(1, &square(0.0, 0.0, 0.01));
        row.polygon = Some(r#"{"type":"LineString","coordinates":[[0,0],[1,1]]}"#.to_string());
        row.pokemon_id = Some(7);
        let Some(update) = refresh(&refresher(&store, vec![]), &row).await else {
            panic!("row updated");
        };
        assert_eq!(update.discarded, Some(Some("invalid".to_string())));
        assert_eq!(update.active, Some(false));
        assert_eq!(update.m2, Some(None));
        assert_eq!(update.spawnpoints, Some(None));
        assert_eq!(update.pokemon_id, Some(None));
    }

    #[tokio::test]
    async fn too_few_spawnpoints_after_forced_refresh() {
        let store = Arc::new(MemoryNestStore::default());
        let row = stored(1, &square(0.0, 0.0, 0.01));
        let refresher = refresher(&store, vec![(0.0, 0.0)]);
        let Ok(Some(update)) = refresher.refresh_nest(&filters(), true, &row, t0()).await else {
            panic!("row updated");
        };
        assert_eq!(update.spawnpoints, Some(Some(1)));
        assert_eq!(update.discarded, Some(Some("spawnpoints".to_string())));
        assert_eq!(update.active, Some(false));
    }

    #[tokio::test]
    async fn contained_nest_is_disabled_by_overlap() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.02)));
        store.put(stored(2, &square(0.0, 0.0, 0.01)));
        store.put(stored(3, &square(5.0, 5.0, 0.01)));
        // 60% of nest 5 lies in nest 4, which is the same size
        store.put(stored(4, &square(1.0, 1.0, 0.01)));
        store.put(stored(5, &square(1.0, 1.004, 0.01)));

        let Ok(disabled) = refresher(&store, vec![]).disable_overlapping(50.0, t0()).await else {
            panic!("overlap pass succeeds");
        };
        assert_eq!(disabled, 2);
        let discarded = |id| store.row(id).and_then(|row| row.discarded);
        assert_eq!(discarded(2).as_deref(), Some("overlap"));
        assert_eq!(discarded(1), None);
        assert_eq!(discarded(3), None);
        assert_eq!(
            [discarded(4), discarded(5)].iter().filter(|d| d.is_some()).count(),
            1
        );
    }

    #[tokio::test]
    async fn refresh_all_visits_every_row_and_prunes() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.02)));
        store.put(stored(2, &square(0.0, 0.0, 0.01)));
        let mut tiny = stored(3, &square(3.0, 3.0, 0.00001));
        tiny.pokemon_id = Some(4);
        store.put(tiny);

        let cancel = CancellationToken::new();
        let Ok(report) = refresher(&store, vec![])
            .refresh_all(&filters(), false, &cancel, t0())
            .await
        else {
            panic!("refresh succeeds");
        };
        assert_eq!(report.visited, 3);
        assert_eq!(report.updated, 1);
        assert_eq!(report.overlap_disabled, 1);
        let Some(row) = store.row(3) else {
            panic!("row kept");
        };
        assert_eq!(row.discarded.as_deref(), Some("area"));
        assert_eq!(row.pokemon_id, None);
    }
}
