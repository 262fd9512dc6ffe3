//! In-memory stores for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{NestPartialUpdate, NestStore, PointStore, StoredNest};
use crate::domain::{NestGeometry, NestId};
use crate::error::NestError;

#[derive(Debug, Default)]
pub(crate) struct MemoryNestStore {
    rows: Mutex<BTreeMap<i64, StoredNest>>,
    updates: Mutex<Vec<(NestId, NestPartialUpdate)>>,
    failing: AtomicBool,
    page_requests: AtomicUsize,
}

impl MemoryNestStore {
    pub(crate) fn put(&self, row: StoredNest) {
        self.rows.lock().insert(row.nest_id, row);
    }

    pub(crate) fn row(&self, id: i64) -> Option<StoredNest> {
        self.rows.lock().get(&id).cloned()
    }

    pub(crate) fn updates(&self) -> Vec<(NestId, NestPartialUpdate)> {
        self.updates.lock().clone()
    }

    pub(crate) fn updates_for(&self, id: i64) -> Vec<NestPartialUpdate> {
        self.updates
            .lock()
            .iter()
            .filter(|(nest, _)| nest.get() == id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), NestError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(NestError::StoreUnavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn filtered(&self, keep: impl Fn(&StoredNest) -> bool) -> Vec<StoredNest> {
        self.rows.lock().values().filter(|row| keep(row)).cloned().collect()
    }
}

fn without_polygon(row: &StoredNest) -> StoredNest {
    StoredNest {
        polygon: None,
        ..row.clone()
    }
}

#[async_trait]
impl NestStore for MemoryNestStore {
    async fn insert_or_update_nest(&self, nest: &StoredNest) -> Result<(), NestError> {
        self.check()?;
        let mut rows = self.rows.lock();
        match rows.get_mut(&nest.nest_id) {
            Some(existing) => {
                *existing = StoredNest {
                    pokemon_id: existing.pokemon_id,
                    pokemon_form: existing.pokemon_form,
                    pokemon_avg: existing.pokemon_avg,
                    pokemon_ratio: existing.pokemon_ratio,
                    pokemon_count: existing.pokemon_count,
                    ..nest.clone()
                };
            }
            None => {
                rows.insert(nest.nest_id, nest.clone());
            }
        }
        Ok(())
    }

    async fn update_nest_partial(
        &self,
        id: NestId,
        update: &NestPartialUpdate,
    ) -> Result<(), NestError> {
        self.check()?;
        if update.is_empty() {
            return Ok(());
        }
        if let Some(row) = self.rows.lock().get_mut(&id.get()) {
            update.apply_to(row);
        }
        self.updates.lock().push((id, update.clone()));
        Ok(())
    }

    async fn get_nest_by_id(&self, id: NestId) -> Result<Option<StoredNest>, NestError> {
        self.check()?;
        Ok(self.row(id.get()))
    }

    async fn get_all_nests(&self) -> Result<Vec<StoredNest>, NestError> {
        self.check()?;
        Ok(self.filtered(|_| true))
    }

    async fn get_active_nests(&self) -> Result<Vec<StoredNest>, NestError> {
        self.check()?;
        Ok(self.filtered(StoredNest::is_active))
    }

    async fn get_inactive_nests(&self) -> Result<Vec<StoredNest>, NestError> {
        self.check()?;
        Ok(self.filtered(|row| !row.is_active()))
    }

    async fn get_nest_areas(&self) -> Result<Vec<String>, NestError> {
        self.check()?;
        let mut areas: Vec<String> = self
            .rows
            .lock()
            .values()
            .filter_map(|row| row.area_name.clone())
            .collect();
        areas.sort();
        areas.dedup();
        Ok(areas)
    }

    async fn get_nests_without_polygon(
        &self,
        ids: &[NestId],
    ) -> Result<HashMap<NestId, StoredNest>, NestError> {
        self.check()?;
        let rows = self.rows.lock();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(&id.get()).map(|row| (*id, without_polygon(row))))
            .collect())
    }

    async fn get_nests_page(
        &self,
        after: Option<NestId>,
        limit: usize,
        include_polygon: bool,
    ) -> Result<Vec<StoredNest>, NestError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let floor = after.map_or(i64::MIN, |id| id.get());
        Ok(self
            .rows
            .lock()
            .range((std::ops::Bound::Excluded(floor), std::ops::Bound::Unbounded))
            .take(limit)
            .map(|(_, row)| {
                if include_polygon {
                    row.clone()
                } else {
                    without_polygon(row)
                }
            })
            .collect())
    }
}

/// Answers point counts from a fixed list of `(lat, lon)` spawnpoints.
#[derive(Debug, Default)]
pub(crate) struct MemoryPointStore {
    points: Vec<(f64, f64)>,
    queries: AtomicUsize,
}

impl MemoryPointStore {
    pub(crate) fn new(points: Vec<(f64, f64)>) -> Self {
        Self {
            points,
            queries: AtomicUsize::new(0),
        }
    }

    pub(crate) fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PointStore for MemoryPointStore {
    async fn count_points_contained(&self, geometry: &NestGeometry) -> Result<i64, NestError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let inside = self
            .points
            .iter()
            .filter(|(lat, lon)| geometry.contains(*lat, *lon))
            .count();
        i64::try_from(inside).map_err(|e| NestError::Internal(e.to_string()))
    }
}
