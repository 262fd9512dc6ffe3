//! Nest matcher: the spatial index plus an id map.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Nest, NestId, RegionIndex};
use crate::error::NestError;

/// The set of active nests a processor matches observations against.
///
/// Built once per reload and not modified after it is published; a reload
/// builds a fresh matcher.
#[derive(Debug, Default)]
pub struct NestMatcher {
    index: RegionIndex<Arc<Nest>>,
    by_id: HashMap<NestId, Arc<Nest>>,
}

impl NestMatcher {
    /// Creates an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a nest.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::DuplicateNest`] if the id is already present, or
    /// [`NestError::GeometryInvalid`] if the geometry cannot be indexed.
    pub fn add(&mut self, nest: Arc<Nest>) -> Result<(), NestError> {
        if self.by_id.contains_key(&nest.id) {
            return Err(NestError::DuplicateNest(nest.id));
        }
        self.index.insert(&nest.geometry, Arc::clone(&nest))?;
        self.by_id.insert(nest.id, nest);
        Ok(())
    }

    /// Nests containing the point.
    #[must_use]
    pub fn matches(&self, lat: f64, lon: f64) -> Vec<Arc<Nest>> {
        self.index.search(lat, lon)
    }

    /// Ids of the nests containing the point.
    #[must_use]
    pub fn match_ids(&self, lat: f64, lon: f64) -> Vec<NestId> {
        self.index.search_map(lat, lon, |nest| nest.id)
    }

    /// Looks a nest up by id.
    #[must_use]
    pub fn by_id(&self, id: NestId) -> Option<Arc<Nest>> {
        self.by_id.get(&id).map(Arc::clone)
    }

    /// Every nest, sorted by id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Nest>> {
        let mut nests: Vec<Arc<Nest>> = self.by_id.values().map(Arc::clone).collect();
        nests.sort_unstable_by_key(|nest| nest.id);
        nests
    }

    /// Number of nests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if no nest was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
