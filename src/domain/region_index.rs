//! R-tree point-in-polygon index.
//!
//! Entries are keyed by their bounding box; a search walks the boxes that
//! contain the point and then runs the exact polygon test on each.

use rstar::{AABB, RTree, RTreeObject};
use parking_lot::RwLock;

use super::NestGeometry;
use crate::error::NestError;

#[derive(Debug)]
struct IndexEntry<V> {
    envelope: AABB<[f64; 2]>,
    geometry: NestGeometry,
    value: V,
}

impl<V> RTreeObject for IndexEntry<V> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index from polygons to values.
///
/// Searches take a shared lock; inserts take it exclusively.
#[derive(Debug)]
pub struct RegionIndex<V> {
    tree: RwLock<RTree<IndexEntry<V>>>,
}

impl<V: Clone> RegionIndex<V> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(RTree::new()),
        }
    }

    /// Adds `geometry` with its associated value.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::GeometryInvalid`] if the geometry has no
    /// bounding box (it is empty).
    pub fn insert(&self, geometry: &NestGeometry, value: V) -> Result<(), NestError> {
        let rect = geometry
            .bounding_rect()
            .ok_or_else(|| NestError::GeometryInvalid("geometry is empty".to_string()))?;
        let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.tree.write().insert(IndexEntry {
            envelope,
            geometry: geometry.clone(),
            value,
        });
        Ok(())
    }

    /// Values whose geometry contains `(lat, lon)`, in no particular order.
    #[must_use]
    pub fn search(&self, lat: f64, lon: f64) -> Vec<V> {
        self.search_map(lat, lon, V::clone)
    }

    /// Like [`search`](Self::search), projecting each hit through `f`
    /// under the read lock instead of cloning the value.
    #[must_use]
    pub fn search_map<T>(&self, lat: f64, lon: f64, f: impl Fn(&V) -> T) -> Vec<T> {
        let point = AABB::from_point([lon, lat]);
        self.tree
            .read()
            .locate_in_envelope_intersecting(&point)
            .filter(|entry| entry.geometry.contains(lat, lon))
            .map(|entry| f(&entry.value))
            .collect()
    }

    /// Values whose bounding box intersects `geometry`'s bounding box.
    #[must_use]
    pub fn candidates(&self, geometry: &NestGeometry) -> Vec<V> {
        let Some(rect) = geometry.bounding_rect() else {
            return Vec::new();
        };
        let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.tree
            .read()
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.read().size()
    }

    /// Returns `true` if the index holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for RegionIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}
