//! Species count buckets.
//!
//! A [`SpeciesCounts`] is a `{total, species → count}` pair. The total is
//! always the sum of the per-species counts, and a species whose count
//! drops to zero is removed rather than kept at 0.

use std::collections::HashMap;

use super::SpeciesKey;

/// Per-species observation counts plus their total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeciesCounts {
    total: u64,
    by_species: HashMap<SpeciesKey, u64>,
}

impl SpeciesCounts {
    /// Creates an empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of observations in the bucket.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Count for one species, 0 when absent.
    #[must_use]
    pub fn get(&self, key: &SpeciesKey) -> u64 {
        self.by_species.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct species present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_species.len()
    }

    /// Returns `true` if nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Iterates `(species, count)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&SpeciesKey, &u64)> {
        self.by_species.iter()
    }

    /// Counts one observation of `key`.
    pub fn add_one(&mut self, key: SpeciesKey) {
        self.total += 1;
        *self.by_species.entry(key).or_insert(0) += 1;
    }

    /// Removes `other`'s counts from this bucket. Returns `true` when the
    /// bucket is empty afterwards.
    ///
    /// Subtracting more than was counted is a bookkeeping bug: it is logged
    /// and the count is clamped at zero.
    pub fn subtract(&mut self, other: &Self) -> bool {
        for (key, count) in &other.by_species {
            let Some(current) = self.by_species.get_mut(key) else {
                tracing::error!(species = %key, count, "subtracting species that was never counted");
                continue;
            };
            if *current < *count {
                tracing::error!(
                    species = %key,
                    have = *current,
                    subtracting = count,
                    "species count would go negative"
                );
            }
            *current = current.saturating_sub(*count);
            if *current == 0 {
                self.by_species.remove(key);
            }
        }

        if self.total < other.total {
            tracing::error!(
                have = self.total,
                subtracting = other.total,
                "bucket total would go negative"
            );
        }
        self.total = self.total.saturating_sub(other.total);
        if self.total == 0 {
            self.by_species.clear();
        }
        self.total == 0
    }

    /// Returns the most frequent species and its share of the total in
    /// percent. Ties go to the smallest key. `None` when empty.
    #[must_use]
    pub fn most_frequent(&self) -> Option<(SpeciesKey, f64)> {
        if self.total == 0 {
            return None;
        }
        let (key, count) = self
            .by_species
            .iter()
            .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then_with(|| kb.cmp(ka)))?;
        #[allow(clippy::cast_precision_loss)]
        let pct = 100.0 * *count as f64 / self.total as f64;
        Some((*key, pct))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn bucket(entries: &[(u16, u64)]) -> SpeciesCounts {
        let mut counts = SpeciesCounts::new();
        for (species, n) in entries {
            for _ in 0..*n {
                counts.add_one(SpeciesKey::new(*species, 0));
            }
        }
        counts
    }

    fn sum_matches_total(counts: &SpeciesCounts) -> bool {
        counts.iter().map(|(_, c)| *c).sum::<u64>() == counts.total()
    }

    #[test]
    fn add_one_keeps_total_in_sync() {
        let counts = bucket(&[(1, 3), (2, 2)]);
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.get(&SpeciesKey::new(1, 0)), 3);
        assert!(sum_matches_total(&counts));
    }

    #[test]
    fn subtract_drops_zeroed_species() {
        let mut counts = bucket(&[(1, 3), (2, 2)]);
        let empty = counts.subtract(&bucket(&[(2, 2)]));
        assert!(!empty);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(&SpeciesKey::new(2, 0)), 0);
        assert!(sum_matches_total(&counts));
    }

    #[test]
    fn subtract_everything_clears() {
        let mut counts = bucket(&[(1, 3), (2, 2)]);
        let other = counts.clone();
        assert!(counts.subtract(&other));
        assert!(counts.is_empty());
        assert_eq!(counts.len(), 0);
    }

    #[test]
    fn over_subtraction_clamps_at_zero() {
        let mut counts = bucket(&[(1, 1)]);
        assert!(counts.subtract(&bucket(&[(1, 4)])));
        assert_eq!(counts.total(), 0);
        assert_eq!(counts.len(), 0);
    }

    #[test]
    fn most_frequent_reports_percentage() {
        let counts = bucket(&[(1, 1), (2, 3)]);
        let Some((key, pct)) = counts.most_frequent() else {
            panic!("bucket is not empty");
        };
        assert_eq!(key, SpeciesKey::new(2, 0));
        assert!((pct - 75.0).abs() < f64::EPSILON);
        assert!(SpeciesCounts::new().most_frequent().is_none());
    }

    #[test]
    fn most_frequent_tie_prefers_smallest_key() {
        let counts = bucket(&[(5, 2), (3, 2)]);
        let Some((key, _)) = counts.most_frequent() else {
            panic!("bucket is not empty");
        };
        assert_eq!(key, SpeciesKey::new(3, 0));
    }
}
