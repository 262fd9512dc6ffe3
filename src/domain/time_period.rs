//! Time-period accumulators.
//!
//! A [`TimePeriod`] is the live, still-mutating period: writers add
//! observations under its own mutex. Rotation consumes it into a
//! [`FrozenPeriod`], which is immutable and read without locks.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use super::{NestId, SpeciesCounts, SpeciesKey};

/// Global and per-nest counts for one window of time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodCounts {
    /// Every observation, matched or not.
    pub global: SpeciesCounts,
    /// Observations that fell inside each nest.
    pub per_nest: HashMap<NestId, SpeciesCounts>,
}

impl PeriodCounts {
    /// Counts one observation globally and once per matched nest.
    pub fn add(&mut self, key: SpeciesKey, nests: &[NestId]) {
        self.global.add_one(key);
        for nest_id in nests {
            self.per_nest.entry(*nest_id).or_default().add_one(key);
        }
    }

    /// Removes `other` from these counts, dropping nests that reach zero.
    pub fn subtract(&mut self, other: &Self) {
        self.global.subtract(&other.global);
        for (nest_id, counts) in &other.per_nest {
            let Some(current) = self.per_nest.get_mut(nest_id) else {
                tracing::error!(%nest_id, "subtracting counts for a nest that was never counted");
                continue;
            };
            if current.subtract(counts) {
                self.per_nest.remove(nest_id);
            }
        }
    }
}

/// Ranked global entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalEntry {
    /// 1-based rank.
    pub rank: usize,
    /// Species.
    pub key: SpeciesKey,
    /// Observations of this species.
    pub count: u64,
    /// All observations.
    pub total: u64,
}

impl GlobalEntry {
    /// Share of all observations in percent.
    #[must_use]
    pub fn pct(&self) -> f64 {
        pct(self.count, self.total)
    }
}

/// One species row of a nest summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryEntry {
    /// 1-based rank.
    pub rank: usize,
    /// Species.
    pub key: SpeciesKey,
    /// Observations of this species inside the nest.
    pub count: u64,
    /// All observations inside the nest.
    pub total: u64,
    /// Observations of this species everywhere.
    pub global: u64,
    /// All observations everywhere.
    pub global_total: u64,
}

impl SummaryEntry {
    /// Share of the nest's observations in percent.
    #[must_use]
    pub fn nest_pct(&self) -> f64 {
        pct(self.count, self.total)
    }

    /// Share of all observations in percent.
    #[must_use]
    pub fn global_pct(&self) -> f64 {
        pct(self.global, self.global_total)
    }
}

/// Per-nest view of a period, ranked by nest count.
#[derive(Debug, Clone, PartialEq)]
pub struct NestSummary {
    /// Nest the entries belong to.
    pub nest_id: NestId,
    /// Start of the covered window.
    pub start_time: DateTime<Utc>,
    /// End of the covered window.
    pub end_time: DateTime<Utc>,
    /// Accumulated stats duration. Gaps left by skipped periods are not
    /// counted, so this may be shorter than `end_time - start_time`.
    pub duration: TimeDelta,
    /// Entries sorted by count desc, then global count asc, then species.
    pub entries: Vec<SummaryEntry>,
}

/// The current period. Writers may share it; its counts sit behind a mutex.
#[derive(Debug)]
pub struct TimePeriod {
    start_time: DateTime<Utc>,
    counts: Mutex<PeriodCounts>,
}

impl TimePeriod {
    /// Starts an empty period at `start_time`.
    #[must_use]
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            counts: Mutex::new(PeriodCounts::default()),
        }
    }

    /// Start of the period.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Counts one observation for the global bucket and each matched nest.
    pub fn add_observation(&self, key: SpeciesKey, nests: &[NestId]) {
        self.counts.lock().add(key, nests);
    }

    /// Elapsed time up to `now`, truncated to whole minutes.
    #[must_use]
    pub fn duration_at(&self, now: DateTime<Utc>) -> TimeDelta {
        truncate_to_minute(now - self.start_time)
    }

    /// Copies the period as if it ended at `now`. The live period keeps
    /// accepting observations.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> FrozenPeriod {
        FrozenPeriod {
            start_time: self.start_time,
            end_time: now,
            counts: self.counts.lock().clone(),
        }
    }

    /// Ends the period at `end_time`.
    #[must_use]
    pub fn freeze(self, end_time: DateTime<Utc>) -> FrozenPeriod {
        FrozenPeriod {
            start_time: self.start_time,
            end_time,
            counts: self.counts.into_inner(),
        }
    }
}

/// A finished period. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenPeriod {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    counts: PeriodCounts,
}

impl FrozenPeriod {
    /// Builds a frozen period from raw parts.
    #[must_use]
    pub const fn from_parts(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        counts: PeriodCounts,
    ) -> Self {
        Self {
            start_time,
            end_time,
            counts,
        }
    }

    /// Start of the period.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// End of the period.
    #[must_use]
    pub const fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// `end_time - start_time`, truncated to whole minutes.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        truncate_to_minute(self.end_time - self.start_time)
    }

    /// Raw counts.
    #[must_use]
    pub const fn counts(&self) -> &PeriodCounts {
        &self.counts
    }

    /// Global bucket.
    #[must_use]
    pub const fn global(&self) -> &SpeciesCounts {
        &self.counts.global
    }

    /// Bucket for a nest, if anything was counted there.
    #[must_use]
    pub fn nest(&self, nest_id: NestId) -> Option<&SpeciesCounts> {
        self.counts.per_nest.get(&nest_id)
    }

    /// Ids of every nest with counts, ascending.
    #[must_use]
    pub fn nest_ids(&self) -> Vec<NestId> {
        let mut ids: Vec<NestId> = self.counts.per_nest.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Global species ranked by count desc, then species id and form asc.
    #[must_use]
    pub fn ordered_global(&self) -> Vec<GlobalEntry> {
        let global = &self.counts.global;
        let mut entries: Vec<(SpeciesKey, u64)> =
            global.iter().map(|(key, count)| (*key, *count)).collect();
        entries.sort_unstable_by(|(ka, ca), (kb, cb)| cb.cmp(ca).then_with(|| ka.cmp(kb)));
        entries
            .into_iter()
            .enumerate()
            .map(|(idx, (key, count))| GlobalEntry {
                rank: idx + 1,
                key,
                count,
                total: global.total(),
            })
            .collect()
    }

    /// Ranked summary for one nest. `duration` is reported as given.
    #[must_use]
    pub fn summary_for(&self, nest_id: NestId, duration: TimeDelta) -> Option<NestSummary> {
        let nest = self.counts.per_nest.get(&nest_id)?;
        let global = &self.counts.global;

        let mut entries: Vec<SummaryEntry> = nest
            .iter()
            .map(|(key, count)| SummaryEntry {
                rank: 0,
                key: *key,
                count: *count,
                total: nest.total(),
                global: global.get(key),
                global_total: global.total(),
            })
            .collect();
        entries.sort_unstable_by(compare_summary_entries);
        for (idx, entry) in entries.iter_mut().enumerate() {
            entry.rank = idx + 1;
        }

        Some(NestSummary {
            nest_id,
            start_time: self.start_time,
            end_time: self.end_time,
            duration,
            entries,
        })
    }
}

fn compare_summary_entries(a: &SummaryEntry, b: &SummaryEntry) -> Ordering {
    b.count
        .cmp(&a.count)
        .then_with(|| a.global.cmp(&b.global))
        .then_with(|| a.key.cmp(&b.key))
}

fn truncate_to_minute(delta: TimeDelta) -> TimeDelta {
    TimeDelta::minutes(delta.num_minutes())
}

#[allow(clippy::cast_precision_loss)]
fn pct(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * count as f64 / total as f64
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        let Some(t) = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single() else {
            panic!("valid timestamp");
        };
        t
    }

    fn key(species: u16) -> SpeciesKey {
        SpeciesKey::new(species, 0)
    }

    #[test]
    fn add_observation_counts_globally_and_per_nest() {
        let period = TimePeriod::new(t0());
        let a = NestId::new(1);
        let b = NestId::new(2);
        period.add_observation(key(1), &[a, b]);
        period.add_observation(key(1), &[a]);
        period.add_observation(key(2), &[]);

        let frozen = period.freeze(t0() + TimeDelta::minutes(5));
        assert_eq!(frozen.global().total(), 3);
        assert_eq!(frozen.nest(a).map(SpeciesCounts::total), Some(2));
        assert_eq!(frozen.nest(b).map(SpeciesCounts::total), Some(1));
        assert_eq!(frozen.nest_ids(), vec![a, b]);
    }

    #[test]
    fn duration_truncates_to_minutes() {
        let period = TimePeriod::new(t0());
        assert_eq!(
            period.duration_at(t0() + TimeDelta::seconds(119)),
            TimeDelta::minutes(1)
        );
        let frozen = period.freeze(t0() + TimeDelta::seconds(61));
        assert_eq!(frozen.duration(), TimeDelta::minutes(1));
    }

    #[test]
    fn snapshot_leaves_period_live() {
        let period = TimePeriod::new(t0());
        period.add_observation(key(1), &[]);
        let snap = period.snapshot(t0() + TimeDelta::minutes(1));
        period.add_observation(key(1), &[]);
        assert_eq!(snap.global().total(), 1);
        let frozen = period.freeze(t0() + TimeDelta::minutes(2));
        assert_eq!(frozen.global().total(), 2);
    }

    #[test]
    fn ordered_global_breaks_ties_by_species() {
        let period = TimePeriod::new(t0());
        for species in [3, 2, 2, 1, 3, 5] {
            period.add_observation(key(species), &[]);
        }
        let frozen = period.freeze(t0());
        let order: Vec<(usize, u16, u64)> = frozen
            .ordered_global()
            .iter()
            .map(|e| (e.rank, e.key.species_id, e.count))
            .collect();
        assert_eq!(order, vec![(1, 2, 2), (2, 3, 2), (3, 1, 1), (4, 5, 1)]);
    }

    #[test]
    fn summary_prefers_globally_rare_species_on_ties() {
        let nest = NestId::new(10);
        let period = TimePeriod::new(t0());
        // species 1 and 2 tie inside the nest; species 1 is common elsewhere
        for species in [1, 1, 2, 2] {
            period.add_observation(key(species), &[nest]);
        }
        for _ in 0..10 {
            period.add_observation(key(1), &[]);
        }
        let frozen = period.freeze(t0() + TimeDelta::hours(1));
        let Some(summary) = frozen.summary_for(nest, TimeDelta::minutes(42)) else {
            panic!("nest has counts");
        };
        assert_eq!(summary.duration, TimeDelta::minutes(42));
        let Some(first) = summary.entries.first() else {
            panic!("summary has entries");
        };
        assert_eq!(first.key, key(2));
        assert_eq!(first.rank, 1);
        assert_eq!(first.total, 4);
        assert_eq!(first.global_total, 14);
        assert!((first.nest_pct() - 50.0).abs() < f64::EPSILON);
        assert!(frozen.summary_for(NestId::new(99), TimeDelta::zero()).is_none());
    }

    #[test]
    fn subtract_removes_emptied_nests() {
        let nest = NestId::new(1);
        let mut total = PeriodCounts::default();
        total.add(key(1), &[nest]);
        let mut part = PeriodCounts::default();
        part.add(key(1), &[nest]);
        total.subtract(&part);
        assert!(total.per_nest.is_empty());
        assert!(total.global.is_empty());
    }
}
