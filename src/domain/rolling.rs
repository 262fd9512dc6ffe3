//! Rolling stats: an ordered run of periods plus their running sum.
//!
//! The running aggregate is kept equal to the sum of every period still
//! held (history plus the current period), so nest summaries are read off
//! it directly instead of walking history.
//!
//! # Concurrency
//!
//! - One readers-writer lock guards the structure (append, evict, purge).
//! - Observations take it shared; the current period and the running
//!   aggregate each have their own mutex, so concurrent writers never
//!   block on rotation bookkeeping beyond the shared lock.
//! - Rotation and purges take it exclusively. Rotation is the
//!   linearization point between the old and the new current period.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};

use super::time_period::{FrozenPeriod, PeriodCounts, TimePeriod};
use super::{NestId, SpeciesKey};

/// Copy of the rolling state at one instant.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Accumulated stats duration.
    pub duration: TimeDelta,
    /// Periods, oldest first. On rotation these are all frozen; from
    /// [`RollingStats::snapshot`] the last entry is a copy of the current
    /// period.
    pub periods: Vec<Arc<FrozenPeriod>>,
    /// Sum of `periods`.
    pub running: FrozenPeriod,
}

/// Outcome of a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeResult {
    /// Number of periods removed.
    pub periods: usize,
    /// Total duration removed.
    pub duration: TimeDelta,
}

impl Default for PurgeResult {
    fn default() -> Self {
        Self {
            periods: 0,
            duration: TimeDelta::zero(),
        }
    }
}

#[derive(Debug)]
struct RollingInner {
    history: VecDeque<Arc<FrozenPeriod>>,
    current: TimePeriod,
    running: Mutex<PeriodCounts>,
    running_start: DateTime<Utc>,
    /// Sum of `history` durations; the current period is not included.
    duration: TimeDelta,
}

impl RollingInner {
    fn reset_running_start(&mut self) {
        self.running_start = self
            .history
            .front()
            .map_or_else(|| self.current.start_time(), |p| p.start_time());
    }

    fn pop_oldest(&mut self) -> Option<TimeDelta> {
        let oldest = self.history.pop_front()?;
        let duration = oldest.duration();
        self.running.get_mut().subtract(oldest.counts());
        self.duration -= duration;
        Some(duration)
    }

    fn pop_newest(&mut self) -> Option<TimeDelta> {
        let newest = self.history.pop_back()?;
        let duration = newest.duration();
        self.running.get_mut().subtract(newest.counts());
        self.duration -= duration;
        Some(duration)
    }

    fn keep_recent(&mut self, keep: TimeDelta) -> PurgeResult {
        let mut result = PurgeResult::default();
        while self.duration > keep {
            let Some(duration) = self.pop_oldest() else {
                break;
            };
            result.periods += 1;
            result.duration += duration;
        }
        self.reset_running_start();
        result
    }
}

/// Rolling collection of time periods with a running aggregate.
#[derive(Debug)]
pub struct RollingStats {
    inner: RwLock<RollingInner>,
}

impl RollingStats {
    /// Starts empty with the first current period at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new(RollingInner {
                history: VecDeque::new(),
                current: TimePeriod::new(now),
                running: Mutex::new(PeriodCounts::default()),
                running_start: now,
                duration: TimeDelta::zero(),
            }),
        }
    }

    /// Counts one observation into the current period and the running
    /// aggregate.
    pub fn add_observation(&self, key: SpeciesKey, nests: &[NestId]) {
        let inner = self.inner.read();
        inner.current.add_observation(key, nests);
        inner.running.lock().add(key, nests);
    }

    /// Accumulated duration of the frozen periods still held.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.inner.read().duration
    }

    /// Number of periods held, including the current one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().history.len() + 1
    }

    /// Always `false`: there is always a current period.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Start of the current period.
    #[must_use]
    pub fn current_start(&self) -> DateTime<Utc> {
        self.inner.read().current.start_time()
    }

    /// Copies the rolling state as of `now`. Frozen periods are shared;
    /// the current period and the running aggregate are cloned.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let inner = self.inner.read();
        let mut periods: Vec<Arc<FrozenPeriod>> = inner.history.iter().map(Arc::clone).collect();
        periods.push(Arc::new(inner.current.snapshot(now)));
        let running = FrozenPeriod::from_parts(inner.running_start, now, inner.running.lock().clone());
        StatsSnapshot {
            duration: inner.duration + inner.current.duration_at(now),
            periods,
            running,
        }
    }

    /// Closes the current period at `now` and opens a new one.
    ///
    /// When `skip_min_global_pct > 0` and one species made up more than that
    /// share of the closing period, the period is discarded: its counts are
    /// removed from the aggregate and `None` is returned. Otherwise the
    /// period joins the history and the returned snapshot reflects the
    /// aggregate before periods older than `max_history` are evicted.
    pub fn rotate(
        &self,
        now: DateTime<Utc>,
        max_history: TimeDelta,
        skip_min_global_pct: f64,
    ) -> Option<StatsSnapshot> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let closing = std::mem::replace(&mut inner.current, TimePeriod::new(now));
        let frozen = closing.freeze(now);

        if skip_min_global_pct > 0.0
            && let Some((top, top_pct)) = frozen.global().most_frequent()
            && top_pct > skip_min_global_pct
        {
            tracing::warn!(
                species = %top,
                pct = top_pct,
                threshold = skip_min_global_pct,
                start = %frozen.start_time(),
                end = %frozen.end_time(),
                "STATS: skipping period: one species dominates globally"
            );
            inner.running.get_mut().subtract(frozen.counts());
            inner.keep_recent(max_history);
            return None;
        }

        inner.duration += frozen.duration();
        inner.history.push_back(Arc::new(frozen));

        let snapshot = StatsSnapshot {
            duration: inner.duration,
            periods: inner.history.iter().map(Arc::clone).collect(),
            running: FrozenPeriod::from_parts(
                inner.running_start,
                now,
                inner.running.get_mut().clone(),
            ),
        };

        let evicted = inner.keep_recent(max_history);
        if evicted.periods > 0 {
            tracing::debug!(
                periods = evicted.periods,
                minutes = evicted.duration.num_minutes(),
                "STATS: evicted periods past max history"
            );
        }

        Some(snapshot)
    }

    /// Evicts the oldest periods until the accumulated duration is at most
    /// `keep`. The current period is never evicted.
    pub fn keep_recent(&self, keep: TimeDelta) -> PurgeResult {
        self.inner.write().keep_recent(keep)
    }

    /// Evicts the oldest periods whose combined duration fits within `dur`.
    pub fn purge_oldest(&self, dur: TimeDelta) -> PurgeResult {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut result = PurgeResult::default();
        while let Some(oldest) = inner.history.front()
            && result.duration + oldest.duration() <= dur
        {
            let Some(duration) = inner.pop_oldest() else {
                break;
            };
            result.periods += 1;
            result.duration += duration;
        }
        inner.reset_running_start();
        result
    }

    /// Evicts the newest periods whose combined duration fits within `dur`.
    /// With `include_current`, the current period counts as the newest and
    /// is replaced by a fresh one starting at `now`.
    pub fn purge_newest(
        &self,
        now: DateTime<Utc>,
        dur: TimeDelta,
        include_current: bool,
    ) -> PurgeResult {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut result = PurgeResult::default();

        if include_current {
            let current_duration = inner.current.duration_at(now);
            if current_duration > dur {
                return result;
            }
            let closing = std::mem::replace(&mut inner.current, TimePeriod::new(now));
            let frozen = closing.freeze(now);
            inner.running.get_mut().subtract(frozen.counts());
            result.periods += 1;
            result.duration += current_duration;
        }

        while let Some(newest) = inner.history.back()
            && result.duration + newest.duration() <= dur
        {
            let Some(duration) = inner.pop_newest() else {
                break;
            };
            result.periods += 1;
            result.duration += duration;
        }
        inner.reset_running_start();
        result
    }
}
