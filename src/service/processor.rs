//! Nest processor: ingestion, rotation and the decision pass.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::ProcessorConfig;
use crate::domain::{
    Decision, DecisionThresholds, FrozenPeriod, Nest, NestMatcher, NestingSpecies, Observation,
    RollingStats, StatsSnapshot, decide,
};
use crate::persistence::{NestPartialUpdate, NestStore};
use crate::service::webhook::WebhookSender;

/// Counts from one decision pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// The closed period was discarded by the skip rule.
    pub skipped: bool,
    /// Nests a decision was made for.
    pub evaluated: usize,
    /// Nests with a nesting species after the pass.
    pub nesting: usize,
    /// Nests that gained a nesting species.
    pub started: usize,
    /// Nests whose nesting species changed.
    pub changed: usize,
    /// Nests whose stored nesting species was cleared.
    pub reset: usize,
    /// Nests that lost nesting too recently to clear it.
    pub reset_pending: usize,
    /// Store writes that failed.
    pub store_errors: usize,
}

/// Matches observations into a [`RollingStats`] and turns rotations into
/// nesting decisions.
///
/// A processor is immutable once built; a reload builds a new one around
/// the same rolling stats.
#[derive(Debug)]
pub struct NestProcessor {
    matcher: Arc<NestMatcher>,
    stats: Arc<RollingStats>,
    store: Arc<dyn NestStore>,
    webhooks: Arc<dyn WebhookSender>,
    config: ProcessorConfig,
}

impl NestProcessor {
    /// Creates a processor.
    #[must_use]
    pub fn new(
        matcher: Arc<NestMatcher>,
        stats: Arc<RollingStats>,
        store: Arc<dyn NestStore>,
        webhooks: Arc<dyn WebhookSender>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            matcher,
            stats,
            store,
            webhooks,
            config,
        }
    }

    /// The nests this processor matches against.
    #[must_use]
    pub const fn matcher(&self) -> &Arc<NestMatcher> {
        &self.matcher
    }

    /// The rolling stats, shared with earlier processors.
    #[must_use]
    pub const fn stats(&self) -> &Arc<RollingStats> {
        &self.stats
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Counts an observation. Returns the number of nests it fell in.
    pub fn add_observation(&self, observation: &Observation) -> usize {
        let nests = self.matcher.match_ids(observation.lat, observation.lon);
        self.stats.add_observation(observation.key, &nests);
        nests.len()
    }

    /// Closes the current period and, unless it was skipped, runs the
    /// decision pass over the result.
    pub async fn rotate_and_decide(&self, now: DateTime<Utc>) -> RotationReport {
        let rotated = self.stats.rotate(
            now,
            self.config.max_history(),
            self.config.skip_period_min_global_pct,
        );
        match rotated {
            Some(snapshot) => self.process_snapshot(&snapshot, now).await,
            None => RotationReport {
                skipped: true,
                ..RotationReport::default()
            },
        }
    }

    /// Runs the decision pass over `snapshot`, writing changes to the store
    /// and queueing webhooks for new nesting species.
    pub async fn process_snapshot(&self, snapshot: &StatsSnapshot, now: DateTime<Utc>) -> RotationReport {
        let running = &snapshot.running;
        let duration = snapshot.duration;
        let gaps = if running.duration() > duration { " with gaps" } else { "" };
        tracing::info!(
            periods = snapshot.periods.len(),
            duration_minutes = duration.num_minutes(),
            nests = running.counts().per_nest.len(),
            global_total = running.global().total(),
            "STATS: processing {} time period(s) ({} to {}{gaps})",
            snapshot.periods.len(),
            running.start_time().to_rfc3339(),
            running.end_time().to_rfc3339(),
        );

        if self.config.log_last_stats_period
            && let Some(last) = snapshot.periods.last()
        {
            self.log_last_period(last);
        }

        let thresholds = self.config.thresholds();
        let mut report = RotationReport::default();
        let prefix = format!("ALL-PERIODS({})", snapshot.periods.len());

        for nest_id in running.nest_ids() {
            let Some(nest) = self.matcher.by_id(nest_id) else {
                tracing::debug!(%nest_id, "STATS: ignoring nest no longer loaded");
                continue;
            };
            let Some(summary) = running.summary_for(nest_id, duration) else {
                continue;
            };
            let decision = decide(&summary, &thresholds);
            log_candidates(&prefix, &nest, &decision);

            if duration < thresholds.min_history {
                continue;
            }
            report.evaluated += 1;
            self.apply_decision(&nest, decision.nesting, now, &mut report).await;
        }

        tracing::info!(
            evaluated = report.evaluated,
            nesting = report.nesting,
            started = report.started,
            changed = report.changed,
            reset = report.reset,
            store_errors = report.store_errors,
            "STATS: decision pass done"
        );
        report
    }

    async fn apply_decision(
        &self,
        nest: &Nest,
        decided: Option<NestingSpecies>,
        now: DateTime<Utc>,
        report: &mut RotationReport,
    ) {
        let change = nest.stats.set_nesting(decided, now);
        let Some(current) = &change.current else {
            self.record_loss(nest, change.old.as_ref(), change.updated_at, now, report)
                .await;
            return;
        };

        report.nesting += 1;
        match &change.old {
            None => {
                tracing::info!(
                    nest_id = %nest.id,
                    species = %current.key,
                    "NEST-START[{}]: nesting pokemon is {}",
                    nest.full_name(),
                    current.key
                );
                report.started += 1;
                self.webhooks.add_nest_webhook(nest, current);
            }
            Some(old) if old.key != current.key => {
                tracing::info!(
                    nest_id = %nest.id,
                    species = %current.key,
                    "NEST-CHANGE[{}]: nesting pokemon changed from {} to {}",
                    nest.full_name(),
                    old.key,
                    current.key
                );
                report.changed += 1;
                self.webhooks.add_nest_webhook(nest, current);
            }
            Some(_) => {}
        }

        tracing::info!(
            nest_id = %nest.id,
            species = %current.key,
            "NEST[{}]: nesting {} for {}m (count {}/{}, nest {:.3}/h {:.3}%, global {:.3}/h {:.3}%)",
            nest.full_name(),
            current.key,
            (now - current.detected_at).num_minutes(),
            current.nest_count,
            current.nest_total,
            current.nest_hourly_count,
            current.nest_pct(),
            current.global_hourly_count,
            current.global_pct(),
        );

        let update = NestPartialUpdate::nesting(current).updated_at(now);
        if let Err(err) = self.store.update_nest_partial(nest.id, &update).await {
            tracing::error!(nest_id = %nest.id, "NEST[{}]: failed to store nesting pokemon: {err}", nest.full_name());
            report.store_errors += 1;
            return;
        }
        nest.stats.set_updated_at(now);
    }

    async fn record_loss(
        &self,
        nest: &Nest,
        old: Option<&NestingSpecies>,
        updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        report: &mut RotationReport,
    ) {
        if let Some(old) = old {
            tracing::info!(
                nest_id = %nest.id,
                species = %old.key,
                "NEST[{}]: no longer nesting {}",
                nest.full_name(),
                old.key
            );
        }

        let age = self.config.no_nesting_age();
        let expired = updated_at.is_none_or(|at| now - at > age);
        if !expired {
            tracing::debug!(
                nest_id = %nest.id,
                "NEST-RESET-PENDING[{}]: keeping stored nesting pokemon until {}h without one",
                nest.full_name(),
                age.num_hours()
            );
            report.reset_pending += 1;
            return;
        }

        tracing::info!(nest_id = %nest.id, "NEST-RESET[{}]: clearing stored nesting pokemon", nest.full_name());
        let update = NestPartialUpdate::default().clear_nesting().updated_at(now);
        if let Err(err) = self.store.update_nest_partial(nest.id, &update).await {
            tracing::error!(nest_id = %nest.id, "NEST-RESET[{}]: failed to clear nesting pokemon: {err}", nest.full_name());
            report.store_errors += 1;
        }
        nest.stats.set_updated_at(now);
        report.reset += 1;
    }

    fn log_last_period(&self, last: &FrozenPeriod) {
        let duration = last.duration();
        tracing::info!(
            duration_minutes = duration.num_minutes(),
            nests = last.counts().per_nest.len(),
            global_total = last.global().total(),
            "STATS: LAST-PERIOD {} to {}",
            last.start_time().to_rfc3339(),
            last.end_time().to_rfc3339(),
        );
        for entry in last.ordered_global().iter().take(10) {
            tracing::info!(
                "STATS: LAST-PERIOD #{} {}: {}/{} ({:.3}%)",
                entry.rank,
                entry.key,
                entry.count,
                entry.total,
                entry.pct()
            );
        }
        let thresholds = DecisionThresholds {
            min_history: TimeDelta::zero(),
            ..self.config.thresholds()
        };
        for nest_id in last.nest_ids() {
            let Some(nest) = self.matcher.by_id(nest_id) else {
                continue;
            };
            if let Some(summary) = last.summary_for(nest_id, duration) {
                log_candidates("LAST-PERIOD", &nest, &decide(&summary, &thresholds));
            }
        }
    }
}

fn log_candidates(prefix: &str, nest: &Nest, decision: &Decision) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    for verdict in &decision.candidates {
        let entry = &verdict.entry;
        let outcome = verdict
            .rejection
            .as_ref()
            .map_or_else(|| "nesting".to_string(), |r| format!("rejected: {r}"));
        tracing::debug!(
            nest_id = %nest.id,
            species = %entry.key,
            "NEST[{}]: {prefix} #{} {} {}/{} nest {:.3}% global {}/{} {:.3}% ratio {:.3}: {outcome}",
            nest.full_name(),
            entry.rank,
            entry.key,
            entry.count,
            entry.total,
            verdict.nest_pct,
            entry.global,
            entry.global_total,
            verdict.global_pct,
            verdict.ratio,
        );
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::geometry::tests::square;
    use crate::domain::matcher::tests::nest_at;
    use crate::domain::nest::tests::t0;
    use crate::domain::{NestId, SpeciesKey};
    use crate::persistence::memory::MemoryNestStore;
    use crate::persistence::models::tests::stored;
    use crate::service::webhook::tests::RecordingSender;

    pub(crate) fn s1_config() -> ProcessorConfig {
        ProcessorConfig {
            rotation_interval_minutes: 1,
            min_history_duration_hours: 1,
            min_nest_pct: 12.0,
            min_nest_to_global_ratio: 8.0,
            max_global_pct: 15.0,
            min_total_observations: 12,
            min_nest_observations: 4,
            ..ProcessorConfig::default()
        }
    }

    struct Harness {
        processor: NestProcessor,
        store: Arc<MemoryNestStore>,
        webhooks: Arc<RecordingSender>,
    }

    fn harness(config: ProcessorConfig) -> Harness {
        let geometry = square(0.0, 0.0, 0.01);
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &geometry));
        let mut matcher = NestMatcher::new();
        let Ok(()) = matcher.add(nest_at(1, geometry)) else {
            panic!("add nest");
        };
        let webhooks = Arc::new(RecordingSender::default());
        let processor = NestProcessor::new(
            Arc::new(matcher),
            Arc::new(RollingStats::new(t0())),
            Arc::clone(&store) as Arc<dyn NestStore>,
            Arc::clone(&webhooks) as Arc<dyn WebhookSender>,
            config,
        );
        Harness {
            processor,
            store,
            webhooks,
        }
    }

    fn minutes(n: i64) -> TimeDelta {
        TimeDelta::minutes(n)
    }

    #[tokio::test]
    async fn ratio_below_minimum_is_not_nesting() {
        let h = harness(s1_config());
        // 15 of species 7 and one each of 1..=5 inside: nest pct 75,
        // global pct 10, ratio 7.5.
        for _ in 0..15 {
            h.processor.add_observation(&Observation::new(SpeciesKey::new(7, 0), 0.0, 0.0));
        }
        for species in [1_u16, 2, 3, 4, 5] {
            h.processor.add_observation(&Observation::new(SpeciesKey::new(species, 0), 0.0, 0.0));
        }
        for species in 1..=10_u16 {
            let outside = if species == 7 { 85 } else { 100 - u64::from(species <= 5) };
            for _ in 0..outside {
                h.processor.add_observation(&Observation::new(SpeciesKey::new(species, 0), 5.0, 5.0));
            }
        }
        let report = h.processor.rotate_and_decide(t0() + minutes(60)).await;
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.nesting, 0);
        assert!(h.webhooks.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn qualifying_species_starts_nesting_and_is_stored() {
        let h = harness(s1_config());
        feed_s1_pass(&h.processor);
        let report = h.processor.rotate_and_decide(t0() + minutes(60)).await;
        assert_eq!(report.started, 1);
        assert_eq!(report.store_errors, 0);

        let Some(nest) = h.processor.matcher().by_id(NestId::new(1)) else {
            panic!("nest loaded");
        };
        let Some(nesting) = nest.stats.nesting() else {
            panic!("nest is nesting");
        };
        assert_eq!(nesting.key, SpeciesKey::new(7, 0));
        assert_eq!(nesting.nest_count, 18);
        assert_eq!(nesting.nest_total, 20);
        assert_eq!(nesting.detected_at, t0() + minutes(60));

        let Some(row) = h.store.row(1) else {
            panic!("row exists");
        };
        assert_eq!(row.pokemon_id, Some(7));
        assert_eq!(row.pokemon_count, Some(18.0));
        assert_eq!(row.updated, Some((t0() + minutes(60)).timestamp()));

        let sent = h.webhooks.sent.lock();
        let [message] = sent.as_slice() else {
            panic!("one webhook");
        };
        assert_eq!(message.pokemon_id, 7);
    }

    /// 1000 events globally, 100 of each species 1..=10; nest 1 sees 18 of
    /// species 7 and one each of species 1 and 2.
    fn feed_s1_pass(processor: &NestProcessor) {
        for species in 1..=10_u16 {
            let key = SpeciesKey::new(species, 0);
            let inside = match species {
                7 => 18,
                1 | 2 => 1,
                _ => 0,
            };
            for n in 0..100 {
                let (lat, lon) = if n < inside { (0.0, 0.0) } else { (5.0, 5.0) };
                processor.add_observation(&Observation::new(key, lat, lon));
            }
        }
    }

    #[tokio::test]
    async fn same_species_keeps_detection_time_and_sends_no_webhook() {
        let h = harness(s1_config());
        feed_s1_pass(&h.processor);
        h.processor.rotate_and_decide(t0() + minutes(60)).await;
        feed_s1_pass(&h.processor);
        let report = h.processor.rotate_and_decide(t0() + minutes(61)).await;
        assert_eq!(report.nesting, 1);
        assert_eq!(report.started + report.changed, 0);
        assert_eq!(h.webhooks.sent.lock().len(), 1);

        let Some(nest) = h.processor.matcher().by_id(NestId::new(1)) else {
            panic!("nest loaded");
        };
        let Some(nesting) = nest.stats.nesting() else {
            panic!("still nesting");
        };
        assert_eq!(nesting.detected_at, t0() + minutes(60));
        assert_eq!(nesting.updated_at, t0() + minutes(61));
    }

    #[tokio::test]
    async fn short_history_makes_no_decision() {
        let h = harness(s1_config());
        feed_s1_pass(&h.processor);
        let report = h.processor.rotate_and_decide(t0() + minutes(30)).await;
        assert_eq!(report.evaluated, 0);
        assert!(h.store.updates().is_empty());
        let Some(nest) = h.processor.matcher().by_id(NestId::new(1)) else {
            panic!("nest loaded");
        };
        assert!(nest.stats.nesting().is_none());
    }

    #[tokio::test]
    async fn skipped_period_returns_skipped_report() {
        let h = harness(s1_config());
        for _ in 0..50 {
            h.processor.add_observation(&Observation::new(SpeciesKey::new(1, 0), 5.0, 5.0));
        }
        let report = h.processor.rotate_and_decide(t0() + minutes(60)).await;
        assert!(report.skipped);
        assert_eq!(h.processor.stats().duration(), TimeDelta::zero());
    }

    #[tokio::test]
    async fn loss_is_pending_then_cleared_after_grace() {
        let h = harness(s1_config());
        feed_s1_pass(&h.processor);
        let detected = t0() + minutes(60);
        h.processor.rotate_and_decide(detected).await;

        // A fresh hour without species 7 in the nest.
        h.processor.stats().keep_recent(TimeDelta::zero());
        let at_6h = detected + TimeDelta::hours(6);
        let feed_even = |processor: &NestProcessor| {
            for species in 1..=10_u16 {
                for n in 0..100 {
                    let (lat, lon) = if n < 2 { (0.0, 0.0) } else { (5.0, 5.0) };
                    processor.add_observation(&Observation::new(SpeciesKey::new(species, 0), lat, lon));
                }
            }
        };

        feed_even(&h.processor);
        let Some(snapshot) = h.processor.stats().rotate(at_6h, TimeDelta::hours(12), 0.0) else {
            panic!("not skipped");
        };
        let pending = h.processor.process_snapshot(&snapshot, at_6h).await;
        assert_eq!(pending.reset_pending, 1);
        let Some(row) = h.store.row(1) else {
            panic!("row exists");
        };
        assert_eq!(row.pokemon_id, Some(7));

        let at_13h = detected + TimeDelta::hours(13);
        feed_even(&h.processor);
        let Some(snapshot) = h.processor.stats().rotate(at_13h, TimeDelta::hours(12), 0.0) else {
            panic!("not skipped");
        };
        let cleared = h.processor.process_snapshot(&snapshot, at_13h).await;
        assert_eq!(cleared.reset, 1);
        let Some(row) = h.store.row(1) else {
            panic!("row exists");
        };
        assert_eq!(row.pokemon_id, None);
        assert_eq!(row.updated, Some(at_13h.timestamp()));
    }

    #[tokio::test]
    async fn store_failure_is_counted_and_keeps_memory_state() {
        let h = harness(s1_config());
        feed_s1_pass(&h.processor);
        h.store.set_failing(true);
        let report = h.processor.rotate_and_decide(t0() + minutes(60)).await;
        assert_eq!(report.store_errors, 1);
        assert_eq!(report.started, 1);
        let Some(nest) = h.processor.matcher().by_id(NestId::new(1)) else {
            panic!("nest loaded");
        };
        assert!(nest.stats.nesting().is_some());
    }

    #[test]
    fn observation_reports_matched_nest_count() {
        let h = harness(s1_config());
        assert_eq!(h.processor.add_observation(&Observation::new(SpeciesKey::new(1, 0), 0.0, 0.0)), 1);
        assert_eq!(h.processor.add_observation(&Observation::new(SpeciesKey::new(1, 0), 9.0, 9.0)), 0);
        let snapshot = h.processor.stats().snapshot(t0() + minutes(1));
        assert_eq!(snapshot.running.global().total(), 2);
    }
}
