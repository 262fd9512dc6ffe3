//! Processor manager: owns the published processor, reloads it, and runs
//! the rotation schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{FiltersConfig, ProcessorConfig};
use crate::domain::{Observation, RollingStats};
use crate::error::NestError;
use crate::service::loader::{LoadReport, NestLoader};
use crate::service::processor::NestProcessor;
use crate::service::webhook::WebhookSender;

const LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Ingestion counters since the last periodic log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounters {
    /// Observations processed.
    pub pokemon_processed: u64,
    /// Observations inside at least one nest.
    pub pokemon_matched: u64,
    /// Nest matches, counting each nest an observation fell in.
    pub nests_matched: u64,
}

/// Owns the current [`NestProcessor`].
///
/// Readers take a short lock to clone the published `Arc`; reloads are
/// serialized by a separate async mutex so the slow part of a reload never
/// blocks ingestion.
#[derive(Debug)]
pub struct NestManager {
    loader: NestLoader,
    webhooks: Arc<dyn WebhookSender>,
    current: RwLock<Option<Arc<NestProcessor>>>,
    reload_lock: Mutex<()>,
    reloaded: Notify,
    pokemon_processed: AtomicU64,
    pokemon_matched: AtomicU64,
    nests_matched: AtomicU64,
}

impl NestManager {
    /// Creates a manager with nothing loaded.
    #[must_use]
    pub fn new(loader: NestLoader, webhooks: Arc<dyn WebhookSender>) -> Self {
        Self {
            loader,
            webhooks,
            current: RwLock::new(None),
            reload_lock: Mutex::new(()),
            reloaded: Notify::new(),
            pokemon_processed: AtomicU64::new(0),
            pokemon_matched: AtomicU64::new(0),
            nests_matched: AtomicU64::new(0),
        }
    }

    /// The loader used by reloads.
    #[must_use]
    pub const fn loader(&self) -> &NestLoader {
        &self.loader
    }

    /// The published processor, if a configuration was loaded.
    #[must_use]
    pub fn current(&self) -> Option<Arc<NestProcessor>> {
        self.current.read().as_ref().map(Arc::clone)
    }

    /// The published processor.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::Internal`] before the first load.
    pub fn processor(&self) -> Result<Arc<NestProcessor>, NestError> {
        self.current()
            .ok_or_else(|| NestError::Internal("no nest configuration loaded".to_string()))
    }

    /// Loads nests from the store and publishes a new processor built
    /// around the existing rolling stats (fresh ones on first load).
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] if nests cannot be read; the
    /// previous processor stays published.
    pub async fn load_config(
        &self,
        config: ProcessorConfig,
        filters: &FiltersConfig,
        now: DateTime<Utc>,
    ) -> Result<LoadReport, NestError> {
        let _reload = self.reload_lock.lock().await;

        let previous = self.current();
        let (matcher, report) = self
            .loader
            .load(filters, previous.as_ref().map(|p| p.matcher().as_ref()), now)
            .await?;
        let stats = previous.as_ref().map_or_else(
            || Arc::new(RollingStats::new(now)),
            |p| Arc::clone(p.stats()),
        );

        let processor = NestProcessor::new(
            Arc::new(matcher),
            stats,
            Arc::clone(self.loader.store()),
            Arc::clone(&self.webhooks),
            config,
        );
        log_configuration(processor.config(), processor.matcher().len());

        *self.current.write() = Some(Arc::new(processor));
        // Stores at most one permit, so back-to-back reloads coalesce.
        self.reloaded.notify_one();
        Ok(report)
    }

    /// Counts an observation into the published processor. Dropped with a
    /// debug log before the first load.
    pub fn process_observation(&self, observation: &Observation) {
        let Some(processor) = self.current() else {
            tracing::debug!("STATS: observation before first load, dropped");
            return;
        };
        let matched = processor.add_observation(observation);
        self.pokemon_processed.fetch_add(1, Ordering::Relaxed);
        if matched > 0 {
            self.pokemon_matched.fetch_add(1, Ordering::Relaxed);
            self.nests_matched
                .fetch_add(u64::try_from(matched).unwrap_or(u64::MAX), Ordering::Relaxed);
        }
    }

    /// Returns the counters and resets them to zero.
    pub fn take_counters(&self) -> IngestCounters {
        IngestCounters {
            pokemon_processed: self.pokemon_processed.swap(0, Ordering::Relaxed),
            pokemon_matched: self.pokemon_matched.swap(0, Ordering::Relaxed),
            nests_matched: self.nests_matched.swap(0, Ordering::Relaxed),
        }
    }

    /// Rotates on the configured interval and logs counters every minute
    /// until `cancel` fires.
    ///
    /// A reload that changes the interval restarts the rotation timer; if
    /// the current period is already older than the new interval it rotates
    /// right away.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::Internal`] if no configuration was loaded.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), NestError> {
        let processor = self.processor()?;
        let mut interval = rotation_interval(processor.config());
        let mut period_started = Instant::now();
        let mut next_rotation = period_started + interval;
        let mut log_timer = tokio::time::interval_at(Instant::now() + LOG_INTERVAL, LOG_INTERVAL);
        // The permit left by the initial load is not a reload.
        let _ = tokio::time::timeout(Duration::ZERO, self.reloaded.notified()).await;

        tracing::info!(
            interval_minutes = processor.config().rotation_interval_minutes,
            "STATS: rotation scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("STATS: rotation scheduler stopped");
                    return Ok(());
                }
                () = tokio::time::sleep_until(next_rotation) => {
                    if let Some(processor) = self.current() {
                        tracing::info!("STATS: rotating time period");
                        processor.rotate_and_decide(Utc::now()).await;
                    }
                    period_started = Instant::now();
                    next_rotation = period_started + interval;
                }
                () = self.reloaded.notified() => {
                    let Some(processor) = self.current() else {
                        continue;
                    };
                    let new_interval = rotation_interval(processor.config());
                    if new_interval != interval {
                        tracing::info!(
                            interval_minutes = processor.config().rotation_interval_minutes,
                            "STATS: rotation interval changed"
                        );
                        interval = new_interval;
                        // A deadline already in the past fires on the next pass.
                        next_rotation = period_started + interval;
                    }
                }
                _ = log_timer.tick() => self.log_counters(),
            }
        }
    }

    fn log_counters(&self) {
        let counters = self.take_counters();
        tracing::info!(
            pokemon_processed = counters.pokemon_processed,
            pokemon_matched = counters.pokemon_matched,
            nests_matched = counters.nests_matched,
            "STATS: processed {} pokemon, {} matched nests ({} pokemon in at least one nest)",
            counters.pokemon_processed,
            counters.nests_matched,
            counters.pokemon_matched
        );
    }
}

fn rotation_interval(config: &ProcessorConfig) -> Duration {
    config
        .rotation_interval()
        .to_std()
        .unwrap_or(Duration::from_secs(60))
        .max(Duration::from_secs(1))
}

fn log_configuration(config: &ProcessorConfig, nests: usize) {
    tracing::info!(
        nests,
        rotation_interval_minutes = config.rotation_interval_minutes,
        min_history_hours = config.min_history_duration_hours,
        max_history_hours = config.max_history_duration_hours,
        min_nest_observations = config.min_nest_observations,
        min_nest_pct = config.min_nest_pct,
        min_total_observations = config.min_total_observations,
        max_global_pct = config.max_global_pct,
        min_nest_to_global_ratio = config.min_nest_to_global_ratio,
        skip_period_min_global_pct = config.skip_period_min_global_pct,
        no_nesting_age_hours = config.no_nesting_age_hours,
        "NEST-LOAD[]: configuration loaded"
    );
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::domain::geometry::tests::square;
    use crate::domain::nest::tests::t0;
    use crate::domain::{NestId, SpeciesKey};
    use crate::persistence::memory::MemoryNestStore;
    use crate::persistence::models::tests::stored;
    use crate::persistence::{NestStore, PointStore};
    use crate::service::processor::tests::s1_config;
    use crate::service::webhook::NoopSender;

    fn manager(store: &Arc<MemoryNestStore>) -> NestManager {
        NestManager::new(
            NestLoader::new(Arc::clone(store) as Arc<dyn NestStore>, None::<Arc<dyn PointStore>>),
            Arc::new(NoopSender),
        )
    }

    async fn load(manager: &NestManager, now: DateTime<Utc>) -> LoadReport {
        let Ok(report) = manager
            .load_config(s1_config(), &FiltersConfig::default(), now)
            .await
        else {
            panic!("load succeeds");
        };
        report
    }

    fn observe(manager: &NestManager, species: u16, lat: f64, lon: f64) {
        manager.process_observation(&Observation::new(SpeciesKey::new(species, 0), lat, lon));
    }

    #[tokio::test]
    async fn observations_before_load_are_dropped() {
        let store = Arc::new(MemoryNestStore::default());
        let manager = manager(&store);
        observe(&manager, 7, 0.0, 0.0);
        assert_eq!(manager.take_counters(), IngestCounters::default());
        assert!(matches!(manager.processor(), Err(NestError::Internal(_))));
    }

    #[tokio::test]
    async fn counters_track_matches_and_reset() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        let manager = manager(&store);
        load(&manager, t0()).await;

        observe(&manager, 7, 0.0, 0.0);
        observe(&manager, 7, 9.0, 9.0);
        assert_eq!(
            manager.take_counters(),
            IngestCounters {
                pokemon_processed: 2,
                pokemon_matched: 1,
                nests_matched: 1
            }
        );
        assert_eq!(manager.take_counters(), IngestCounters::default());
    }

    #[tokio::test]
    async fn reload_keeps_rolling_stats() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        let manager = manager(&store);
        load(&manager, t0()).await;
        let Ok(first) = manager.processor() else {
            panic!("loaded");
        };
        observe(&manager, 7, 0.0, 0.0);
        first.stats().rotate(t0() + TimeDelta::minutes(30), TimeDelta::hours(12), 0.0);

        load(&manager, t0() + TimeDelta::minutes(30)).await;
        let Ok(second) = manager.processor() else {
            panic!("reloaded");
        };
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.stats(), second.stats()));
        let snapshot = second.stats().snapshot(t0() + TimeDelta::minutes(31));
        assert!(snapshot.duration >= TimeDelta::minutes(30));
        assert_eq!(snapshot.running.global().total(), 1);
    }

    #[tokio::test]
    async fn removed_nest_is_skipped_in_decisions() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        store.put(stored(2, &square(1.0, 0.0, 0.01)));
        let manager = manager(&store);
        load(&manager, t0()).await;
        for species in (1..=10_u16).cycle().take(20) {
            observe(&manager, species, 0.0, 0.0);
            observe(&manager, species, 1.0, 0.0);
        }

        let Some(mut row) = store.row(2) else {
            panic!("row exists");
        };
        row.active = Some(false);
        row.discarded = Some("overlap".to_string());
        store.put(row);
        load(&manager, t0() + TimeDelta::minutes(30)).await;

        let Ok(processor) = manager.processor() else {
            panic!("reloaded");
        };
        assert!(processor.matcher().by_id(NestId::new(2)).is_none());
        let report = processor.rotate_and_decide(t0() + TimeDelta::hours(1)).await;
        assert_eq!(report.evaluated, 1);
        assert!(store.updates_for(2).is_empty());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_processor() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        let manager = manager(&store);
        load(&manager, t0()).await;
        let Ok(before) = manager.processor() else {
            panic!("loaded");
        };
        store.set_failing(true);
        let result = manager
            .load_config(s1_config(), &FiltersConfig::default(), t0())
            .await;
        assert!(matches!(result, Err(NestError::StoreUnavailable(_))));
        let Ok(after) = manager.processor() else {
            panic!("still loaded");
        };
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn run_requires_loaded_config_and_stops_on_cancel() {
        let store = Arc::new(MemoryNestStore::default());
        let manager = Arc::new(manager(&store));
        let cancel = CancellationToken::new();
        assert!(matches!(manager.run(cancel.clone()).await, Err(NestError::Internal(_))));

        load(&manager, Utc::now()).await;
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            async move { manager.run(cancel).await }
        });
        cancel.cancel();
        let Ok(result) = task.await else {
            panic!("run task joins");
        };
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn run_rotates_on_schedule() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        let manager = Arc::new(manager(&store));
        load(&manager, Utc::now()).await;
        let Ok(processor) = manager.processor() else {
            panic!("loaded");
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            async move { manager.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        let Ok(Ok(())) = task.await else {
            panic!("run task ends cleanly");
        };
        // one-minute interval: two rotations in 150 s
        assert_eq!(processor.stats().len(), 3);
    }

    fn every(minutes: u64) -> ProcessorConfig {
        ProcessorConfig {
            rotation_interval_minutes: minutes,
            ..s1_config()
        }
    }

    async fn reload_every(manager: &NestManager, minutes: u64) {
        let Ok(_) = manager
            .load_config(every(minutes), &FiltersConfig::default(), Utc::now())
            .await
        else {
            panic!("reload succeeds");
        };
    }

    fn periods(manager: &NestManager) -> usize {
        let Ok(processor) = manager.processor() else {
            panic!("loaded");
        };
        processor.stats().len()
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn shorter_interval_rotates_overdue_period_at_once() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        let manager = Arc::new(manager(&store));
        reload_every(&manager, 10).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            async move { manager.run(cancel).await }
        });

        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(periods(&manager), 1);

        reload_every(&manager, 2).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(periods(&manager), 2, "overdue period rotates right away");

        tokio::time::sleep(MINUTE + Duration::from_secs(50)).await;
        assert_eq!(periods(&manager), 2);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(periods(&manager), 3, "next rotation follows the new interval");

        cancel.cancel();
        let Ok(Ok(())) = task.await else {
            panic!("run task ends cleanly");
        };
    }

    #[tokio::test(start_paused = true)]
    async fn same_interval_reload_keeps_the_deadline() {
        let store = Arc::new(MemoryNestStore::default());
        store.put(stored(1, &square(0.0, 0.0, 0.01)));
        let manager = Arc::new(manager(&store));
        reload_every(&manager, 10).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            async move { manager.run(cancel).await }
        });

        tokio::time::sleep(6 * MINUTE).await;
        reload_every(&manager, 10).await;
        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(periods(&manager), 2, "rotation still due ten minutes after start");

        cancel.cancel();
        let Ok(Ok(())) = task.await else {
            panic!("run task ends cleanly");
        };
    }
}
