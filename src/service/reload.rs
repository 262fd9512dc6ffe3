//! Configuration reload shared by the HTTP endpoint and SIGHUP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::NestError;
use crate::service::loader::LoadReport;
use crate::service::manager::NestManager;
use crate::service::refresher::{NestRefresher, RefreshReport};

/// Store re-evaluation requested with a reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshMode {
    /// Reload only.
    #[default]
    None,
    /// Run the refresher first, querying unknown spawnpoint counts.
    Refresh,
    /// Run the refresher first, re-querying every spawnpoint count.
    AllSpawnpoints,
}

impl RefreshMode {
    /// Maps the `spawnpoints` and `refresh` query parameters.
    #[must_use]
    pub fn from_query(spawnpoints: Option<&str>, refresh: Option<&str>) -> Self {
        if spawnpoints == Some("all") {
            Self::AllSpawnpoints
        } else if refresh.is_some_and(|v| matches!(v, "1" | "true" | "yes")) {
            Self::Refresh
        } else {
            Self::None
        }
    }

    const fn force_spawnpoints(self) -> bool {
        matches!(self, Self::AllSpawnpoints)
    }
}

/// Result of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Counters of the load step.
    pub load: LoadReport,
    /// Counters of the refresh step, when one ran.
    pub refresh: Option<RefreshReport>,
}

impl ReloadOutcome {
    /// Nests loaded into the new processor.
    #[must_use]
    pub const fn nests(&self) -> usize {
        self.load.loaded
    }

    /// Nests disabled by overlap pruning, when a refresh ran.
    #[must_use]
    pub fn overlap_disabled(&self) -> Option<usize> {
        self.refresh.map(|r| r.overlap_disabled)
    }
}

/// Re-reads the config file and republishes the processor.
#[derive(Debug)]
pub struct Reloader {
    path: PathBuf,
    manager: Arc<NestManager>,
    refresher: NestRefresher,
    cancel: CancellationToken,
}

impl Reloader {
    /// Creates a reloader for the config at `path`. `cancel` aborts a
    /// running refresh on shutdown.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        manager: Arc<NestManager>,
        refresher: NestRefresher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            manager,
            refresher,
            cancel,
        }
    }

    /// The config file this reloader reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The manager reloads are published to.
    #[must_use]
    pub const fn manager(&self) -> &Arc<NestManager> {
        &self.manager
    }

    /// Reads the config file and reloads with it.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::ConfigInvalid`] if the file cannot be loaded,
    /// or any error of [`Self::reload_with`]. The running configuration is
    /// kept on error.
    pub async fn reload(&self, mode: RefreshMode) -> Result<ReloadOutcome, NestError> {
        let config = AppConfig::load(&self.path).inspect_err(|err| {
            tracing::error!(path = %self.path.display(), "failed to reload config: {err}");
        })?;
        self.reload_with(&config, mode).await
    }

    /// Optionally refreshes the store, then loads nests with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] or [`NestError::Cancelled`]
    /// from the refresh or the load.
    pub async fn reload_with(
        &self,
        config: &AppConfig,
        mode: RefreshMode,
    ) -> Result<ReloadOutcome, NestError> {
        let refresh = if mode == RefreshMode::None {
            None
        } else {
            tracing::info!(?mode, "refreshing nests before reload");
            Some(
                self.refresher
                    .refresh_all(&config.filters, mode.force_spawnpoints(), &self.cancel, Utc::now())
                    .await?,
            )
        };

        let load = self
            .manager
            .load_config(config.processor.clone(), &config.filters, Utc::now())
            .await?;
        tracing::info!(
            nests = load.loaded,
            rows = load.rows,
            "reloaded config from {}",
            self.path.display()
        );
        Ok(ReloadOutcome { load, refresh })
    }
}
