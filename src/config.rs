//! Service configuration loaded from a TOML file.
//!
//! Every section has defaults except `[nests_db]`. A handful of deployment
//! settings can be overridden from the environment (or a `.env` file via
//! `dotenvy`):
//!
//! - `NESTLING_HTTP_ADDR` -> `http.addr`
//! - `NESTLING_NESTS_DB_URL` -> `nests_db.url`
//! - `NESTLING_GOLBAT_DB_URL` -> `golbat_db.url`

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::DecisionThresholds;
use crate::error::NestError;

/// Config file used when `-f` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "configs/nestling.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener.
    #[serde(default)]
    pub http: HttpConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Nest store (PostgreSQL).
    pub nests_db: DbConfig,
    /// Spawnpoint store (MySQL), optional.
    #[serde(default)]
    pub golbat_db: Option<GolbatDbConfig>,
    /// Decision engine and rotation.
    #[serde(default)]
    pub processor: ProcessorConfig,
    /// Load-time nest filters.
    #[serde(default)]
    pub filters: FiltersConfig,
    /// Webhook flushing.
    #[serde(default)]
    pub webhook_settings: WebhookSettings,
    /// Webhook destinations.
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    /// Importer defaults.
    #[serde(default)]
    pub importer: ImporterConfig,
}

impl AppConfig {
    /// Reads, parses and validates the config at `path`, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::ConfigInvalid`] if the file cannot be read, is
    /// not valid TOML, or fails validation.
    pub fn load(path: &Path) -> Result<Self, NestError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NestError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::ConfigInvalid`] on malformed TOML or unknown
    /// value types.
    pub fn from_toml_str(text: &str) -> Result<Self, NestError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies overrides looked up through `lookup`, usually the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::ConfigInvalid`] if `NESTLING_HTTP_ADDR` is set
    /// but is not a socket address.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), NestError> {
        if let Some(addr) = parse_override::<SocketAddr>(&lookup, "NESTLING_HTTP_ADDR")? {
            self.http.addr = addr;
        }
        if let Some(url) = non_empty(&lookup, "NESTLING_NESTS_DB_URL") {
            self.nests_db.url = Some(url);
        }
        if let Some(url) = non_empty(&lookup, "NESTLING_GOLBAT_DB_URL") {
            self.golbat_db.get_or_insert_with(GolbatDbConfig::default).db.url = Some(url);
        }
        Ok(())
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::ConfigInvalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), NestError> {
        self.nests_db.validate("nests_db")?;
        if let Some(golbat) = &self.golbat_db {
            golbat.validate()?;
        }
        self.processor.validate()?;
        self.filters.validate()?;
        self.webhook_settings.validate()?;
        for (idx, webhook) in self.webhooks.iter().enumerate() {
            webhook.validate(idx)?;
        }
        Ok(())
    }
}

/// `[http]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address.
    pub addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9042)),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Connection settings for a relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Full connection URL; replaces the individual fields when set.
    pub url: Option<String>,
    /// Host name.
    pub host: String,
    /// Port; the driver default when absent.
    pub port: Option<u16>,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database name.
    pub db: String,
    /// Maximum pooled connections.
    pub max_pool: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: None,
            user: String::new(),
            password: String::new(),
            db: String::new(),
            max_pool: 10,
        }
    }
}

impl DbConfig {
    fn validate(&self, section: &str) -> Result<(), NestError> {
        if self.url.is_none() && self.db.is_empty() {
            return Err(NestError::ConfigInvalid(format!(
                "{section}.db is required when {section}.url is not set"
            )));
        }
        if self.max_pool == 0 {
            return Err(NestError::ConfigInvalid(format!(
                "{section}.max_pool must be at least 1"
            )));
        }
        Ok(())
    }
}

/// `[golbat_db]`: the spawnpoint store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GolbatDbConfig {
    /// Connection settings.
    #[serde(flatten)]
    pub db: DbConfig,
    /// Ignore spawnpoints not seen for this many days.
    #[serde(default = "default_spawnpoint_max_age_days")]
    pub spawnpoint_max_age_days: u32,
}

impl Default for GolbatDbConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            spawnpoint_max_age_days: default_spawnpoint_max_age_days(),
        }
    }
}

const fn default_spawnpoint_max_age_days() -> u32 {
    7
}

impl GolbatDbConfig {
    fn validate(&self) -> Result<(), NestError> {
        self.db.validate("golbat_db")?;
        if self.spawnpoint_max_age_days == 0 {
            return Err(NestError::ConfigInvalid(
                "golbat_db.spawnpoint_max_age_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[processor]`: rotation and decision thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Log the top global species of every closed period.
    pub log_last_stats_period: bool,
    /// Period length.
    pub rotation_interval_minutes: u64,
    /// Stats needed before any decision.
    pub min_history_duration_hours: u64,
    /// Stats kept.
    pub max_history_duration_hours: u64,
    /// Minimum observations of the candidate inside the nest.
    pub min_nest_observations: u64,
    /// Minimum candidate share of the nest, percent.
    pub min_nest_pct: f64,
    /// Minimum observations inside the nest.
    pub min_total_observations: u64,
    /// Maximum candidate global share, percent; 0 disables.
    pub max_global_pct: f64,
    /// Minimum ratio of nest share to global share.
    pub min_nest_to_global_ratio: f64,
    /// Skip a period whose top species exceeds this global share; 0
    /// disables.
    pub skip_period_min_global_pct: f64,
    /// How long a lost nesting species stays stored.
    pub no_nesting_age_hours: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            log_last_stats_period: false,
            rotation_interval_minutes: 15,
            min_history_duration_hours: 1,
            max_history_duration_hours: 12,
            min_nest_observations: 4,
            min_nest_pct: 12.0,
            min_total_observations: 12,
            max_global_pct: 15.0,
            min_nest_to_global_ratio: 8.0,
            skip_period_min_global_pct: 40.0,
            no_nesting_age_hours: 12,
        }
    }
}

impl ProcessorConfig {
    /// Validates ranges.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::ConfigInvalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), NestError> {
        let invalid = |msg: &str| Err(NestError::ConfigInvalid(format!("processor.{msg}")));

        if self.rotation_interval_minutes < 1 {
            return invalid("rotation_interval_minutes must be at least 1");
        }
        if !(1..=12).contains(&self.min_history_duration_hours) {
            return invalid("min_history_duration_hours must be within 1..=12");
        }
        if !(1..=168).contains(&self.max_history_duration_hours) {
            return invalid("max_history_duration_hours must be within 1..=168");
        }
        if self.min_history_duration_hours > self.max_history_duration_hours {
            return invalid("min_history_duration_hours must not exceed max_history_duration_hours");
        }
        if !(0.0..=100.0).contains(&self.min_nest_pct) {
            return invalid("min_nest_pct must be within 0..=100");
        }
        if !(0.0..=100.0).contains(&self.max_global_pct)
            || (self.max_global_pct > 0.0 && self.max_global_pct < 1.0)
        {
            return invalid("max_global_pct must be 0 or within 1..=100");
        }
        if !(0.0..=100.0).contains(&self.skip_period_min_global_pct)
            || (self.skip_period_min_global_pct > 0.0 && self.skip_period_min_global_pct < 3.0)
        {
            return invalid("skip_period_min_global_pct must be 0 or within 3..=100");
        }
        if self.min_nest_to_global_ratio.is_nan() || self.min_nest_to_global_ratio < 0.0 {
            return invalid("min_nest_to_global_ratio must not be negative");
        }
        Ok(())
    }

    /// Period length.
    #[must_use]
    pub fn rotation_interval(&self) -> TimeDelta {
        TimeDelta::try_minutes(saturating_i64(self.rotation_interval_minutes)).unwrap_or(TimeDelta::MAX)
    }

    /// Stats needed before any decision.
    #[must_use]
    pub fn min_history(&self) -> TimeDelta {
        TimeDelta::try_hours(saturating_i64(self.min_history_duration_hours)).unwrap_or(TimeDelta::MAX)
    }

    /// Stats kept.
    #[must_use]
    pub fn max_history(&self) -> TimeDelta {
        TimeDelta::try_hours(saturating_i64(self.max_history_duration_hours)).unwrap_or(TimeDelta::MAX)
    }

    /// How long a lost nesting species stays stored.
    #[must_use]
    pub fn no_nesting_age(&self) -> TimeDelta {
        TimeDelta::try_hours(saturating_i64(self.no_nesting_age_hours)).unwrap_or(TimeDelta::MAX)
    }

    /// Thresholds for [`crate::domain::decide`].
    #[must_use]
    pub fn thresholds(&self) -> DecisionThresholds {
        DecisionThresholds {
            min_nest_pct: self.min_nest_pct,
            min_nest_to_global_ratio: self.min_nest_to_global_ratio,
            max_global_pct: self.max_global_pct,
            min_total_observations: self.min_total_observations,
            min_nest_observations: self.min_nest_observations,
            min_history: self.min_history(),
        }
    }
}

/// `[filters]`: which stored nests are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    /// Workers used by the refresher.
    pub concurrency: usize,
    /// Minimum spawnpoints inside a nest.
    #[serde(alias = "min_spawnpoints")]
    pub min_points: i64,
    /// Minimum area in m².
    pub min_area_m2: f64,
    /// Maximum area in m²; 0 disables.
    pub max_area_m2: f64,
    /// Maximum share of a nest's area covered by a larger nest, percent;
    /// 100 or more disables overlap pruning.
    #[serde(alias = "max_overlap_percent")]
    pub max_overlap_pct: f64,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            min_points: 10,
            min_area_m2: 100.0,
            max_area_m2: 10_000_000.0,
            max_overlap_pct: 60.0,
        }
    }
}

impl FiltersConfig {
    fn validate(&self) -> Result<(), NestError> {
        let invalid = |msg: &str| Err(NestError::ConfigInvalid(format!("filters.{msg}")));

        if self.concurrency < 1 {
            return invalid("concurrency must be at least 1");
        }
        if self.min_points < 0 {
            return invalid("min_points must not be negative");
        }
        if self.min_area_m2.is_nan() || self.min_area_m2 < 0.0 {
            return invalid("min_area_m2 must not be negative");
        }
        if self.max_area_m2.is_nan()
            || self.max_area_m2 < 0.0
            || (self.max_area_m2 > 0.0 && self.max_area_m2 < self.min_area_m2)
        {
            return invalid("max_area_m2 must be 0 or at least min_area_m2");
        }
        if self.max_overlap_pct.is_nan() || self.max_overlap_pct < 0.0 {
            return invalid("max_overlap_pct must not be negative");
        }
        Ok(())
    }

    /// Whether `area_m2` is within `[min_area_m2, max_area_m2]`.
    #[must_use]
    pub fn area_in_bounds(&self, area_m2: f64) -> bool {
        area_m2 >= self.min_area_m2 && (self.max_area_m2 <= 0.0 || area_m2 <= self.max_area_m2)
    }

    /// Whether overlap pruning runs.
    #[must_use]
    pub fn overlap_enabled(&self) -> bool {
        (0.0..100.0).contains(&self.max_overlap_pct)
    }
}

/// `[webhook_settings]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Seconds between flushes.
    pub flush_interval_seconds: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            flush_interval_seconds: 1,
        }
    }
}

impl WebhookSettings {
    fn validate(&self) -> Result<(), NestError> {
        if self.flush_interval_seconds < 1 {
            return Err(NestError::ConfigInvalid(
                "webhook_settings.flush_interval_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One `[[webhooks]]` destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL.
    pub url: String,
    /// Extra headers as `"Name: Value"`.
    #[serde(default)]
    pub headers: Vec<String>,
    /// Area patterns; empty means every area.
    #[serde(default)]
    pub areas: Vec<String>,
}

impl WebhookConfig {
    fn validate(&self, idx: usize) -> Result<(), NestError> {
        if self.url.trim().is_empty() {
            return Err(NestError::ConfigInvalid(format!("webhooks[{idx}].url is empty")));
        }
        if let Some(bad) = self.headers.iter().find(|h| !h.contains(':')) {
            return Err(NestError::ConfigInvalid(format!(
                "webhooks[{idx}].headers: '{bad}' is not 'Name: Value'"
            )));
        }
        Ok(())
    }
}

/// `[importer]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Name for features without one; unnamed features are skipped when
    /// unset.
    pub default_name: Option<String>,
    /// Append ` at lat,lon` to the default name.
    pub default_name_location: bool,
    /// Keep features whose label point lies inside another feature.
    pub allow_contained: bool,
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Parses an override as `T`. Missing or empty values are `None`; values
/// that do not parse are an error.
fn parse_override<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, NestError> {
    non_empty(lookup, key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| NestError::ConfigInvalid(format!("{key}: cannot parse '{v}'")))
        })
        .transpose()
}
