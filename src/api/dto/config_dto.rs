//! Config and reload payloads.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::config::ProcessorConfig;
use crate::service::ReloadOutcome;

/// Running configuration sections.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigBody {
    /// `[processor]` of the published processor.
    #[schema(value_type = Object)]
    pub processor: ProcessorConfig,
}

/// `GET /api/config`
#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigResponse {
    /// Running configuration.
    pub config: ConfigBody,
    /// Build version.
    pub version: String,
}

/// Query of `GET|PUT /api/config/reload`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReloadQuery {
    /// `all` re-queries every spawnpoint count before reloading.
    pub spawnpoints: Option<String>,
    /// `1` refreshes the store before reloading.
    pub refresh: Option<String>,
}

/// Result of a reload.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    /// Always `ok`.
    pub status: String,
    /// Nests loaded.
    pub nests: usize,
    /// Nests disabled by overlap pruning, when a refresh ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_disabled: Option<usize>,
}

impl From<ReloadOutcome> for ReloadResponse {
    fn from(outcome: ReloadOutcome) -> Self {
        Self {
            status: "ok".to_string(),
            nests: outcome.nests(),
            overlap_disabled: outcome.overlap_disabled(),
        }
    }
}
