//! Config endpoints: running config and reload.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{ConfigBody, ConfigResponse, ReloadQuery, ReloadResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, NestError};
use crate::service::RefreshMode;

/// `GET /api/config`: Running processor config and build version.
///
/// # Errors
///
/// Returns [`NestError::Internal`] before the first load.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "Config",
    summary = "Get running config",
    responses(
        (status = 200, description = "Running config", body = ConfigResponse),
        (status = 500, description = "Nothing loaded yet", body = ErrorResponse),
    )
)]
pub async fn get_config(State(state): State<AppState>) -> Result<Json<ConfigResponse>, NestError> {
    let processor = state.manager.processor()?;
    Ok(Json(ConfigResponse {
        config: ConfigBody {
            processor: processor.config().clone(),
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// `GET|PUT /api/config/reload`: Re-read the config file and reload nests.
///
/// # Errors
///
/// Returns the reload error; the running config is kept.
#[utoipa::path(
    put,
    path = "/api/config/reload",
    tag = "Config",
    summary = "Reload config",
    description = "Re-reads the config file and reloads nests from the store. `?refresh=1` re-runs the store filters first; `?spawnpoints=all` also re-queries every spawnpoint count.",
    params(ReloadQuery),
    responses(
        (status = 200, description = "Config reloaded", body = ReloadResponse),
        (status = 400, description = "Invalid config", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn reload(
    State(state): State<AppState>,
    Query(query): Query<ReloadQuery>,
) -> Result<Json<ReloadResponse>, NestError> {
    let mode = RefreshMode::from_query(query.spawnpoints.as_deref(), query.refresh.as_deref());
    tracing::info!(?mode, "reloading config");
    let outcome = state.reloader.reload(mode).await?;
    tracing::info!("config reloaded");
    Ok(Json(outcome.into()))
}

/// Config routes, mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config))
        .route("/config/reload", get(reload).put(reload))
}
