//! Nest endpoints: loaded nests and their rolling stats.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{
    AllStatsResponse, GlobalEntryDto, NestDto, NestListResponse, NestResponse, NestStatsResponse,
    StatsEntryDto,
};
use crate::app_state::AppState;
use crate::domain::{NestId, NestSummary};
use crate::error::{ErrorResponse, NestError};

/// `GET /api/nests`: Loaded nests without geometry.
///
/// # Errors
///
/// Returns [`NestError::Internal`] before the first load.
#[utoipa::path(
    get,
    path = "/api/nests",
    tag = "Nests",
    summary = "List loaded nests",
    responses(
        (status = 200, description = "Nests ordered by id", body = NestListResponse),
    )
)]
pub async fn list_nests(State(state): State<AppState>) -> Result<Json<NestListResponse>, NestError> {
    let processor = state.manager.processor()?;
    let nests = processor.matcher().all();
    Ok(Json(NestListResponse {
        nests: nests.iter().map(|nest| NestDto::from_nest(nest, false)).collect(),
    }))
}

/// `GET /api/nests/{id}`: One loaded nest with geometry.
///
/// # Errors
///
/// Returns [`NestError::NestNotFound`] if the nest is not loaded.
#[utoipa::path(
    get,
    path = "/api/nests/{id}",
    tag = "Nests",
    summary = "Get a nest",
    params(
        ("id" = i64, Path, description = "Nest id"),
    ),
    responses(
        (status = 200, description = "Nest details", body = NestResponse),
        (status = 404, description = "Nest not loaded", body = ErrorResponse),
    )
)]
pub async fn get_nest(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NestResponse>, NestError> {
    let id = NestId::new(id);
    let nest = state
        .manager
        .processor()?
        .matcher()
        .by_id(id)
        .ok_or(NestError::NestNotFound(id))?;
    Ok(Json(NestResponse {
        nest: NestDto::from_nest(&nest, true),
    }))
}

/// `GET /api/nests/{id}/stats`: Rolling stats of one nest.
///
/// # Errors
///
/// Returns [`NestError::NestNotFound`] if the nest is not loaded.
#[utoipa::path(
    get,
    path = "/api/nests/{id}/stats",
    tag = "Stats",
    summary = "Get nest stats",
    params(
        ("id" = i64, Path, description = "Nest id"),
    ),
    responses(
        (status = 200, description = "Species ranked inside the nest", body = NestStatsResponse),
        (status = 404, description = "Nest not loaded", body = ErrorResponse),
    )
)]
pub async fn nest_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NestStatsResponse>, NestError> {
    let id = NestId::new(id);
    let processor = state.manager.processor()?;
    if processor.matcher().by_id(id).is_none() {
        return Err(NestError::NestNotFound(id));
    }

    let snapshot = processor.stats().snapshot(Utc::now());
    let running = &snapshot.running;
    let summary = running
        .summary_for(id, snapshot.duration)
        .unwrap_or_else(|| NestSummary {
            nest_id: id,
            start_time: running.start_time(),
            end_time: running.end_time(),
            duration: snapshot.duration,
            entries: Vec::new(),
        });
    Ok(Json(NestStatsResponse::from(&summary)))
}

/// `GET /api/nests/_/stats`: Rolling stats of every nest.
///
/// # Errors
///
/// Returns [`NestError::Internal`] before the first load.
#[utoipa::path(
    get,
    path = "/api/nests/_/stats",
    tag = "Stats",
    summary = "Get stats of all nests",
    responses(
        (status = 200, description = "Global and per-nest species", body = AllStatsResponse),
    )
)]
pub async fn all_stats(State(state): State<AppState>) -> Result<Json<AllStatsResponse>, NestError> {
    let processor = state.manager.processor()?;
    let snapshot = processor.stats().snapshot(Utc::now());
    let running = &snapshot.running;

    let nests: BTreeMap<i64, Vec<StatsEntryDto>> = running
        .nest_ids()
        .into_iter()
        .filter_map(|id| running.summary_for(id, snapshot.duration))
        .map(|summary| {
            (
                summary.nest_id.get(),
                summary.entries.iter().map(StatsEntryDto::from).collect(),
            )
        })
        .collect();

    Ok(Json(AllStatsResponse {
        duration_minutes: snapshot.duration.num_minutes(),
        start_time: running.start_time(),
        end_time: running.end_time(),
        global: running.ordered_global().iter().map(GlobalEntryDto::from).collect(),
        nests,
    }))
}

/// Nest routes, mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/nests", get(list_nests))
        .route("/nests/_/stats", get(all_stats))
        .route("/nests/{id}", get(get_nest))
        .route("/nests/{id}/stats", get(nest_stats))
}
