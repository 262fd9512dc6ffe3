//! Stats purge endpoints.

use axum::extract::State;
use axum::routing::put;
use axum::{Json, Router};
use chrono::{TimeDelta, Utc};

use crate::api::dto::{PurgeNewestRequest, PurgeRequest, PurgeResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, NestError};

fn purge_duration(minutes: i64) -> Result<TimeDelta, NestError> {
    if minutes <= 0 {
        return Err(NestError::InvalidRequest(
            "duration_minutes should be > 0".to_string(),
        ));
    }
    TimeDelta::try_minutes(minutes).ok_or_else(|| {
        NestError::InvalidRequest(format!("duration_minutes {minutes} is too large"))
    })
}

/// `PUT /api/stats/purge/all`: Drop every finished period.
///
/// # Errors
///
/// Returns [`NestError::Internal`] before the first load.
#[utoipa::path(
    put,
    path = "/api/stats/purge/all",
    tag = "Stats",
    summary = "Purge all stats",
    responses(
        (status = 200, description = "Periods removed", body = PurgeResponse),
    )
)]
pub async fn purge_all(State(state): State<AppState>) -> Result<Json<PurgeResponse>, NestError> {
    let result = state.manager.processor()?.stats().keep_recent(TimeDelta::zero());
    tracing::info!(periods = result.periods, "STATS: purged all stats");
    Ok(Json(result.into()))
}

/// `PUT /api/stats/purge/keep`: Keep only the most recent stats.
///
/// # Errors
///
/// Returns [`NestError::InvalidRequest`] unless `duration_minutes` is
/// positive.
#[utoipa::path(
    put,
    path = "/api/stats/purge/keep",
    tag = "Stats",
    summary = "Keep recent stats",
    request_body = PurgeRequest,
    responses(
        (status = 200, description = "Periods removed", body = PurgeResponse),
        (status = 400, description = "Invalid duration", body = ErrorResponse),
    )
)]
pub async fn purge_keep(
    State(state): State<AppState>,
    Json(request): Json<PurgeRequest>,
) -> Result<Json<PurgeResponse>, NestError> {
    let keep = purge_duration(request.duration_minutes)?;
    let result = state.manager.processor()?.stats().keep_recent(keep);
    tracing::info!(
        periods = result.periods,
        duration_minutes = request.duration_minutes,
        "STATS: purged stats older than the kept window"
    );
    Ok(Json(result.into()))
}

/// `PUT /api/stats/purge/oldest`: Drop the oldest periods.
///
/// # Errors
///
/// Returns [`NestError::InvalidRequest`] unless `duration_minutes` is
/// positive.
#[utoipa::path(
    put,
    path = "/api/stats/purge/oldest",
    tag = "Stats",
    summary = "Purge oldest stats",
    request_body = PurgeRequest,
    responses(
        (status = 200, description = "Periods removed", body = PurgeResponse),
        (status = 400, description = "Invalid duration", body = ErrorResponse),
    )
)]
pub async fn purge_oldest(
    State(state): State<AppState>,
    Json(request): Json<PurgeRequest>,
) -> Result<Json<PurgeResponse>, NestError> {
    let dur = purge_duration(request.duration_minutes)?;
    let result = state.manager.processor()?.stats().purge_oldest(dur);
    tracing::info!(
        periods = result.periods,
        duration_minutes = request.duration_minutes,
        "STATS: purged oldest stats"
    );
    Ok(Json(result.into()))
}

/// `PUT /api/stats/purge/newest`: Drop the newest periods.
///
/// # Errors
///
/// Returns [`NestError::InvalidRequest`] unless `duration_minutes` is
/// positive.
#[utoipa::path(
    put,
    path = "/api/stats/purge/newest",
    tag = "Stats",
    summary = "Purge newest stats",
    request_body = PurgeNewestRequest,
    responses(
        (status = 200, description = "Periods removed", body = PurgeResponse),
        (status = 400, description = "Invalid duration", body = ErrorResponse),
    )
)]
pub async fn purge_newest(
    State(state): State<AppState>,
    Json(request): Json<PurgeNewestRequest>,
) -> Result<Json<PurgeResponse>, NestError> {
    let dur = purge_duration(request.duration_minutes)?;
    let result = state
        .manager
        .processor()?
        .stats()
        .purge_newest(Utc::now(), dur, request.include_current);
    tracing::info!(
        periods = result.periods,
        duration_minutes = request.duration_minutes,
        include_current = request.include_current,
        "STATS: purged newest stats"
    );
    Ok(Json(result.into()))
}

/// Purge routes, mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats/purge/all", put(purge_all))
        .route("/stats/purge/keep", put(purge_keep))
        .route("/stats/purge/oldest", put(purge_oldest))
        .route("/stats/purge/newest", put(purge_newest))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::tests::{loaded_state, send};

    #[tokio::test]
    async fn purge_all_needs_no_body() {
        let (state, _) = loaded_state().await;
        let (status, body) = send(state, "PUT", "/api/stats/purge/all", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"time_periods": 0, "duration_minutes": 0}));
    }

    #[tokio::test]
    async fn durations_must_be_positive() {
        let (state, _) = loaded_state().await;
        for path in ["/api/stats/purge/keep", "/api/stats/purge/oldest", "/api/stats/purge/newest"] {
            let body = Some(json!({"duration_minutes": 0}).to_string());
            let (status, body) = send(state.clone(), "PUT", path, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
            assert_eq!(body.pointer("/error/code"), Some(&json!(1001)));
        }
    }

    #[tokio::test]
    async fn purge_newest_with_current_period() {
        let (state, _) = loaded_state().await;
        let body = Some(json!({"duration_minutes": 60, "include_current": true}).to_string());
        let (status, body) = send(state, "PUT", "/api/stats/purge/newest", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.pointer("/time_periods"), Some(&json!(1)));
    }
}
