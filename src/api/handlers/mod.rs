//! REST endpoint handlers organized by resource.

pub mod config;
pub mod nests;
pub mod stats;
pub mod system;
pub mod webhook;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(config::routes())
        .merge(nests::routes())
        .merge(stats::routes())
}
