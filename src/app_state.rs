//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::{NestManager, Reloader};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Owner of the published processor.
    pub manager: Arc<NestManager>,
    /// Config reload, shared with the SIGHUP handler.
    pub reloader: Arc<Reloader>,
}

impl AppState {
    /// Builds state around `reloader` and its manager.
    #[must_use]
    pub fn new(reloader: Arc<Reloader>) -> Self {
        Self {
            manager: Arc::clone(reloader.manager()),
            reloader,
        }
    }
}
