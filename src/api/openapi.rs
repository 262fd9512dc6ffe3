//! OpenAPI document for the HTTP surface, generated with utoipa.

use utoipa::OpenApi;

use crate::api::dto::{
    AllStatsResponse, ConfigBody, ConfigResponse, GlobalEntryDto, NestDto, NestListResponse,
    NestResponse, NestStatsResponse, PurgeNewestRequest, PurgeRequest, PurgeResponse,
    ReloadResponse, StatsEntryDto, WebhookEnvelope,
};
use crate::api::handlers::system::HealthResponse;
use crate::domain::{DiscardReason, NestingSpecies};
use crate::error::{ErrorBody, ErrorResponse};

/// OpenAPI documentation for the nestling REST API.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "nestling REST API",
        description = "Nest detection from spawn webhooks: loaded nests, rolling species stats, config reload and purges."
    ),
    paths(
        crate::api::handlers::system::health_handler,
        crate::api::handlers::webhook::receive_webhook,
        crate::api::handlers::config::get_config,
        crate::api::handlers::config::reload,
        crate::api::handlers::nests::list_nests,
        crate::api::handlers::nests::get_nest,
        crate::api::handlers::nests::nest_stats,
        crate::api::handlers::nests::all_stats,
        crate::api::handlers::stats::purge_all,
        crate::api::handlers::stats::purge_keep,
        crate::api::handlers::stats::purge_oldest,
        crate::api::handlers::stats::purge_newest,
    ),
    components(
        schemas(
            HealthResponse,
            WebhookEnvelope,
            ConfigBody,
            ConfigResponse,
            ReloadResponse,
            NestDto,
            NestListResponse,
            NestResponse,
            NestingSpecies,
            DiscardReason,
            StatsEntryDto,
            GlobalEntryDto,
            NestStatsResponse,
            AllStatsResponse,
            PurgeRequest,
            PurgeNewestRequest,
            PurgeResponse,
            ErrorResponse,
            ErrorBody,
        )
    ),
    tags(
        (name = "System", description = "Health"),
        (name = "Ingest", description = "Spawn webhooks"),
        (name = "Config", description = "Running config and reload"),
        (name = "Nests", description = "Loaded nests"),
        (name = "Stats", description = "Rolling species stats and purges"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/webhook",
            "/api/config",
            "/api/config/reload",
            "/api/nests",
            "/api/nests/{id}",
            "/api/nests/{id}/stats",
            "/api/nests/_/stats",
            "/api/stats/purge/all",
            "/api/stats/purge/keep",
            "/api/stats/purge/oldest",
            "/api/stats/purge/newest",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }
}
