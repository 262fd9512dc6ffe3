//! Inbound spawn webhooks.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;

use crate::api::dto::{PokemonMessage, Skipped, WebhookEnvelope};
use crate::app_state::AppState;
use crate::service::NestManager;

/// `POST /webhook`: Accept a batch of webhook envelopes.
///
/// Always answers 200 so senders never retry. Processing happens after the
/// response on a spawned task.
#[utoipa::path(
    post,
    path = "/webhook",
    tag = "Ingest",
    summary = "Receive spawn webhooks",
    description = "Accepts a JSON array of `{type, message}` envelopes. Only encountered `pokemon` messages are counted; everything else is dropped.",
    request_body = Vec<WebhookEnvelope>,
    responses(
        (status = 200, description = "Batch accepted"),
    )
)]
pub async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let envelopes: Vec<WebhookEnvelope> = match serde_json::from_slice(&body) {
        Ok(envelopes) => envelopes,
        Err(err) => {
            tracing::warn!("received unprocessable webhook: {err}");
            return StatusCode::OK;
        }
    };

    let manager = Arc::clone(&state.manager);
    tokio::spawn(async move {
        process_envelopes(&manager, envelopes);
    });
    StatusCode::OK
}

/// Feeds every usable pokemon message to `manager`. Returns the number of
/// observations processed.
pub fn process_envelopes(manager: &NestManager, envelopes: Vec<WebhookEnvelope>) -> usize {
    let started = Instant::now();
    let mut processed = 0;

    for envelope in envelopes {
        if envelope.kind != "pokemon" {
            tracing::debug!(kind = %envelope.kind, "ignoring webhook: only pokemon are processed");
            continue;
        }
        let message: PokemonMessage = match serde_json::from_value(envelope.message) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("ignoring malformed pokemon webhook: {err}");
                continue;
            }
        };
        match message.to_observation() {
            Ok(observation) => {
                manager.process_observation(&observation);
                processed += 1;
            }
            Err(Skipped::NotEncountered) => {}
            Err(Skipped::Invalid(reason)) => {
                tracing::warn!("ignoring pokemon webhook: {reason}");
            }
        }
    }

    tracing::debug!(
        "processed {processed} pokemon from single webhook in {:?}",
        started.elapsed()
    );
    processed
}

/// Webhook routes, mounted at the root.
pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", post(receive_webhook))
}
