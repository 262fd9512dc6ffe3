//! Outbound nest webhooks.
//!
//! Messages are queued from the decision pass and posted by a flusher
//! task; the ingestion path never waits on HTTP.

use std::fmt::Debug;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{WebhookConfig, WebhookSettings};
use crate::domain::{AreaName, Nest, NestingSpecies};
use crate::error::NestError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The `message` of a `nest` webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestWebhook {
    /// Nest id.
    pub nest_id: i64,
    /// Nest name.
    pub name: String,
    /// Label point latitude.
    pub lat: f64,
    /// Label point longitude.
    pub lon: f64,
    /// Nesting species id.
    pub pokemon_id: u16,
    /// Nesting form id.
    pub form: u16,
    /// Always 0.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Species count over the stats window.
    pub pokemon_count: u64,
    /// Species count per hour.
    pub pokemon_avg: f64,
    /// Species share of the nest, percent.
    pub pokemon_ratio: f64,
    /// JSON `[[[lat, lon], ...], ...]`.
    pub poly_path: String,
    /// Detection time, Unix seconds.
    pub reset_time: i64,
}

impl NestWebhook {
    /// Builds the message for `nest` now nesting `nesting`.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::Internal`] if the polygon path cannot be
    /// encoded.
    pub fn new(nest: &Nest, nesting: &NestingSpecies) -> Result<Self, NestError> {
        let poly_path = serde_json::to_string(&nest.geometry.poly_path())
            .map_err(|e| NestError::Internal(format!("poly_path: {e}")))?;
        Ok(Self {
            nest_id: nest.id.get(),
            name: nest.name.clone(),
            lat: nest.lat(),
            lon: nest.lon(),
            pokemon_id: nesting.key.species_id,
            form: nesting.key.form_id,
            kind: 0,
            pokemon_count: nesting.nest_count,
            pokemon_avg: nesting.nest_hourly_count,
            pokemon_ratio: nesting.nest_pct(),
            poly_path,
            reset_time: nesting.detected_at.timestamp(),
        })
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a NestWebhook,
}

/// Accepts nest webhooks for delivery.
pub trait WebhookSender: Send + Sync + Debug {
    /// Queues a webhook announcing `nesting` for `nest`. Never blocks on
    /// delivery.
    fn add_nest_webhook(&self, nest: &Nest, nesting: &NestingSpecies);
}

/// Drops every webhook. Used when no destination is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSender;

impl WebhookSender for NoopSender {
    fn add_nest_webhook(&self, nest: &Nest, nesting: &NestingSpecies) {
        tracing::debug!(nest_id = %nest.id, species = %nesting.key, "WEBHOOK: no destinations, dropped");
    }
}

#[derive(Debug)]
struct Destination {
    url: String,
    headers: HeaderMap,
    areas: Vec<AreaName>,
}

impl Destination {
    fn from_config(config: &WebhookConfig) -> Result<Self, NestError> {
        let mut headers = HeaderMap::new();
        for header in &config.headers {
            let Some((name, value)) = header.split_once(':') else {
                return Err(NestError::ConfigInvalid(format!(
                    "webhook header '{header}' must be 'Name: Value'"
                )));
            };
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| NestError::ConfigInvalid(format!("webhook header '{header}': {e}")))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| NestError::ConfigInvalid(format!("webhook header '{header}': {e}")))?;
            headers.insert(name, value);
        }
        Ok(Self {
            url: config.url.clone(),
            headers,
            areas: config.areas.iter().map(|a| AreaName::parse(a)).collect(),
        })
    }

    fn wants(&self, area: &AreaName) -> bool {
        self.areas.is_empty() || area.matches_any(&self.areas)
    }
}

#[derive(Debug, Clone)]
struct QueuedWebhook {
    area: AreaName,
    message: NestWebhook,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Messages taken off the queue.
    pub messages: usize,
    /// Successful POSTs.
    pub delivered: usize,
    /// Failed or non-2xx POSTs.
    pub failed: usize,
}

/// Posts queued webhooks in the Poracle format to every destination whose
/// areas match the nest.
#[derive(Debug)]
pub struct PoracleSender {
    client: reqwest::Client,
    destinations: Vec<Destination>,
    flush_interval: Duration,
    queue: Mutex<Vec<QueuedWebhook>>,
}

impl PoracleSender {
    /// Builds a sender for `webhooks`.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::ConfigInvalid`] for a malformed header, or
    /// [`NestError::Internal`] if the HTTP client cannot be built.
    pub fn new(settings: &WebhookSettings, webhooks: &[WebhookConfig]) -> Result<Self, NestError> {
        let destinations = webhooks
            .iter()
            .map(Destination::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NestError::Internal(format!("webhook client: {e}")))?;
        Ok(Self {
            client,
            destinations,
            flush_interval: Duration::from_secs(settings.flush_interval_seconds.max(1)),
            queue: Mutex::new(Vec::new()),
        })
    }

    /// Number of queued messages.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Posts everything queued. Failures are logged, not retried.
    pub async fn flush(&self) -> FlushReport {
        let queued = std::mem::take(&mut *self.queue.lock());
        let mut report = FlushReport {
            messages: queued.len(),
            ..FlushReport::default()
        };
        if queued.is_empty() {
            return report;
        }

        let posts = self.destinations.iter().filter_map(|destination| {
            let envelopes: Vec<Envelope<'_>> = queued
                .iter()
                .filter(|queued| destination.wants(&queued.area))
                .map(|queued| Envelope {
                    kind: "nest",
                    message: &queued.message,
                })
                .collect();
            if envelopes.is_empty() {
                return None;
            }
            Some(self.post(destination, envelopes))
        });

        for result in join_all(posts).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    tracing::warn!("WEBHOOK: {err}");
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn post(
        &self,
        destination: &Destination,
        envelopes: Vec<Envelope<'_>>,
    ) -> Result<(), NestError> {
        let count = envelopes.len();
        let response = self
            .client
            .post(&destination.url)
            .headers(destination.headers.clone())
            .json(&envelopes)
            .send()
            .await
            .map_err(|err| {
                NestError::Webhook(format!("{count} to {} not sent: {err}", destination.url))
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(NestError::Webhook(format!(
                "{count} to {} rejected with {status}",
                destination.url
            )));
        }
        tracing::debug!(url = %destination.url, count, "WEBHOOK: sent");
        Ok(())
    }

    /// Flushes every `flush_interval_seconds` until `cancel` fires, then
    /// flushes once more.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }
        let report = self.flush().await;
        tracing::info!(
            messages = report.messages,
            failed = report.failed,
            "WEBHOOK: final flush done"
        );
    }
}

impl WebhookSender for PoracleSender {
    fn add_nest_webhook(&self, nest: &Nest, nesting: &NestingSpecies) {
        match NestWebhook::new(nest, nesting) {
            Ok(message) => self.queue.lock().push(QueuedWebhook {
                area: nest.area(),
                message,
            }),
            Err(err) => tracing::warn!(nest_id = %nest.id, "WEBHOOK: {err}"),
        }
    }
}
