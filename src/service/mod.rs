//! Service layer: loading, processing and maintaining nests.
//!
//! [`NestManager`] publishes the current [`NestProcessor`], which counts
//! observations and decides nesting species at each rotation. The
//! [`NestLoader`] and [`NestRefresher`] keep the store consistent with the
//! configured filters; [`NestImporter`] and the exporter move nests in and
//! out of it.

pub mod exporter;
pub mod importer;
pub mod loader;
pub mod manager;
pub mod processor;
pub mod refresher;
pub mod reload;
pub mod webhook;

pub use exporter::{ExportReport, ExportSelection, export_nests};
pub use importer::{ImportReport, NestImporter};
pub use loader::{LoadReport, NestLoader};
pub use manager::{IngestCounters, NestManager};
pub use processor::{NestProcessor, RotationReport};
pub use refresher::{NestRefresher, RefreshReport};
pub use reload::{RefreshMode, ReloadOutcome, Reloader};
pub use webhook::{NestWebhook, NoopSender, PoracleSender, WebhookSender};
