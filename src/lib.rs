//! # nestling
//!
//! Nest detection service. Spawn webhooks are matched against nest
//! polygons, species counts accumulate in rolling time periods, and on
//! every rotation each nest is re-evaluated for a nesting species. Changes
//! are persisted and fanned out as webhooks.
//!
//! ## Architecture
//!
//! ```text
//! Webhook senders          Operators
//!     │                       │
//!     ├── POST /webhook       ├── REST Handlers (api/)
//!     │                       │
//!     ├── NestManager ── Reloader (service/)
//!     │       │
//!     │       ├── NestProcessor: NestMatcher + RollingStats (domain/)
//!     │       └── WebhookSender (service/webhook)
//!     │
//!     └── NestStore (PostgreSQL) / PointStore (MySQL) (persistence/)
//! ```
//!
//! The `nestling-importer`, `nestling-refresher` and `nestling-exporter`
//! tools share the same configuration and stores.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod service;
