//! Data Transfer Objects for REST request/response serialization.

pub mod config_dto;
pub mod nest_dto;
pub mod stats_dto;
pub mod webhook_dto;

pub use config_dto::*;
pub use nest_dto::*;
pub use stats_dto::*;
pub use webhook_dto::*;
