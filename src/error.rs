//! Service error types with HTTP status code mapping.
//!
//! [`NestError`] is the central error type. The ingestion path never
//! surfaces it; `load_config`, the store and the control-plane handlers do.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::NestId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "nest not found: 42",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server          | 500 / 502 / 503              |
#[derive(Debug, thiserror::Error)]
pub enum NestError {
    /// Configuration failed validation or could not be parsed.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// The nest store (or auxiliary point store) failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A nest geometry could not be parsed or is unsupported.
    #[error("invalid geometry: {0}")]
    GeometryInvalid(String),

    /// A nest with this id is already present in the matcher.
    #[error("duplicate nest id: {0}")]
    DuplicateNest(NestId),

    /// No nest with this id is loaded.
    #[error("nest not found: {0}")]
    NestNotFound(NestId),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Outbound webhook delivery failed.
    #[error("webhook error: {0}")]
    Webhook(String),

    /// The operation was cancelled by shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NestError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::ConfigInvalid(_) => 1002,
            Self::GeometryInvalid(_) => 1003,
            Self::NestNotFound(_) => 2001,
            Self::DuplicateNest(_) => 2002,
            Self::Internal(_) => 3000,
            Self::StoreUnavailable(_) => 3001,
            Self::Webhook(_) => 3002,
            Self::Cancelled => 3003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::ConfigInvalid(_) | Self::GeometryInvalid(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NestNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateNest(_) => StatusCode::CONFLICT,
            Self::StoreUnavailable(_) | Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Webhook(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for NestError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for NestError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::StoreUnavailable(format!("migration failed: {err}"))
    }
}

impl From<geojson::Error> for NestError {
    fn from(err: geojson::Error) -> Self {
        Self::GeometryInvalid(err.to_string())
    }
}

impl From<toml::de::Error> for NestError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigInvalid(err.to_string())
    }
}

impl IntoResponse for NestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
