//! Type-safe nest identifier.
//!
//! [`NestId`] wraps the stable 64-bit id a nest keeps for its whole life
//! in the store, so it cannot be confused with counts or epochs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for a nest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct NestId(i64);

impl NestId {
    /// Creates a `NestId` from its raw value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NestId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<i64> for NestId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<NestId> for i64 {
    fn from(id: NestId) -> Self {
        id.0
    }
}
