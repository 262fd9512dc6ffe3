//! Inbound webhook envelopes.

use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::domain::{Observation, SpeciesKey};

/// One `{type, message}` envelope of a webhook batch.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WebhookEnvelope {
    /// Message type; only `pokemon` is processed.
    #[serde(rename = "type")]
    #[schema(example = "pokemon")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub message: Value,
}

/// The fields of a `pokemon` message used for nest detection.
#[derive(Debug, Clone, Deserialize)]
pub struct PokemonMessage {
    /// Species id.
    pub pokemon_id: i64,
    /// Form id.
    #[serde(default)]
    pub form: Option<i64>,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Hex spawnpoint id; empty or `None` for lured or wild spawns.
    #[serde(default)]
    pub spawnpoint_id: Option<String>,
    /// Set for encounters only.
    #[serde(default)]
    pub individual_attack: Option<i64>,
}

/// Why a pokemon message produced no observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skipped {
    /// Sighting without an encounter.
    NotEncountered,
    /// Malformed message, with a reason to log.
    Invalid(String),
}

impl PokemonMessage {
    /// Converts to an [`Observation`].
    ///
    /// # Errors
    ///
    /// Returns [`Skipped`] for sightings and for messages with a bad
    /// species, form or spawnpoint id.
    pub fn to_observation(&self) -> Result<Observation, Skipped> {
        let species_id = u16::try_from(self.pokemon_id)
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| Skipped::Invalid(format!("bad pokemon id {}", self.pokemon_id)))?;
        let form_id = u16::try_from(self.form.unwrap_or(0))
            .map_err(|_| Skipped::Invalid(format!("bad form {:?}", self.form)))?;

        let spawnpoint_id = match self.spawnpoint_id.as_deref().map(str::trim) {
            None | Some("" | "None") => 0,
            Some(hex) => u64::from_str_radix(hex, 16)
                .map_err(|e| Skipped::Invalid(format!("bad spawnpoint id '{hex}': {e}")))?,
        };

        if self.individual_attack.is_none() {
            return Err(Skipped::NotEncountered);
        }

        Ok(Observation {
            key: SpeciesKey::new(species_id, form_id),
            lat: self.latitude,
            lon: self.longitude,
            spawnpoint_id,
        })
    }
}
