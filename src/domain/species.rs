//! Species keys and observations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A `(species, form)` pair. Serialized as `"species:form"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeciesKey {
    /// Species id, always greater than zero for tracked observations.
    pub species_id: u16,
    /// Form id; 0 for the base form.
    pub form_id: u16,
}

impl SpeciesKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(species_id: u16, form_id: u16) -> Self {
        Self {
            species_id,
            form_id,
        }
    }
}

impl fmt::Display for SpeciesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.species_id, self.form_id)
    }
}

/// Error returned when a `"species:form"` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid species key '{0}'")]
pub struct ParseSpeciesKeyError(String);

impl FromStr for SpeciesKey {
    type Err = ParseSpeciesKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSpeciesKeyError(s.to_string());
        let (species, form) = s.split_once(':').unwrap_or((s, "0"));
        let species_id = species.trim().parse().map_err(|_| err())?;
        let form_id = form.trim().parse().map_err(|_| err())?;
        Ok(Self::new(species_id, form_id))
    }
}

impl Serialize for SpeciesKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpeciesKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A single geolocated sighting. Consumed once, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Species and form observed.
    pub key: SpeciesKey,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Opaque spawnpoint id, 0 when unknown.
    pub spawnpoint_id: u64,
}

impl Observation {
    /// Creates an observation without a spawnpoint id.
    #[must_use]
    pub const fn new(key: SpeciesKey, lat: f64, lon: f64) -> Self {
        Self {
            key,
            lat,
            lon,
            spawnpoint_id: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_colon_form() {
        assert_eq!(SpeciesKey::new(7, 0).to_string(), "7:0");
        assert_eq!(SpeciesKey::new(25, 598).to_string(), "25:598");
    }

    #[test]
    fn parses_with_and_without_form() {
        assert_eq!("7:12".parse(), Ok(SpeciesKey::new(7, 12)));
        assert_eq!("7".parse(), Ok(SpeciesKey::new(7, 0)));
        assert!("x:1".parse::<SpeciesKey>().is_err());
    }

    #[test]
    fn usable_as_json_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(SpeciesKey::new(1, 0), 3_u64);
        let Ok(json) = serde_json::to_string(&map) else {
            panic!("serialization failed");
        };
        assert_eq!(json, r#"{"1:0":3}"#);
    }

    #[test]
    fn orders_by_species_then_form() {
        let mut keys = vec![
            SpeciesKey::new(2, 0),
            SpeciesKey::new(1, 5),
            SpeciesKey::new(1, 0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                SpeciesKey::new(1, 0),
                SpeciesKey::new(1, 5),
                SpeciesKey::new(2, 0)
            ]
        );
    }
}
