use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EmptyCodeError;

/// A plain geographic coordinate in degrees. No range is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn at(self, timestamp: DateTime<Utc>) -> Location {
        Location {
            latitude: self.lat,
            longitude: self.lng,
            timestamp,
        }
    }
}

/// Timestamped position. A fresh value is produced for every update and never
/// mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Location {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn same_position(&self, other: &Location) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

/// User-supplied tracking code, trimmed and guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TrackingCode(String);

impl TrackingCode {
    pub fn parse(raw: &str) -> Result<Self, EmptyCodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EmptyCodeError);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_prefix_ignore_case(&self, prefix: &str) -> bool {
        self.0
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }
}

impl TryFrom<String> for TrackingCode {
    type Error = EmptyCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TrackingCode> for String {
    fn from(value: TrackingCode) -> Self {
        value.0
    }
}

impl fmt::Display for TrackingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Loading,
    Connected,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<TrackingCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<Location>,
    pub connected: bool,
    pub loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub phase: SessionPhase,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
