use std::time::Duration;

use shared::domain::Coordinate;
use thiserror::Error;

use crate::tiles::{TileLayer, MAX_ZOOM};

pub const DEFAULT_CENTER: Coordinate = Coordinate::new(37.7749, -122.4194);
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_VALIDATION_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_FLY_DURATION: Duration = Duration::from_millis(1500);
pub const DEFAULT_ZOOM: u8 = 10;
pub const FOCUS_ZOOM: u8 = 15;
const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("{field} must be at most {max}, got {actual}")]
    ZoomOutOfRange {
        field: &'static str,
        max: u8,
        actual: u8,
    },
    #[error("event_capacity must be greater than zero")]
    ZeroEventCapacity,
}

/// Runtime knobs for a tracking session and its map view.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub update_interval: Duration,
    pub validation_delay: Duration,
    pub default_center: Coordinate,
    pub default_zoom: u8,
    pub focus_zoom: u8,
    pub fly_duration: Duration,
    pub tile_layer: TileLayer,
    pub event_capacity: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            validation_delay: DEFAULT_VALIDATION_DELAY,
            default_center: DEFAULT_CENTER,
            default_zoom: DEFAULT_ZOOM,
            focus_zoom: FOCUS_ZOOM,
            fly_duration: DEFAULT_FLY_DURATION,
            tile_layer: TileLayer::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.update_interval.is_zero() {
            return Err(SettingsError::ZeroDuration {
                field: "update_interval",
            });
        }
        for (field, zoom) in [
            ("default_zoom", self.default_zoom),
            ("focus_zoom", self.focus_zoom),
        ] {
            if zoom > MAX_ZOOM {
                return Err(SettingsError::ZoomOutOfRange {
                    field,
                    max: MAX_ZOOM,
                    actual: zoom,
                });
            }
        }
        if self.event_capacity == 0 {
            return Err(SettingsError::ZeroEventCapacity);
        }
        Ok(())
    }
}
