use serde::{Deserialize, Serialize};

use crate::{
    domain::{Location, SessionSnapshot, TrackingCode},
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TrackerEvent {
    SessionChanged {
        snapshot: SessionSnapshot,
    },
    LocationUpdated {
        code: TrackingCode,
        location: Location,
    },
    Notification {
        title: String,
        description: String,
    },
    Error(ApiError),
}

impl TrackerEvent {
    pub fn tracking_started(code: &TrackingCode) -> Self {
        Self::Notification {
            title: "Tracking Started".to_string(),
            description: format!("Now tracking {code} in real-time"),
        }
    }
}
