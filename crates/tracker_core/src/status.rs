//! Plain-text rendering of the tracking status card.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBadge {
    Live,
    Offline,
}

impl StatusBadge {
    pub fn label(self) -> &'static str {
        match self {
            StatusBadge::Live => "Live",
            StatusBadge::Offline => "Offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCard {
    pub tracking_code: String,
    pub badge: StatusBadge,
    pub updated: String,
    pub coordinates: String,
}

impl StatusCard {
    /// `None` until the session has a location to show.
    pub fn from_snapshot(snapshot: &SessionSnapshot, now: DateTime<Utc>) -> Option<Self> {
        let location = snapshot.current_location?;
        Some(Self {
            tracking_code: snapshot
                .code
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            badge: if snapshot.connected {
                StatusBadge::Live
            } else {
                StatusBadge::Offline
            },
            updated: format!("Updated {}", time_ago(location.timestamp, now)),
            coordinates: format_coordinates(location.latitude, location.longitude),
        })
    }

    pub fn render(&self) -> String {
        format!(
            "Tracking Status [{}]\n  {}\n  {}\n  {}",
            self.badge.label(),
            self.tracking_code,
            self.updated,
            self.coordinates
        )
    }
}

pub fn format_coordinates(lat: f64, lng: f64) -> String {
    format!("{lat:.6}, {lng:.6}")
}

pub fn time_ago(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - timestamp).num_seconds().max(0);
    if seconds < 60 {
        return format!("{seconds}s ago");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    format!("{}h ago", minutes / 60)
}
