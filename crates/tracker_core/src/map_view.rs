//! Map view adapter: an owned [`ViewHandle`] that drives a rendering surface
//! from location updates.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Local, Utc};
use shared::domain::{Coordinate, Location, TrackingCode};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::{
    settings::TrackerSettings,
    tiles::{TileCoord, TileLayer},
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MapViewError {
    #[error("map view is not ready")]
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTransition {
    pub target: Coordinate,
    pub zoom: u8,
    pub duration: Duration,
}

/// Boundary to the rendering library. A surface renders one map with at most
/// one marker.
pub trait MapSurface: Send {
    fn add_tile_layer(&mut self, layer: &TileLayer);
    fn set_view(&mut self, center: Coordinate, zoom: u8);
    fn place_marker(&mut self, position: Coordinate, label: &str);
    fn move_marker(&mut self, position: Coordinate);
    fn set_marker_label(&mut self, label: &str);
    /// Starts an animated camera move. A call made while a previous
    /// transition is still running redirects it.
    fn fly_to(&mut self, transition: &CameraTransition);
    fn release(&mut self);
}

pub fn marker_label(code: Option<&TrackingCode>, timestamp: DateTime<Utc>) -> String {
    let updated = timestamp.with_timezone(&Local).format("%H:%M:%S");
    match code {
        Some(code) => format!("Tracking: {code}\nUpdated: {updated}"),
        None => format!("Updated: {updated}"),
    }
}

pub struct ViewHandle {
    surface: Option<Box<dyn MapSurface>>,
    tracking_code: Option<TrackingCode>,
    marker: Option<Coordinate>,
    focus_zoom: u8,
    fly_duration: Duration,
}

impl ViewHandle {
    pub fn initialize(
        mut surface: Box<dyn MapSurface>,
        settings: &TrackerSettings,
        initial: Option<&Location>,
        tracking_code: Option<TrackingCode>,
    ) -> Self {
        surface.add_tile_layer(&settings.tile_layer);
        surface.set_view(settings.default_center, settings.default_zoom);

        let mut marker = None;
        if let Some(location) = initial {
            let position = location.coordinate();
            surface.place_marker(
                position,
                &marker_label(tracking_code.as_ref(), location.timestamp),
            );
            surface.set_view(position, settings.focus_zoom);
            marker = Some(position);
        }

        debug!(has_marker = marker.is_some(), "map: view initialized");
        Self {
            surface: Some(surface),
            tracking_code,
            marker,
            focus_zoom: settings.focus_zoom,
            fly_duration: settings.fly_duration,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.surface.is_some()
    }

    pub fn marker_position(&self) -> Option<Coordinate> {
        self.marker
    }

    pub fn set_tracking_code(&mut self, code: TrackingCode) {
        self.tracking_code = Some(code);
    }

    pub fn update_location(&mut self, location: &Location) -> Result<(), MapViewError> {
        let Some(surface) = self.surface.as_mut() else {
            return Err(MapViewError::NotReady);
        };

        let position = location.coordinate();
        let label = marker_label(self.tracking_code.as_ref(), location.timestamp);
        if self.marker.is_some() {
            surface.move_marker(position);
            surface.set_marker_label(&label);
        } else {
            surface.place_marker(position, &label);
        }
        self.marker = Some(position);

        surface.fly_to(&CameraTransition {
            target: position,
            zoom: self.focus_zoom,
            duration: self.fly_duration,
        });
        Ok(())
    }

    pub fn destroy(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            surface.release();
            debug!("map: view destroyed");
        }
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceState {
    pub tile_layer: Option<TileLayer>,
    pub center: Option<Coordinate>,
    pub zoom: Option<u8>,
    pub marker: Option<Coordinate>,
    pub marker_label: Option<String>,
    pub in_flight: Option<CameraTransition>,
    pub transitions: u32,
    pub redirected: u32,
    pub visible_tile: Option<Url>,
    pub released: bool,
}

/// Renderer-less surface that records what a real map would show. Used by the
/// CLI and in tests.
pub struct HeadlessMapSurface {
    state: Arc<Mutex<SurfaceState>>,
    flight_ends_at: Option<Instant>,
}

#[derive(Clone)]
pub struct SurfaceProbe {
    state: Arc<Mutex<SurfaceState>>,
}

impl SurfaceProbe {
    pub fn snapshot(&self) -> SurfaceState {
        lock_state(&self.state).clone()
    }
}

impl HeadlessMapSurface {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SurfaceState::default())),
            flight_ends_at: None,
        }
    }

    pub fn probe(&self) -> SurfaceProbe {
        SurfaceProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        lock_state(&self.state)
    }

    fn refresh_visible_tile(state: &mut SurfaceState) {
        let (Some(layer), Some(center), Some(zoom)) = (&state.tile_layer, state.center, state.zoom)
        else {
            return;
        };
        match layer.tile_url(TileCoord::containing(center, zoom)) {
            Ok(url) => state.visible_tile = Some(url),
            Err(err) => warn!(error = %err, "map: cannot address visible tile"),
        }
    }
}

impl Default for HeadlessMapSurface {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_state(state: &Mutex<SurfaceState>) -> MutexGuard<'_, SurfaceState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MapSurface for HeadlessMapSurface {
    fn add_tile_layer(&mut self, layer: &TileLayer) {
        let mut state = self.state();
        state.tile_layer = Some(layer.clone());
        Self::refresh_visible_tile(&mut state);
    }

    fn set_view(&mut self, center: Coordinate, zoom: u8) {
        self.flight_ends_at = None;
        let mut state = self.state();
        state.in_flight = None;
        state.center = Some(center);
        state.zoom = Some(zoom);
        Self::refresh_visible_tile(&mut state);
    }

    fn place_marker(&mut self, position: Coordinate, label: &str) {
        let mut state = self.state();
        state.marker = Some(position);
        state.marker_label = Some(label.to_string());
    }

    fn move_marker(&mut self, position: Coordinate) {
        self.state().marker = Some(position);
    }

    fn set_marker_label(&mut self, label: &str) {
        self.state().marker_label = Some(label.to_string());
    }

    fn fly_to(&mut self, transition: &CameraTransition) {
        let now = Instant::now();
        let still_flying = self.flight_ends_at.is_some_and(|ends_at| now < ends_at);
        self.flight_ends_at = Some(now + transition.duration);

        let mut state = self.state();
        if still_flying {
            state.redirected += 1;
        }
        state.transitions += 1;
        state.in_flight = Some(*transition);
        // The camera lands on the target; intermediate frames are not modeled.
        state.center = Some(transition.target);
        state.zoom = Some(transition.zoom);
        Self::refresh_visible_tile(&mut state);
    }

    fn release(&mut self) {
        let mut state = self.state();
        state.released = true;
        state.in_flight = None;
        state.marker = None;
    }
}

#[cfg(test)]
#[path = "tests/map_view_tests.rs"]
mod tests;
