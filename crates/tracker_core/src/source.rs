//! Backend seam: turns a tracking code into a starting location plus a live
//! update feed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{Location, TrackingCode},
    error::InvalidCodeError,
};
use tokio::time;
use tracing::{debug, info};

use crate::{
    settings::TrackerSettings,
    stream::{DemoRoute, UpdateStream},
};

pub const DEMO_CODE_PREFIX: &str = "DEMO";

pub struct LocationSubscription {
    pub initial: Location,
    pub updates: UpdateStream,
}

#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn open(&self, code: &TrackingCode) -> Result<LocationSubscription, InvalidCodeError>;
}

/// Stand-in backend: accepts `DEMO*` codes after an artificial delay and
/// replays [`DemoRoute`] forever.
pub struct DemoLocationSource {
    validation_delay: Duration,
    update_interval: Duration,
    route: DemoRoute,
}

impl DemoLocationSource {
    pub fn new(settings: &TrackerSettings) -> Self {
        Self {
            validation_delay: settings.validation_delay,
            update_interval: settings.update_interval,
            route: DemoRoute::demo(),
        }
    }

    pub fn with_route(mut self, route: DemoRoute) -> Self {
        self.route = route;
        self
    }

    pub fn accepts(&self, code: &TrackingCode) -> bool {
        code.has_prefix_ignore_case(DEMO_CODE_PREFIX)
    }
}

#[async_trait]
impl LocationSource for DemoLocationSource {
    async fn open(&self, code: &TrackingCode) -> Result<LocationSubscription, InvalidCodeError> {
        debug!(code = %code, delay_ms = self.validation_delay.as_millis() as u64, "source: validating code");
        time::sleep(self.validation_delay).await;

        if !self.accepts(code) {
            info!(code = %code, "source: rejected tracking code");
            return Err(InvalidCodeError::unrecognized());
        }

        let initial = self.route.first().at(Utc::now());
        // The initial location stands for waypoint 0, so ticks resume at 1.
        let updates =
            UpdateStream::spawn_cyclic(self.route.clone().starting_at(1), self.update_interval);

        Ok(LocationSubscription { initial, updates })
    }
}
