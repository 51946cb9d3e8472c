use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};

use shared::{
    domain::{Location, SessionPhase, SessionSnapshot, TrackingCode},
    error::{ApiError, EmptyCodeError, ErrorCode, InvalidCodeError},
    protocol::TrackerEvent,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

pub mod map_view;
pub mod settings;
pub mod source;
pub mod status;
pub mod stream;
pub mod tiles;

use map_view::{MapSurface, ViewHandle};
use settings::TrackerSettings;
use source::{LocationSource, LocationSubscription};
use stream::{UpdateStream, UpdateStreamHandle};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    EmptyCode(#[from] EmptyCodeError),
    #[error(transparent)]
    InvalidCode(#[from] InvalidCodeError),
    #[error("submission of {code} was superseded by a newer one")]
    Superseded { code: TrackingCode },
}

impl SubmitError {
    pub fn to_api_error(&self) -> ApiError {
        match self {
            SubmitError::EmptyCode(err) => ApiError::from(*err),
            SubmitError::InvalidCode(err) => ApiError::from(err.clone()),
            SubmitError::Superseded { .. } => {
                ApiError::new(ErrorCode::Superseded, self.to_string())
            }
        }
    }
}

struct ActiveSession {
    epoch: u64,
    code: TrackingCode,
    stream: UpdateStreamHandle,
    pump: JoinHandle<()>,
}

impl ActiveSession {
    fn shutdown(self) {
        self.stream.cancel();
        self.pump.abort();
        debug!(epoch = self.epoch, code = %self.code, "tracking: session stream stopped");
    }
}

#[derive(Default)]
struct ControllerState {
    snapshot: SessionSnapshot,
    active: Option<ActiveSession>,
}

enum MapSlot {
    Detached,
    Mounted(Box<dyn MapSurface>),
    Ready(ViewHandle),
}

/// Owns one tracking session at a time: validation, the live update stream,
/// and the map view it drives.
///
/// Every `submit` starts a new epoch. Work belonging to an older epoch (an
/// in-flight validation or a stream tick) is discarded, so only the newest
/// submission can change state. Dropping the controller cancels the active
/// stream.
pub struct TrackingController {
    source: Arc<dyn LocationSource>,
    settings: TrackerSettings,
    inner: Mutex<ControllerState>,
    map: StdMutex<MapSlot>,
    epoch: watch::Sender<u64>,
    events: broadcast::Sender<TrackerEvent>,
}

impl TrackingController {
    pub fn new(source: Arc<dyn LocationSource>, settings: TrackerSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (epoch, _) = watch::channel(0);
        Arc::new(Self {
            source,
            settings,
            inner: Mutex::new(ControllerState::default()),
            map: StdMutex::new(MapSlot::Detached),
            epoch,
            events,
        })
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<TrackerEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn submit(self: &Arc<Self>, raw_code: &str) -> Result<SessionSnapshot, SubmitError> {
        let code = TrackingCode::parse(raw_code)?;
        let epoch = self.begin_attempt(&code).await;

        let mut epochs = self.epoch.subscribe();
        let outcome = tokio::select! {
            outcome = self.source.open(&code) => Some(outcome),
            _ = wait_superseded(&mut epochs, epoch) => None,
        };
        let Some(outcome) = outcome else {
            info!(epoch, code = %code, "tracking: validation superseded");
            return Err(SubmitError::Superseded { code });
        };

        match outcome {
            Ok(subscription) => self.start_session(epoch, code, subscription).await,
            Err(err) => self.fail_attempt(epoch, code, err).await,
        }
    }

    /// Ends the active session. The last known location is kept for display.
    pub async fn stop(&self) {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            self.epoch.send_modify(|epoch| *epoch += 1);
            if let Some(active) = guard.active.take() {
                info!(code = %active.code, "tracking: session stopped");
                active.shutdown();
            }
            guard.snapshot.connected = false;
            guard.snapshot.loading = false;
            guard.snapshot.phase = SessionPhase::Idle;
            guard.snapshot.clone()
        };
        self.publish(TrackerEvent::SessionChanged { snapshot });
    }

    /// Attaches a host surface. The view is built as soon as a location is
    /// known, immediately if the session already has one.
    pub async fn mount_map(&self, surface: Box<dyn MapSurface>) {
        let guard = self.inner.lock().await;
        let mut slot = self.lock_map();
        release_slot(std::mem::replace(&mut *slot, MapSlot::Detached));
        *slot = match guard.snapshot.current_location.as_ref() {
            Some(location) => MapSlot::Ready(ViewHandle::initialize(
                surface,
                &self.settings,
                Some(location),
                guard.snapshot.code.clone(),
            )),
            None => MapSlot::Mounted(surface),
        };
    }

    /// Detaches and destroys the map view. Returns `false` if nothing was
    /// mounted.
    pub fn unmount_map(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lock_map(), MapSlot::Detached);
        release_slot(previous)
    }

    async fn begin_attempt(&self, code: &TrackingCode) -> u64 {
        let (epoch, snapshot) = {
            let mut guard = self.inner.lock().await;
            self.epoch.send_modify(|epoch| *epoch += 1);
            let epoch = *self.epoch.borrow();
            if let Some(active) = guard.active.take() {
                active.shutdown();
            }
            guard.snapshot.connected = false;
            guard.snapshot.loading = true;
            guard.snapshot.error = None;
            guard.snapshot.phase = SessionPhase::Loading;
            (epoch, guard.snapshot.clone())
        };
        debug!(epoch, code = %code, "tracking: validating code");
        self.publish(TrackerEvent::SessionChanged { snapshot });
        epoch
    }

    async fn start_session(
        self: &Arc<Self>,
        epoch: u64,
        code: TrackingCode,
        subscription: LocationSubscription,
    ) -> Result<SessionSnapshot, SubmitError> {
        let LocationSubscription { initial, updates } = subscription;

        let snapshot = {
            let mut guard = self.inner.lock().await;
            if self.is_stale(epoch) {
                return Err(SubmitError::Superseded { code });
            }

            let stream = updates.handle();
            let pump = self.spawn_pump(epoch, code.clone(), updates);
            guard.active = Some(ActiveSession {
                epoch,
                code: code.clone(),
                stream,
                pump,
            });
            guard.snapshot = SessionSnapshot {
                code: Some(code.clone()),
                current_location: Some(initial),
                connected: true,
                loading: false,
                error: None,
                phase: SessionPhase::Connected,
            };
            self.show_location(&code, &initial);
            guard.snapshot.clone()
        };

        info!(
            epoch,
            code = %code,
            latitude = initial.latitude,
            longitude = initial.longitude,
            "tracking: session started"
        );
        self.publish(TrackerEvent::SessionChanged {
            snapshot: snapshot.clone(),
        });
        self.publish(TrackerEvent::tracking_started(&code));
        Ok(snapshot)
    }

    async fn fail_attempt(
        &self,
        epoch: u64,
        code: TrackingCode,
        err: InvalidCodeError,
    ) -> Result<SessionSnapshot, SubmitError> {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            if self.is_stale(epoch) {
                return Err(SubmitError::Superseded { code });
            }
            guard.snapshot.error = Some(err.message.clone());
            guard.snapshot.connected = false;
            guard.snapshot.loading = false;
            guard.snapshot.phase = SessionPhase::Error;
            guard.snapshot.clone()
        };

        warn!(epoch, code = %code, error = %err, "tracking: code rejected");
        self.publish(TrackerEvent::SessionChanged { snapshot });
        self.publish(TrackerEvent::Error(ApiError::from(err.clone())));
        Err(SubmitError::InvalidCode(err))
    }

    fn spawn_pump(
        self: &Arc<Self>,
        epoch: u64,
        code: TrackingCode,
        mut updates: UpdateStream,
    ) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(location) = updates.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if !controller.apply_update(epoch, &code, location).await {
                    break;
                }
            }
            debug!(epoch, "tracking: update pump finished");
        })
    }

    async fn apply_update(&self, epoch: u64, code: &TrackingCode, location: Location) -> bool {
        {
            let mut guard = self.inner.lock().await;
            if self.is_stale(epoch) {
                return false;
            }
            guard.snapshot.current_location = Some(location);
            self.show_location(code, &location);
        }

        self.publish(TrackerEvent::LocationUpdated {
            code: code.clone(),
            location,
        });
        true
    }

    fn show_location(&self, code: &TrackingCode, location: &Location) {
        let mut slot = self.lock_map();
        let current = std::mem::replace(&mut *slot, MapSlot::Detached);
        *slot = match current {
            MapSlot::Detached => {
                debug!("tracking: no map mounted");
                MapSlot::Detached
            }
            MapSlot::Mounted(surface) => MapSlot::Ready(ViewHandle::initialize(
                surface,
                &self.settings,
                Some(location),
                Some(code.clone()),
            )),
            MapSlot::Ready(mut view) => {
                view.set_tracking_code(code.clone());
                if let Err(err) = view.update_location(location) {
                    debug!(error = %err, "tracking: map update skipped");
                }
                MapSlot::Ready(view)
            }
        };
    }

    fn is_stale(&self, epoch: u64) -> bool {
        *self.epoch.borrow() != epoch
    }

    fn lock_map(&self) -> MutexGuard<'_, MapSlot> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, event: TrackerEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for TrackingController {
    fn drop(&mut self) {
        if let Some(active) = self.inner.get_mut().active.take() {
            active.shutdown();
        }
    }
}

/// Releases whatever surface the slot held. Returns `false` for an empty slot.
fn release_slot(slot: MapSlot) -> bool {
    match slot {
        MapSlot::Detached => false,
        MapSlot::Mounted(mut surface) => {
            surface.release();
            debug!("tracking: pending map surface released");
            true
        }
        MapSlot::Ready(mut view) => {
            view.destroy();
            true
        }
    }
}

async fn wait_superseded(epochs: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        if *epochs.borrow_and_update() != epoch {
            return;
        }
        if epochs.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
