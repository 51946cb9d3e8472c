//! Cancellable, timer-driven location update stream.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use futures::Stream;
use shared::domain::{Coordinate, Location};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

/// The four demo waypoints, walked north-east through San Francisco.
pub const DEMO_WAYPOINTS: [Coordinate; 4] = [
    Coordinate::new(37.7749, -122.4194),
    Coordinate::new(37.7849, -122.4094),
    Coordinate::new(37.7949, -122.3994),
    Coordinate::new(37.8049, -122.3894),
];

const UPDATE_BUFFER: usize = 16;
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Fixed cyclic table of coordinates with a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoRoute {
    points: Vec<Coordinate>,
    cursor: usize,
}

impl DemoRoute {
    pub fn new(points: Vec<Coordinate>) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(Self { points, cursor: 0 })
    }

    pub fn demo() -> Self {
        Self {
            points: DEMO_WAYPOINTS.to_vec(),
            cursor: 0,
        }
    }

    pub fn starting_at(mut self, cursor: usize) -> Self {
        self.cursor = cursor % self.points.len();
        self
    }

    pub fn first(&self) -> Coordinate {
        self.points[0]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn next_location(&mut self, now: chrono::DateTime<Utc>) -> Location {
        let location = self.points[self.cursor].at(now);
        self.cursor = (self.cursor + 1) % self.points.len();
        location
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("update stream is closed")]
pub struct StreamClosed;

struct StreamControl {
    cancelled: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamControl {
    fn new() -> Arc<Self> {
        let (cancelled, _) = watch::channel(false);
        Arc::new(Self {
            cancelled,
            task: Mutex::new(None),
        })
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Keeps the producer task so `cancel` can abort it, even after a
    /// poisoned lock.
    fn store_task(&self, task: JoinHandle<()>) {
        *self.task_slot() = Some(task);
    }

    fn cancel(&self) {
        self.cancelled.send_replace(true);
        let task = self.task_slot().take();
        if let Some(task) = task {
            task.abort();
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

/// Cloneable cancellation handle for an [`UpdateStream`].
#[derive(Clone)]
pub struct UpdateStreamHandle {
    control: Arc<StreamControl>,
}

impl UpdateStreamHandle {
    /// Stops the producer. The subscriber observes no value after this call,
    /// including values already buffered.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

impl std::fmt::Debug for UpdateStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStreamHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Producer side for sources that push locations themselves.
pub struct UpdateSender {
    tx: mpsc::Sender<Location>,
    control: Arc<StreamControl>,
}

impl UpdateSender {
    pub async fn send(&self, location: Location) -> Result<(), StreamClosed> {
        if self.control.is_cancelled() {
            return Err(StreamClosed);
        }
        self.tx.send(location).await.map_err(|_| StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_cancelled() || self.tx.is_closed()
    }
}

/// Receiving side of a live location feed. Dropping it cancels the producer.
pub struct UpdateStream {
    rx: mpsc::Receiver<Location>,
    cancelled: watch::Receiver<bool>,
    handle: UpdateStreamHandle,
}

impl UpdateStream {
    pub fn channel(capacity: usize) -> (UpdateSender, UpdateStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let control = StreamControl::new();
        let sender = UpdateSender {
            tx,
            control: Arc::clone(&control),
        };
        (sender, Self::from_parts(rx, control))
    }

    /// Spawns a producer that emits one location from `route` every `period`,
    /// starting one full period from now.
    pub fn spawn_cyclic(mut route: DemoRoute, period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let control = StreamControl::new();
        let task_control = Arc::clone(&control);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if task_control.is_cancelled() {
                    break;
                }
                let cursor = route.cursor();
                let location = route.next_location(Utc::now());
                debug!(
                    cursor,
                    latitude = location.latitude,
                    longitude = location.longitude,
                    "stream: tick"
                );
                if tx.send(location).await.is_err() {
                    break;
                }
            }
        });

        control.store_task(task);
        Self::from_parts(rx, control)
    }

    fn from_parts(rx: mpsc::Receiver<Location>, control: Arc<StreamControl>) -> Self {
        Self {
            rx,
            cancelled: control.cancelled.subscribe(),
            handle: UpdateStreamHandle { control },
        }
    }

    pub fn handle(&self) -> UpdateStreamHandle {
        self.handle.clone()
    }

    /// Next location, or `None` once the stream is cancelled or the producer
    /// has finished.
    pub async fn recv(&mut self) -> Option<Location> {
        if self.handle.is_cancelled() {
            return None;
        }
        let next = tokio::select! {
            biased;
            _ = wait_cancelled(&mut self.cancelled) => None,
            next = self.rx.recv() => next,
        };
        next.filter(|_| !self.handle.is_cancelled())
    }

    pub fn into_stream(self) -> impl Stream<Item = Location> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|location| (location, stream))
        })
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;
