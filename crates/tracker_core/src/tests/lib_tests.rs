use super::*;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use shared::{domain::Coordinate, error::INVALID_CODE_MESSAGE};
use tokio::{sync::broadcast::error::TryRecvError, time};

use crate::{
    map_view::{HeadlessMapSurface, SurfaceProbe},
    source::DemoLocationSource,
    stream::DEMO_WAYPOINTS,
};

const PERIOD: Duration = Duration::from_millis(3000);
const SLACK: Duration = Duration::from_millis(10);

struct RecordingSource {
    inner: DemoLocationSource,
    calls: AtomicUsize,
    handles: StdMutex<Vec<UpdateStreamHandle>>,
}

impl RecordingSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DemoLocationSource::new(&TrackerSettings::default()),
            calls: AtomicUsize::new(0),
            handles: StdMutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn handle(&self, index: usize) -> UpdateStreamHandle {
        self.handles.lock().expect("handles")[index].clone()
    }
}

#[async_trait]
impl LocationSource for RecordingSource {
    async fn open(&self, code: &TrackingCode) -> Result<LocationSubscription, InvalidCodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let subscription = self.inner.open(code).await?;
        self.handles
            .lock()
            .expect("handles")
            .push(subscription.updates.handle());
        Ok(subscription)
    }
}

fn controller() -> (Arc<TrackingController>, Arc<RecordingSource>) {
    let source = RecordingSource::new();
    let controller = TrackingController::new(source.clone(), TrackerSettings::default());
    (controller, source)
}

async fn controller_with_map() -> (Arc<TrackingController>, Arc<RecordingSource>, SurfaceProbe) {
    let (controller, source) = controller();
    let surface = HeadlessMapSurface::new();
    let probe = surface.probe();
    controller.mount_map(Box::new(surface)).await;
    (controller, source, probe)
}

async fn current_position(controller: &TrackingController) -> Option<Coordinate> {
    controller
        .snapshot()
        .await
        .current_location
        .map(|location| location.coordinate())
}

#[tokio::test(start_paused = true)]
async fn demo_code_connects_and_cycles_through_waypoints() {
    let (controller, _source, probe) = controller_with_map().await;

    let snapshot = controller.submit("DEMO123").await.expect("connected");
    assert!(snapshot.connected);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.phase, SessionPhase::Connected);
    assert_eq!(snapshot.code.as_ref().map(TrackingCode::as_str), Some("DEMO123"));
    assert_eq!(
        snapshot.current_location.map(|l| l.coordinate()),
        Some(Coordinate::new(37.7749, -122.4194))
    );
    assert_eq!(probe.snapshot().marker, Some(DEMO_WAYPOINTS[0]));

    time::sleep(PERIOD + SLACK).await;
    assert_eq!(
        current_position(&controller).await,
        Some(Coordinate::new(37.7849, -122.4094))
    );
    assert_eq!(probe.snapshot().marker, Some(DEMO_WAYPOINTS[1]));

    time::sleep(PERIOD * 3).await;
    assert_eq!(
        current_position(&controller).await,
        Some(Coordinate::new(37.7749, -122.4194))
    );
    let map = probe.snapshot();
    assert_eq!(map.marker, Some(DEMO_WAYPOINTS[0]));
    assert_eq!(map.transitions, 4);
    assert!(map
        .marker_label
        .as_deref()
        .is_some_and(|label| label.starts_with("Tracking: DEMO123")));
}

#[tokio::test(start_paused = true)]
async fn demo_prefix_is_matched_case_insensitively_after_trimming() {
    for raw in ["demo", "  Demo-7  ", "DEMOLITION", "dEmO\t"] {
        let (controller, _source) = controller();
        let snapshot = controller.submit(raw).await.expect("connected");
        assert!(snapshot.connected, "{raw:?} should connect");
        assert!(snapshot.current_location.is_some());
        assert_eq!(
            snapshot.code.as_ref().map(TrackingCode::as_str),
            Some(raw.trim())
        );
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_code_reports_invalid_code_error() {
    let (controller, _source) = controller();

    let err = controller.submit("hello").await.expect_err("rejected");
    assert!(matches!(err, SubmitError::InvalidCode(_)));
    assert_eq!(err.to_string(), INVALID_CODE_MESSAGE);
    assert_eq!(err.to_api_error().code, ErrorCode::InvalidCode);

    let snapshot = controller.snapshot().await;
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Invalid tracking code. Try a code starting with \"DEMO\"")
    );
    assert!(!snapshot.connected);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.phase, SessionPhase::Error);
    assert_eq!(snapshot.current_location, None);
}

#[tokio::test(start_paused = true)]
async fn blank_code_is_rejected_without_validation() {
    let (controller, source) = controller();
    let mut events = controller.subscribe_events();

    for raw in ["", "   ", "\n\t"] {
        let err = controller.submit(raw).await.expect_err("blank");
        assert!(matches!(err, SubmitError::EmptyCode(_)));
    }

    assert_eq!(source.calls(), 0);
    assert_eq!(controller.snapshot().await, SessionSnapshot::default());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn session_events_are_published_in_order() {
    let (controller, _source) = controller();
    let mut events = controller.subscribe_events();

    controller.submit("DEMO123").await.expect("connected");

    match events.recv().await.expect("loading") {
        TrackerEvent::SessionChanged { snapshot } => {
            assert_eq!(snapshot.phase, SessionPhase::Loading);
            assert!(snapshot.loading);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match events.recv().await.expect("connected") {
        TrackerEvent::SessionChanged { snapshot } => {
            assert_eq!(snapshot.phase, SessionPhase::Connected);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        events.recv().await.expect("notification"),
        TrackerEvent::Notification {
            title: "Tracking Started".into(),
            description: "Now tracking DEMO123 in real-time".into(),
        }
    );
    match events.recv().await.expect("tick") {
        TrackerEvent::LocationUpdated { code, location } => {
            assert_eq!(code.as_str(), "DEMO123");
            assert_eq!(location.coordinate(), DEMO_WAYPOINTS[1]);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn newer_submission_supersedes_inflight_validation() {
    let (controller, source) = controller();

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.submit("DEMO-A").await })
    };
    time::sleep(Duration::from_millis(500)).await;

    let second = controller.submit("DEMO-B").await.expect("second connects");
    let first = first.await.expect("join");

    match first {
        Err(SubmitError::Superseded { code }) => assert_eq!(code.as_str(), "DEMO-A"),
        other => panic!("expected superseded, got {other:?}"),
    }
    assert_eq!(
        second.code.as_ref().map(TrackingCode::as_str),
        Some("DEMO-B")
    );
    assert_eq!(source.calls(), 2);
    assert_eq!(
        controller
            .snapshot()
            .await
            .code
            .as_ref()
            .map(TrackingCode::as_str),
        Some("DEMO-B")
    );
}

#[tokio::test(start_paused = true)]
async fn resubmission_cancels_previous_stream_and_keeps_location_on_failure() {
    let (controller, source) = controller();
    let mut events = controller.subscribe_events();

    controller.submit("DEMO1").await.expect("connected");
    time::sleep(PERIOD + SLACK).await;
    assert_eq!(current_position(&controller).await, Some(DEMO_WAYPOINTS[1]));

    controller.submit("hello").await.expect_err("rejected");
    assert!(source.handle(0).is_cancelled());

    let snapshot = controller.snapshot().await;
    assert!(!snapshot.connected);
    assert_eq!(
        snapshot.current_location.map(|l| l.coordinate()),
        Some(DEMO_WAYPOINTS[1])
    );

    while events.try_recv().is_ok() {}
    time::sleep(PERIOD * 4).await;
    assert_eq!(current_position(&controller).await, Some(DEMO_WAYPOINTS[1]));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn stop_ends_the_session_and_freezes_location() {
    let (controller, source) = controller();

    controller.submit("DEMO1").await.expect("connected");
    time::sleep(PERIOD + SLACK).await;
    controller.stop().await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, SessionPhase::Idle);
    assert!(!snapshot.connected);
    assert!(source.handle(0).is_cancelled());

    time::sleep(PERIOD * 3).await;
    assert_eq!(current_position(&controller).await, Some(DEMO_WAYPOINTS[1]));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_controller_cancels_the_stream() {
    let (controller, source) = controller();
    controller.submit("DEMO1").await.expect("connected");

    let handle = source.handle(0);
    assert!(!handle.is_cancelled());

    drop(controller);
    assert!(handle.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn map_mounted_after_connect_starts_at_current_location() {
    let (controller, _source) = controller();
    controller.submit("DEMO1").await.expect("connected");
    time::sleep(PERIOD + SLACK).await;

    let surface = HeadlessMapSurface::new();
    let probe = surface.probe();
    controller.mount_map(Box::new(surface)).await;

    let map = probe.snapshot();
    assert_eq!(map.marker, Some(DEMO_WAYPOINTS[1]));
    assert_eq!(map.zoom, Some(settings::FOCUS_ZOOM));
}

#[tokio::test(start_paused = true)]
async fn updates_continue_after_map_unmount() {
    let (controller, _source, probe) = controller_with_map().await;
    controller.submit("DEMO1").await.expect("connected");

    assert!(controller.unmount_map());
    assert!(probe.snapshot().released);
    assert!(!controller.unmount_map());

    time::sleep(PERIOD + SLACK).await;
    assert_eq!(current_position(&controller).await, Some(DEMO_WAYPOINTS[1]));
}

#[tokio::test(start_paused = true)]
async fn pending_surface_is_released_on_unmount_or_replacement() {
    let (controller, _source, first) = controller_with_map().await;

    let surface = HeadlessMapSurface::new();
    let second = surface.probe();
    controller.mount_map(Box::new(surface)).await;
    assert!(first.snapshot().released);
    assert!(!second.snapshot().released);

    assert!(controller.unmount_map());
    assert!(second.snapshot().released);
    assert!(!controller.unmount_map());
}

#[tokio::test(start_paused = true)]
async fn event_stream_yields_broadcast_events() {
    use futures::StreamExt;

    let (controller, _source) = controller();
    let mut stream = controller.event_stream();
    controller.submit("hello").await.expect_err("rejected");

    let mut saw_error = false;
    for _ in 0..3 {
        if let Some(Ok(TrackerEvent::Error(err))) = stream.next().await {
            assert_eq!(err.code, ErrorCode::InvalidCode);
            saw_error = true;
        }
    }
    assert!(saw_error);
}
