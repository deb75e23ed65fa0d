//! End-to-end tests for `ScanSession`, the camera lifecycle state machine.
//!
//! The session runs against scripted platform ports: a camera list, a
//! permission probe, and a decode engine that refuses a second open while
//! a stream is live (as real camera backends do) and counts every open and
//! release. All tests run on tokio's paused clock, so engine latency,
//! the duplicate window and the permission poll are exact.
use async_trait::async_trait;
use fieldscan_core::config::ScannerConfig;
use fieldscan_core::payload::{encode_envelope, StructuredRecord};
use fieldscan_core::platform::{
    CameraConstraint, CameraDescriptor, CameraDevices, DecodeConfig, DecodeEngine, FrameSink,
    PermissionProbe, PermissionState, PlatformError,
};
use fieldscan_core::session::{
    LifecycleState, ScanErrorKind, ScanEvent, ScanSession, SessionPorts, Transition,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ── Fake ports ───────────────────────────────────────────────────────────────

struct FakeCameras {
    list: Mutex<Result<Vec<CameraDescriptor>, PlatformError>>,
}

impl FakeCameras {
    fn with_count(count: usize) -> Self {
        let list = (0..count)
            .map(|i| CameraDescriptor::new(format!("cam-{i}"), format!("Camera {i}")))
            .collect();
        Self {
            list: Mutex::new(Ok(list)),
        }
    }
}

#[async_trait]
impl CameraDevices for FakeCameras {
    async fn enumerate(&self) -> Result<Vec<CameraDescriptor>, PlatformError> {
        self.list.lock().clone()
    }
}

struct FakePermission {
    state: Mutex<Result<PermissionState, PlatformError>>,
    queries: AtomicUsize,
}

impl FakePermission {
    fn new(state: PermissionState) -> Self {
        Self {
            state: Mutex::new(Ok(state)),
            queries: AtomicUsize::new(0),
        }
    }

    fn set(&self, state: PermissionState) {
        *self.state.lock() = Ok(state);
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionProbe for FakePermission {
    async fn query(&self) -> Result<PermissionState, PlatformError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.state.lock().clone()
    }
}

/// Decode engine that models a single exclusive camera.
struct FakeEngine {
    delay: Duration,
    open: Mutex<Option<CameraConstraint>>,
    sink: Mutex<Option<FrameSink>>,
    failing: Mutex<Vec<CameraConstraint>>,
    fail_release: AtomicBool,
    opens: AtomicUsize,
    overlapping_opens: AtomicUsize,
    releases: AtomicUsize,
}

impl FakeEngine {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            open: Mutex::new(None),
            sink: Mutex::new(None),
            failing: Mutex::new(Vec::new()),
            fail_release: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            overlapping_opens: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    fn fail_on(&self, constraint: CameraConstraint) {
        self.failing.lock().push(constraint);
    }

    fn open_stream(&self) -> Option<CameraConstraint> {
        self.open.lock().clone()
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn overlapping_opens(&self) -> usize {
        self.overlapping_opens.load(Ordering::SeqCst)
    }

    /// Simulate the recogniser spotting `text` in a frame.
    fn show(&self, text: &str) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.deliver(text);
        }
    }
}

#[async_trait]
impl DecodeEngine for FakeEngine {
    async fn start(
        &self,
        constraint: CameraConstraint,
        _config: DecodeConfig,
        sink: FrameSink,
    ) -> Result<(), PlatformError> {
        tokio::time::sleep(self.delay).await;
        if self.open.lock().is_some() {
            self.overlapping_opens.fetch_add(1, Ordering::SeqCst);
            return Err(PlatformError::DeviceBusy("stream already open".into()));
        }
        if self.failing.lock().contains(&constraint) {
            return Err(PlatformError::ConstraintUnsatisfiable(format!("{constraint:?}")));
        }
        *self.open.lock() = Some(constraint);
        *self.sink.lock() = Some(sink);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        tokio::time::sleep(self.delay).await;
        self.releases.fetch_add(1, Ordering::SeqCst);
        *self.open.lock() = None;
        *self.sink.lock() = None;
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(PlatformError::Backend("track already ended".into()));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), PlatformError> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(PlatformError::Backend("region already cleared".into()));
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Harness {
    session: ScanSession,
    cameras: Arc<FakeCameras>,
    permission: Arc<FakePermission>,
    engine: Arc<FakeEngine>,
}

const ENGINE_DELAY: Duration = Duration::from_millis(50);

fn harness(camera_count: usize) -> Harness {
    harness_with_delay(camera_count, ENGINE_DELAY)
}

/// Harness whose engine takes `delay` for every start and stop.
fn harness_with_delay(camera_count: usize, delay: Duration) -> Harness {
    let cameras = Arc::new(FakeCameras::with_count(camera_count));
    let permission = Arc::new(FakePermission::new(PermissionState::Granted));
    let engine = Arc::new(FakeEngine::new(delay));
    let ports = SessionPorts {
        devices: cameras.clone(),
        permissions: permission.clone(),
        engine: engine.clone(),
    };
    let session = ScanSession::new(ports, &ScannerConfig::default());
    Harness {
        session,
        cameras,
        permission,
        engine,
    }
}

fn drain(session: &ScanSession) -> Vec<ScanEvent> {
    session.events().try_iter().collect()
}

fn valid_decodes(events: &[ScanEvent]) -> Vec<StructuredRecord> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::ValidDecode(data) => Some(data.clone()),
            _ => None,
        })
        .collect()
}

fn errors(events: &[ScanEvent]) -> Vec<ScanErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

fn gates(events: &[ScanEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Gate { enabled, .. } => Some(*enabled),
            _ => None,
        })
        .collect()
}

fn code(fleet_number: &str) -> String {
    let data = json!({ "NOLAMBUNG": fleet_number });
    encode_envelope(data.as_object().unwrap())
}

async fn running(camera_count: usize) -> Harness {
    let h = harness(camera_count);
    assert_eq!(h.session.start().await, Transition::Applied);
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);
    drain(&h.session);
    h
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn start_opens_current_camera() {
    let h = harness(2);
    assert_eq!(h.session.init_cameras().await, 2);

    assert_eq!(h.session.start().await, Transition::Applied);
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);
    assert_eq!(
        h.engine.open_stream(),
        Some(CameraConstraint::Device("cam-0".into()))
    );

    let events = drain(&h.session);
    assert!(events.contains(&ScanEvent::CamerasChanged {
        count: 2,
        can_switch: true
    }));
    assert!(events.contains(&ScanEvent::LifecycleChanged(LifecycleState::Starting)));
    assert!(events.contains(&ScanEvent::LifecycleChanged(LifecycleState::Running)));
}

#[tokio::test(start_paused = true)]
async fn start_enumerates_cameras_lazily() {
    let h = harness(1);
    assert!(h.session.cameras().is_empty());
    assert_eq!(h.session.start().await, Transition::Applied);
    assert_eq!(h.session.cameras().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_without_cameras_stays_idle_and_reports() {
    let h = harness(0);
    assert_eq!(h.session.start().await, Transition::Failed);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.opens(), 0);

    let events = drain(&h.session);
    assert!(errors(&events).contains(&ScanErrorKind::CameraUnavailable));
    assert!(events.contains(&ScanEvent::CamerasChanged {
        count: 0,
        can_switch: false
    }));
}

#[tokio::test(start_paused = true)]
async fn enumeration_failure_is_reported_not_retried() {
    let h = harness(0);
    *h.cameras.list.lock() = Err(PlatformError::Backend("media devices unavailable".into()));

    assert_eq!(h.session.init_cameras().await, 0);
    assert_eq!(
        errors(&drain(&h.session)),
        vec![ScanErrorKind::CameraEnumerationFailed]
    );
}

#[tokio::test(start_paused = true)]
async fn overlapping_starts_and_stops_are_no_ops() {
    let h = harness(1);

    let (first, second, stop) = tokio::join!(h.session.start(), h.session.start(), h.session.stop());

    assert_eq!(first, Transition::Applied);
    assert_eq!(second, Transition::Ignored);
    assert_eq!(stop, Transition::Ignored);
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);
    assert_eq!(h.engine.opens(), 1);
    assert_eq!(h.engine.overlapping_opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn requests_during_stopping_are_no_ops() {
    let h = running(1).await;

    let (stop, start, stop_again, start_again) = tokio::join!(
        h.session.stop(),
        h.session.start(),
        h.session.stop(),
        h.session.start()
    );

    assert_eq!(stop, Transition::Applied);
    assert_eq!(start, Transition::Ignored);
    assert_eq!(stop_again, Transition::Ignored);
    assert_eq!(start_again, Transition::Ignored);
    // Settled, never stuck in a transient state.
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.open_stream(), None);
}

#[tokio::test(start_paused = true)]
async fn caller_can_reissue_after_transition_settles() {
    let h = running(1).await;
    assert_eq!(h.session.stop().await, Transition::Applied);
    assert_eq!(h.session.start().await, Transition::Applied);
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);
    assert_eq!(h.engine.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_when_idle_is_ignored() {
    let h = harness(1);
    assert_eq!(h.session.stop().await, Transition::Ignored);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn start_falls_back_to_environment_camera() {
    let h = harness(1);
    h.engine.fail_on(CameraConstraint::Device("cam-0".into()));

    assert_eq!(h.session.start().await, Transition::Applied);
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);
    assert_eq!(
        h.engine.open_stream(),
        Some(CameraConstraint::FacingEnvironment)
    );
    // The failed attempt was released before the fallback was opened.
    assert_eq!(h.engine.releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.overlapping_opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn total_start_failure_returns_to_idle() {
    let h = harness(1);
    h.engine.fail_on(CameraConstraint::Device("cam-0".into()));
    h.engine.fail_on(CameraConstraint::FacingEnvironment);

    assert_eq!(h.session.start().await, Transition::Failed);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.open_stream(), None);
    assert_eq!(
        errors(&drain(&h.session)),
        vec![ScanErrorKind::DecodeStartFailed]
    );

    // Not retried automatically; an explicit start works once the camera does.
    h.engine.failing.lock().clear();
    assert_eq!(h.session.start().await, Transition::Applied);
}

#[tokio::test(start_paused = true)]
async fn release_failures_are_swallowed() {
    let h = running(1).await;
    h.engine.fail_release.store(true, Ordering::SeqCst);

    assert_eq!(h.session.stop().await, Transition::Applied);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
}

// ── Camera switching ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn switching_twice_returns_to_original_camera() {
    let h = running(2).await;
    let original = h.session.current_camera_index();

    assert_eq!(h.session.switch_camera().await, Transition::Applied);
    assert_eq!(
        h.engine.open_stream(),
        Some(CameraConstraint::Device("cam-1".into()))
    );
    assert_eq!(h.session.switch_camera().await, Transition::Applied);

    assert_eq!(h.session.current_camera_index(), original);
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);
    assert_eq!(
        h.engine.open_stream(),
        Some(CameraConstraint::Device("cam-0".into()))
    );
    assert_eq!(h.engine.opens(), 3);
    assert_eq!(h.engine.overlapping_opens(), 0);
    assert!(!h.session.is_switching());
}

#[tokio::test(start_paused = true)]
async fn switch_in_progress_rejects_second_switch() {
    let h = running(2).await;

    let (first, second) = tokio::join!(h.session.switch_camera(), h.session.switch_camera());

    assert_eq!(first, Transition::Applied);
    assert_eq!(second, Transition::Ignored);
    assert_eq!(h.session.current_camera_index(), 1);
    assert_eq!(h.engine.overlapping_opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn switch_never_exposes_idle_to_concurrent_start() {
    let h = running(2).await;

    let (switched, start) = tokio::join!(h.session.switch_camera(), async {
        // Let the switch reach its release step first.
        tokio::task::yield_now().await;
        let seen = h.session.lifecycle();
        (seen, h.session.start().await)
    });

    assert_eq!(switched, Transition::Applied);
    assert_ne!(start.0, LifecycleState::Idle);
    assert_eq!(start.1, Transition::Ignored);
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);
    assert_eq!(h.engine.opens(), 2);
    assert_eq!(h.engine.overlapping_opens(), 0);

    let lifecycle: Vec<LifecycleState> = drain(&h.session)
        .into_iter()
        .filter_map(|e| match e {
            ScanEvent::LifecycleChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            LifecycleState::Stopping,
            LifecycleState::Starting,
            LifecycleState::Running
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn switch_while_idle_only_moves_cursor() {
    let h = harness(3);
    h.session.init_cameras().await;

    assert_eq!(h.session.switch_camera().await, Transition::Applied);
    assert_eq!(h.session.switch_camera().await, Transition::Applied);
    assert_eq!(h.session.switch_camera().await, Transition::Applied);
    assert_eq!(h.session.current_camera_index(), 0);
    assert_eq!(h.engine.opens(), 0);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn switch_needs_two_cameras() {
    let h = running(1).await;
    assert_eq!(h.session.switch_camera().await, Transition::Ignored);
    assert_eq!(h.session.current_camera_index(), 0);
    assert_eq!(h.engine.opens(), 1);
}

// ── Decoding ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn duplicate_scans_are_suppressed_within_window() {
    let h = running(1).await;
    let payload = code("B-16");

    h.engine.show(&payload);
    h.engine.show(&payload);
    tokio::time::advance(Duration::from_millis(4_000)).await;
    h.engine.show(&payload);
    assert_eq!(valid_decodes(&drain(&h.session)).len(), 1);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    h.engine.show(&payload);
    let decodes = valid_decodes(&drain(&h.session));
    assert_eq!(decodes.len(), 1);
    assert_eq!(decodes[0]["NOLAMBUNG"], "B-16");
}

#[tokio::test(start_paused = true)]
async fn different_payloads_are_not_suppressed() {
    let h = running(1).await;
    h.engine.show(&code("B-16"));
    h.engine.show(&code("B-17"));
    assert_eq!(valid_decodes(&drain(&h.session)).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalid_scans_are_dropped_and_scanning_continues() {
    let h = running(1).await;

    h.engine.show("not-a-code");
    let forged = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .encode(r#"{"auth":"XXXX","data":{"NOLAMBUNG":"B-16"}}"#)
    };
    h.engine.show(&forged);

    let events = drain(&h.session);
    assert!(valid_decodes(&events).is_empty());
    assert!(errors(&events).is_empty());
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);

    h.engine.show(&code("B-16"));
    assert_eq!(valid_decodes(&drain(&h.session)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_scan_tracks_accepted_payload() {
    let h = harness(1);
    assert!(h.session.last_scan().is_none());
    assert!(h.session.on_decoded(&code("B-16")));
    assert_eq!(h.session.last_scan().unwrap().payload, code("B-16"));
    assert!(!h.session.on_decoded(&code("B-16")));
}

// ── Permission gate and poll ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn run_with_denied_permission_does_not_start() {
    let h = harness(1);
    h.permission.set(PermissionState::Denied);

    assert!(!h.session.run().await);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.opens(), 0);

    let events = drain(&h.session);
    assert_eq!(gates(&events), vec![false]);
    assert!(errors(&events).contains(&ScanErrorKind::PermissionDenied));
    h.session.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn run_with_prompt_permission_stays_gated() {
    let h = harness(1);
    h.permission.set(PermissionState::Prompt);

    assert!(!h.session.run().await);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.opens(), 0);

    let events = drain(&h.session);
    assert_eq!(gates(&events), vec![false]);
    assert!(events.iter().any(|e| matches!(
        e,
        ScanEvent::Error { kind: ScanErrorKind::PermissionDenied, message }
            if message == "camera access prompt"
    )));

    // Granting access flips the gate on the next poll.
    h.permission.set(PermissionState::Granted);
    assert!(h.session.poll_permission().await);
    assert_eq!(gates(&drain(&h.session)), vec![true]);
    h.session.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn permission_query_failure_is_reported() {
    let h = harness(1);
    *h.permission.state.lock() = Err(PlatformError::Backend("query unsupported".into()));

    assert!(h.session.check_permission().await.is_err());
    assert_eq!(h.session.permission(), PermissionState::Unknown);
    assert!(!h.session.gate().await);
    assert!(errors(&drain(&h.session)).contains(&ScanErrorKind::PermissionCheckFailed));
}

#[tokio::test(start_paused = true)]
async fn poll_regates_on_change_without_touching_lifecycle() {
    let h = harness(1);
    assert!(h.session.run().await);
    assert!(h.session.is_polling());
    drain(&h.session);

    // No change: no re-gate.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(gates(&drain(&h.session)).is_empty());

    h.permission.set(PermissionState::Denied);
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let events = drain(&h.session);
    assert_eq!(gates(&events), vec![false]);
    assert_eq!(h.session.permission(), PermissionState::Denied);
    // The poll only re-gates; the controller owns start/stop.
    assert_eq!(h.session.lifecycle(), LifecycleState::Running);

    h.session.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn poll_permission_reports_changes() {
    let h = harness(1);
    h.session.check_permission().await.unwrap();
    assert!(!h.session.poll_permission().await);

    h.permission.set(PermissionState::Denied);
    assert!(h.session.poll_permission().await);
    assert!(!h.session.poll_permission().await);
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_poll_and_releases_camera() {
    let h = harness(1);
    assert!(h.session.run().await);

    h.session.teardown().await;
    assert!(!h.session.is_polling());
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.open_stream(), None);

    let queries = h.permission.queries();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.permission.queries(), queries, "poll fired after teardown");
}

#[tokio::test(start_paused = true)]
async fn teardown_waits_for_in_flight_start() {
    let h = harness(1);

    let (start, ()) = tokio::join!(h.session.start(), h.session.teardown());

    // The start completed after teardown began, so it backed out.
    assert_eq!(start, Transition::Ignored);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.open_stream(), None);
    assert_eq!(h.engine.opens(), h.engine.releases.load(Ordering::SeqCst));
}

/// A start slower than teardown's wait still leaves no camera open once it
/// completes.
#[tokio::test(start_paused = true)]
async fn start_outlasting_teardown_releases_camera() {
    let h = harness_with_delay(1, Duration::from_secs(6));

    let began = Instant::now();
    let teardown = async {
        h.session.teardown().await;
        Instant::now()
    };
    let (start, finished) = tokio::join!(h.session.start(), teardown);

    assert!(finished - began < Duration::from_secs(6), "teardown waited for the start");
    assert_eq!(start, Transition::Ignored);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.open_stream(), None);
    assert_eq!(h.engine.releases.load(Ordering::SeqCst), 1);
}

/// Nothing restarts the camera once the session is torn down.
#[tokio::test(start_paused = true)]
async fn start_and_switch_after_teardown_are_ignored() {
    let h = running(2).await;
    h.session.teardown().await;

    assert_eq!(h.session.start().await, Transition::Ignored);
    assert_eq!(h.session.switch_camera().await, Transition::Ignored);
    assert_eq!(h.session.lifecycle(), LifecycleState::Idle);
    assert_eq!(h.engine.open_stream(), None);
}

#[tokio::test(start_paused = true)]
async fn dropping_session_cancels_poll() {
    let h = harness(1);
    h.session.spawn_permission_poll();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let queries = h.permission.queries();
    assert!(queries >= 2);

    let permission = h.permission.clone();
    drop(h);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(permission.queries(), queries);
}
