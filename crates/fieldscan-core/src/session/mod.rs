//! Scan session: owns the camera decode loop for one scan view.
//!
//! Lifecycle: `Idle → Starting → Running → Stopping → Idle`. Every
//! transition is checked and applied under the state lock, so on a
//! cooperative runtime two overlapping requests can never both win: the
//! loser sees a transient state and becomes a no-op.
//!
//! The session reports to its controller only through [`ScanEvent`]s on a
//! bounded crossbeam channel. It owns the single camera stream; switching
//! cameras always closes the old stream before the new one is opened.
pub mod dedup;
pub mod events;

pub use dedup::{DuplicateFilter, LastScan};
pub use events::{LifecycleState, ScanErrorKind, ScanEvent};

use crate::config::ScannerConfig;
use crate::payload;
use crate::platform::{
    CameraConstraint, CameraDescriptor, CameraDevices, DecodeConfig, DecodeEngine, FrameSink,
    PermissionProbe, PermissionState, PlatformError,
};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Maximum number of events that may queue up before the controller drains
/// them. Sends never block; on overflow the event is dropped and logged.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// How often `teardown` re-checks a transition that is still in flight.
const SETTLE_POLL: Duration = Duration::from_millis(10);

/// Upper bound on how long `teardown` waits for an in-flight transition.
const SETTLE_LIMIT: Duration = Duration::from_secs(5);

/// Result of a lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The request ran to completion.
    Applied,
    /// Rejected because of the current state, or overtaken by teardown.
    /// No stream is left open.
    Ignored,
    /// Ran, but ended back in `Idle` after reporting an error.
    Failed,
}

/// Host primitives the session drives.
#[derive(Clone)]
pub struct SessionPorts {
    pub devices: Arc<dyn CameraDevices>,
    pub permissions: Arc<dyn PermissionProbe>,
    pub engine: Arc<dyn DecodeEngine>,
}

struct SessionState {
    cameras: Vec<CameraDescriptor>,
    current_index: usize,
    lifecycle: LifecycleState,
    permission: PermissionState,
    switching: bool,
    /// Set once by `teardown`. A start that completes afterwards releases
    /// its stream instead of running.
    torn_down: bool,
    dedup: DuplicateFilter,
}

struct SessionInner {
    ports: SessionPorts,
    decode_config: DecodeConfig,
    poll_interval: Duration,
    events_tx: Sender<ScanEvent>,
    state: Mutex<SessionState>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the scan session of one scan view.
///
/// Dropping the handle cancels the permission poll. Call
/// [`ScanSession::teardown`] first to release the camera as well.
pub struct ScanSession {
    inner: Arc<SessionInner>,
    events_rx: Receiver<ScanEvent>,
}

impl ScanSession {
    pub fn new(ports: SessionPorts, config: &ScannerConfig) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(SessionInner {
            ports,
            decode_config: config.decode_config(),
            poll_interval: config.permission_poll_interval(),
            events_tx,
            state: Mutex::new(SessionState {
                cameras: Vec::new(),
                current_index: 0,
                lifecycle: LifecycleState::Idle,
                permission: PermissionState::Unknown,
                switching: false,
                torn_down: false,
                dedup: DuplicateFilter::new(config.duplicate_window()),
            }),
            poll_task: Mutex::new(None),
        });
        Self { inner, events_rx }
    }

    /// Receiver for session events.
    pub fn events(&self) -> &Receiver<ScanEvent> {
        &self.events_rx
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.state.lock().lifecycle
    }

    pub fn permission(&self) -> PermissionState {
        self.inner.state.lock().permission
    }

    pub fn cameras(&self) -> Vec<CameraDescriptor> {
        self.inner.state.lock().cameras.clone()
    }

    pub fn current_camera_index(&self) -> usize {
        self.inner.state.lock().current_index
    }

    pub fn is_switching(&self) -> bool {
        self.inner.state.lock().switching
    }

    pub fn last_scan(&self) -> Option<LastScan> {
        self.inner.state.lock().dedup.last().cloned()
    }

    /// Whether the permission poll is currently scheduled.
    pub fn is_polling(&self) -> bool {
        self.inner
            .poll_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Enter the scan view: refresh cameras, start the permission poll,
    /// evaluate the gate, and start scanning if the gate allows it.
    ///
    /// Returns whether scanning was enabled by the gate.
    pub async fn run(&self) -> bool {
        self.inner.init_cameras().await;
        self.spawn_permission_poll();
        if !self.inner.gate().await {
            return false;
        }
        self.inner.start().await;
        true
    }

    /// Enumerate cameras. Returns the number found.
    pub async fn init_cameras(&self) -> usize {
        self.inner.init_cameras().await
    }

    /// Query the platform permission state and record it.
    pub async fn check_permission(&self) -> Result<PermissionState, PlatformError> {
        self.inner.check_permission().await
    }

    /// Re-evaluate camera availability and permission, emitting a
    /// [`ScanEvent::Gate`]. Never starts or stops the stream.
    pub async fn gate(&self) -> bool {
        self.inner.gate().await
    }

    pub async fn start(&self) -> Transition {
        self.inner.start().await
    }

    pub async fn stop(&self) -> Transition {
        self.inner.stop().await
    }

    pub async fn switch_camera(&self) -> Transition {
        self.inner.switch_camera().await
    }

    /// One permission poll tick. Returns whether the permission changed
    /// (and the gate was re-run).
    pub async fn poll_permission(&self) -> bool {
        self.inner.poll_permission().await
    }

    /// Feed one decoded payload, as the engine does through its
    /// [`FrameSink`]. Returns whether it was forwarded as a valid decode.
    pub fn on_decoded(&self, payload: &str) -> bool {
        self.inner.on_decoded(payload)
    }

    /// Schedule the permission poll, replacing any previous one.
    pub fn spawn_permission_poll(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.poll_permission().await;
            }
        });

        if let Some(previous) = self.inner.poll_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancel the permission poll.
    pub fn cancel_permission_poll(&self) {
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
            debug!("Permission poll cancelled");
        }
    }

    /// Leave the scan view: cancel the poll, then release the camera.
    ///
    /// The poll is cancelled first and unconditionally. A start or stop
    /// still in flight is allowed to settle before the stream is released.
    /// If it outlasts the wait, the start releases its own stream when it
    /// completes. After teardown every start and switch is ignored.
    pub async fn teardown(&self) {
        self.cancel_permission_poll();
        self.inner.state.lock().torn_down = true;

        let deadline = Instant::now() + SETTLE_LIMIT;
        while self.lifecycle().is_transitioning() {
            if Instant::now() >= deadline {
                warn!("Teardown stopped waiting for an in-flight camera transition, it will release the stream on completion");
                return;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
        self.inner.stop().await;
        info!("Scan session torn down");
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
        }
    }
}

impl SessionInner {
    fn emit(&self, event: ScanEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Session event channel full, dropping {event:?}");
            }
            // The controller is gone; nobody is listening.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn set_lifecycle(&self, lifecycle: LifecycleState) {
        self.state.lock().lifecycle = lifecycle;
        self.emit(ScanEvent::LifecycleChanged(lifecycle));
    }

    fn report(&self, kind: ScanErrorKind, message: impl Into<String>) {
        self.emit(ScanEvent::Error {
            kind,
            message: message.into(),
        });
    }

    async fn init_cameras(&self) -> usize {
        match self.ports.devices.enumerate().await {
            Ok(cameras) => {
                let count = cameras.len();
                {
                    let mut state = self.state.lock();
                    state.cameras = cameras;
                    if state.current_index >= count {
                        state.current_index = 0;
                    }
                }
                info!(count, "Cameras enumerated");
                self.emit(ScanEvent::CamerasChanged {
                    count,
                    can_switch: count >= 2,
                });
                if count == 0 {
                    self.report(ScanErrorKind::CameraUnavailable, "no camera found");
                }
                count
            }
            Err(e) => {
                warn!("Camera enumeration failed: {e}");
                self.report(
                    ScanErrorKind::CameraEnumerationFailed,
                    format!("camera detection failed: {e}"),
                );
                self.state.lock().cameras.len()
            }
        }
    }

    async fn check_permission(&self) -> Result<PermissionState, PlatformError> {
        let result = self.ports.permissions.query().await;
        let observed = match &result {
            Ok(state) => *state,
            Err(e) => {
                debug!("Permission query failed: {e}");
                PermissionState::Unknown
            }
        };
        self.state.lock().permission = observed;
        result
    }

    async fn gate(&self) -> bool {
        let has_camera = match self.ports.devices.enumerate().await {
            Ok(cameras) => !cameras.is_empty(),
            Err(e) => {
                warn!("Camera availability check failed: {e}");
                false
            }
        };
        let permission = self.check_permission().await;

        let enabled = if !has_camera {
            self.report(ScanErrorKind::CameraUnavailable, "no camera found");
            false
        } else {
            match permission {
                Ok(state) if state.allows_scanning() => true,
                Ok(state) => {
                    self.report(
                        ScanErrorKind::PermissionDenied,
                        format!("camera access {}", state.label()),
                    );
                    false
                }
                Err(e) => {
                    self.report(
                        ScanErrorKind::PermissionCheckFailed,
                        format!("failed to check camera permission: {e}"),
                    );
                    false
                }
            }
        };

        let permission = self.state.lock().permission;
        debug!(enabled, permission = permission.label(), "Permission gate evaluated");
        self.emit(ScanEvent::Gate {
            enabled,
            permission,
        });
        enabled
    }

    async fn poll_permission(&self) -> bool {
        let previous = self.state.lock().permission;
        let current = self
            .check_permission()
            .await
            .unwrap_or(PermissionState::Unknown);
        if current == previous {
            return false;
        }
        info!(
            from = previous.label(),
            to = current.label(),
            "Camera permission changed"
        );
        self.gate().await;
        true
    }

    async fn start(self: &Arc<Self>) -> Transition {
        {
            let mut state = self.state.lock();
            if state.torn_down || state.lifecycle != LifecycleState::Idle {
                debug!(lifecycle = ?state.lifecycle, torn_down = state.torn_down, "Start ignored");
                return Transition::Ignored;
            }
            state.lifecycle = LifecycleState::Starting;
        }
        self.emit(ScanEvent::LifecycleChanged(LifecycleState::Starting));

        let needs_cameras = self.state.lock().cameras.is_empty();
        if needs_cameras {
            self.init_cameras().await;
        }
        let device = {
            let state = self.state.lock();
            state.cameras.get(state.current_index).cloned()
        };
        let Some(device) = device else {
            // init_cameras has already reported the missing camera.
            self.set_lifecycle(LifecycleState::Idle);
            return Transition::Failed;
        };

        self.open_stream(device).await
    }

    /// Open a stream on `device`, falling back once to any
    /// environment-facing camera. Expects the lifecycle to be `Starting`.
    async fn open_stream(self: &Arc<Self>, device: CameraDescriptor) -> Transition {
        let engine = &self.ports.engine;
        let config = self.decode_config;

        let first = engine
            .start(
                CameraConstraint::Device(device.id.clone()),
                config,
                self.frame_sink(),
            )
            .await;
        let outcome = match first {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(device = %device.id, "Camera start failed ({e}), retrying with environment-facing camera");
                self.release_stream().await;
                engine
                    .start(CameraConstraint::FacingEnvironment, config, self.frame_sink())
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                let torn_down = {
                    let mut state = self.state.lock();
                    if !state.torn_down {
                        state.lifecycle = LifecycleState::Running;
                    }
                    state.torn_down
                };
                if torn_down {
                    info!(device = %device.id, "Session torn down during start, releasing camera");
                    self.release_stream().await;
                    self.set_lifecycle(LifecycleState::Idle);
                    return Transition::Ignored;
                }
                self.emit(ScanEvent::LifecycleChanged(LifecycleState::Running));
                info!(device = %device.id, label = %device.label, "Scanner running");
                Transition::Applied
            }
            Err(e) => {
                error!("Scanner start failed: {e}");
                self.set_lifecycle(LifecycleState::Idle);
                let kind = match e {
                    PlatformError::NoCamera => ScanErrorKind::CameraUnavailable,
                    PlatformError::PermissionDenied => ScanErrorKind::PermissionDenied,
                    _ => ScanErrorKind::DecodeStartFailed,
                };
                self.report(kind, format!("failed to start camera: {e}"));
                Transition::Failed
            }
        }
    }

    async fn stop(&self) -> Transition {
        {
            let mut state = self.state.lock();
            if state.lifecycle != LifecycleState::Running {
                debug!(lifecycle = ?state.lifecycle, "Stop ignored");
                return Transition::Ignored;
            }
            state.lifecycle = LifecycleState::Stopping;
        }
        self.emit(ScanEvent::LifecycleChanged(LifecycleState::Stopping));

        self.release_stream().await;
        self.set_lifecycle(LifecycleState::Idle);
        info!("Scanner stopped");
        Transition::Applied
    }

    /// Stop and clear the engine. Failures are logged and swallowed so
    /// teardown always completes.
    async fn release_stream(&self) {
        if let Err(e) = self.ports.engine.stop().await {
            warn!("Failed to stop camera stream: {e}");
        }
        if let Err(e) = self.ports.engine.clear().await {
            warn!("Failed to clear scan region: {e}");
        }
    }

    async fn switch_camera(self: &Arc<Self>) -> Transition {
        let (device, was_running) = {
            let mut state = self.state.lock();
            if state.cameras.len() < 2 {
                debug!(count = state.cameras.len(), "Switch ignored: fewer than two cameras");
                return Transition::Ignored;
            }
            if state.torn_down || state.switching || state.lifecycle.is_transitioning() {
                debug!(lifecycle = ?state.lifecycle, "Switch ignored: transition in progress");
                return Transition::Ignored;
            }
            state.switching = true;
            state.current_index = (state.current_index + 1) % state.cameras.len();
            let was_running = state.lifecycle == LifecycleState::Running;
            if was_running {
                state.lifecycle = LifecycleState::Stopping;
            }
            (state.cameras[state.current_index].clone(), was_running)
        };
        info!(device = %device.id, "Switching camera");

        let result = if was_running {
            // Stopping → Starting directly: a concurrent start() must never
            // observe Idle in between.
            self.emit(ScanEvent::LifecycleChanged(LifecycleState::Stopping));
            self.release_stream().await;
            self.set_lifecycle(LifecycleState::Starting);
            self.open_stream(device).await
        } else {
            Transition::Applied
        };

        self.state.lock().switching = false;
        result
    }

    fn on_decoded(&self, text: &str) -> bool {
        let now = Instant::now();
        if !self.state.lock().dedup.accept(text, now) {
            debug!("Duplicate scan suppressed");
            return false;
        }

        match payload::decode_and_validate(text) {
            Ok(data) => {
                info!(fields = data.len(), "Scan accepted");
                self.emit(ScanEvent::ValidDecode(data));
                true
            }
            Err(e) => {
                debug!("Scan rejected: {e}");
                false
            }
        }
    }

    fn frame_sink(self: &Arc<Self>) -> FrameSink {
        let weak: Weak<Self> = Arc::downgrade(self);
        FrameSink::new(move |text| {
            if let Some(inner) = weak.upgrade() {
                inner.on_decoded(text);
            }
        })
    }
}
