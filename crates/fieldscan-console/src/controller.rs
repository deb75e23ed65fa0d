//! Console controller: the terminal counterpart of the scan, code-entry
//! and review views.
//!
//! Centralises all mutable state the REPL reads and writes. The scan
//! session talks back through its event channel; state updates from it
//! happen in `process_scan_events()`, which the REPL calls once per tick.
use chrono::Local;
use fieldscan_core::backend::{Backend, BackendError};
use fieldscan_core::config::ScannerConfig;
use fieldscan_core::form::{
    compose_code, parse_quantity, Check, Checklist, FormError, TransactionRow, VehicleRecord,
};
use fieldscan_core::payload::{self, StructuredRecord, ValidationError};
use fieldscan_core::platform::PermissionState;
use fieldscan_core::session::{
    LifecycleState, ScanEvent, ScanSession, SessionPorts, Transition,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of session events drained per tick.
///
/// Keeps a backlog (e.g. a wedge scanner flooding repeats) from stalling
/// the prompt.
pub const MAX_EVENTS_PER_TICK: usize = 300;

/// Maximum retained operator notices. Oldest are dropped first.
pub const MAX_NOTICES: usize = 100;

/// The view the operator is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Home,
    Scan,
    Code,
    Review,
    /// A submission finished, successfully or not.
    Done { ok: bool, message: String },
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Home => "home",
            Phase::Scan => "scan",
            Phase::Code => "code",
            Phase::Review => "review",
            Phase::Done { .. } => "done",
        }
    }
}

/// An operator action that could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("invalid link: {0}")]
    Link(#[from] ValidationError),
    #[error("remote endpoint is not configured")]
    NotConfigured,
    #[error("not available on the {0} view")]
    WrongPhase(&'static str),
}

/// All controller state.
pub struct Controller {
    // ── Navigation ─────────────────────────────────────
    pub phase: Phase,

    // ── Scan ───────────────────────────────────────────
    ports: SessionPorts,
    scanner: ScannerConfig,
    session: Option<ScanSession>,
    pub lifecycle: LifecycleState,
    /// Result of the latest permission gate.
    pub scan_enabled: bool,
    pub permission: PermissionState,
    pub camera_count: usize,
    /// Whether the switch-camera affordance is shown.
    pub can_switch: bool,
    /// Set by `process_scan_events`, consumed by `tick`.
    decoded: Option<StructuredRecord>,
    gate_changed: bool,

    // ── Review ─────────────────────────────────────────
    pub record: Option<StructuredRecord>,
    pub vehicle: VehicleRecord,
    pub checklist: Checklist,
    pub quantity: String,

    // ── Remote ─────────────────────────────────────────
    backend: Option<Backend>,
    pub latency: Option<Duration>,
    /// Number of times a failed submission was re-sent.
    pub resend_count: u32,
    /// True once the operator has re-sent at least once.
    pub report_available: bool,

    pub notices: Vec<String>,
}

impl Controller {
    /// `backend` is `None` when no endpoint is configured; scanning still
    /// works, lookups and submissions fail with [`ActionError::NotConfigured`].
    pub fn new(ports: SessionPorts, scanner: ScannerConfig, backend: Option<Backend>) -> Self {
        Self {
            phase: Phase::Home,
            ports,
            scanner,
            session: None,
            lifecycle: LifecycleState::Idle,
            scan_enabled: false,
            permission: PermissionState::Unknown,
            camera_count: 0,
            can_switch: false,
            decoded: None,
            gate_changed: false,
            record: None,
            vehicle: VehicleRecord::default(),
            checklist: Checklist::new(),
            quantity: String::new(),
            backend,
            latency: None,
            resend_count: 0,
            report_available: false,
            notices: Vec::new(),
        }
    }

    /// Whether a scan session is alive (the scan view is open).
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    // ── Navigation ─────────────────────────────────────

    /// Open the scan view and run a fresh session.
    pub async fn enter_scan(&mut self) {
        if self.phase == Phase::Scan && self.session.is_some() {
            return;
        }
        self.reset_form();
        self.phase = Phase::Scan;

        let session = ScanSession::new(self.ports.clone(), &self.scanner);
        let enabled = session.run().await;
        info!(enabled, "Scan view opened");
        self.session = Some(session);

        self.process_scan_events();
        // The initial gate was acted on by run() itself.
        self.gate_changed = false;
    }

    /// Open manual code entry.
    pub async fn enter_code(&mut self) {
        self.leave_scan().await;
        self.reset_form();
        self.phase = Phase::Code;
    }

    pub async fn go_home(&mut self) {
        self.leave_scan().await;
        self.reset_form();
        self.phase = Phase::Home;
    }

    /// Tear the scan session down, if any. Events still queued are dropped.
    pub async fn leave_scan(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown().await;
            self.lifecycle = LifecycleState::Idle;
            self.decoded = None;
            self.gate_changed = false;
        }
    }

    // ── Scan ───────────────────────────────────────────

    /// Drain pending session events. Called once per tick.
    ///
    /// Returns `true` if anything changed.
    pub fn process_scan_events(&mut self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };

        let events: Vec<ScanEvent> = session
            .events()
            .try_iter()
            .take(MAX_EVENTS_PER_TICK)
            .collect();
        let changed = !events.is_empty();

        for event in events {
            match event {
                ScanEvent::CamerasChanged { count, can_switch } => {
                    self.camera_count = count;
                    self.can_switch = can_switch;
                }
                ScanEvent::Gate {
                    enabled,
                    permission,
                } => {
                    if enabled != self.scan_enabled {
                        self.gate_changed = true;
                    }
                    self.scan_enabled = enabled;
                    self.permission = permission;
                }
                ScanEvent::LifecycleChanged(state) => {
                    self.lifecycle = state;
                }
                ScanEvent::ValidDecode(data) => {
                    // Only the first decode of a tick is used; the view is
                    // about to close.
                    if self.decoded.is_none() {
                        self.decoded = Some(data);
                    }
                }
                ScanEvent::Error { kind, message } => {
                    warn!(kind = kind.label(), "{message}");
                    self.notice(message);
                }
            }
        }
        changed
    }

    /// One REPL tick: drain events, then act on them.
    ///
    /// A valid decode closes the scan view and opens the review. A gate
    /// change starts or stops the stream to match.
    pub async fn tick(&mut self) -> bool {
        let changed = self.process_scan_events();

        if let Some(data) = self.decoded.take() {
            self.leave_scan().await;
            self.show_record(data);
            return true;
        }

        if self.gate_changed {
            self.gate_changed = false;
            if let Some(session) = &self.session {
                let transition = if self.scan_enabled && self.lifecycle == LifecycleState::Idle {
                    session.start().await
                } else if !self.scan_enabled && self.lifecycle == LifecycleState::Running {
                    session.stop().await
                } else {
                    Transition::Ignored
                };
                debug!(?transition, enabled = self.scan_enabled, "Gate change handled");
                self.process_scan_events();
            }
        }
        changed
    }

    /// Start or stop the stream.
    pub async fn toggle_scan(&mut self) -> Result<Transition, ActionError> {
        let session = self
            .session
            .as_ref()
            .ok_or(ActionError::WrongPhase(self.phase.label()))?;
        let transition = match session.lifecycle() {
            LifecycleState::Running => session.stop().await,
            LifecycleState::Idle if self.scan_enabled => session.start().await,
            _ => Transition::Ignored,
        };
        self.process_scan_events();
        Ok(transition)
    }

    pub async fn switch_camera(&mut self) -> Result<Transition, ActionError> {
        let session = self
            .session
            .as_ref()
            .ok_or(ActionError::WrongPhase(self.phase.label()))?;
        let transition = session.switch_camera().await;
        self.process_scan_events();
        Ok(transition)
    }

    // ── Record sources ─────────────────────────────────

    /// Look up a manually entered code and open its review.
    pub async fn submit_code(&mut self, boxes: [&str; 4]) -> Result<(), ActionError> {
        if self.phase != Phase::Code {
            return Err(ActionError::WrongPhase(self.phase.label()));
        }
        let code = compose_code(boxes)?;
        let record = self.backend()?.lookup_code(&code).await?;
        self.show_record(record);
        Ok(())
    }

    /// Open the review for a record carried in a link.
    pub async fn open_link(&mut self, link: &str) -> Result<(), ActionError> {
        let record = payload::decode_link(link)?;
        self.leave_scan().await;
        self.show_record(record);
        Ok(())
    }

    fn show_record(&mut self, record: StructuredRecord) {
        self.reset_form();
        self.vehicle = VehicleRecord::from_record(&record);
        info!(fleet_number = %self.vehicle.fleet_number, "Record opened for review");
        self.record = Some(record);
        self.phase = Phase::Review;
    }

    // ── Review ─────────────────────────────────────────

    pub fn answer(&mut self, check: Check, yes: bool) -> Result<(), ActionError> {
        if self.phase != Phase::Review {
            return Err(ActionError::WrongPhase(self.phase.label()));
        }
        self.checklist.set(check, yes);
        Ok(())
    }

    /// Record the quantity input. Returns the value it parses to.
    pub fn set_quantity(&mut self, input: &str) -> Result<u16, ActionError> {
        if self.phase != Phase::Review {
            return Err(ActionError::WrongPhase(self.phase.label()));
        }
        self.quantity = input.to_owned();
        Ok(parse_quantity(input)?)
    }

    /// Submit the reviewed record. The outcome lands in [`Phase::Done`].
    ///
    /// Form errors leave the review open and are returned.
    pub async fn submit(&mut self) -> Result<(), ActionError> {
        if self.phase != Phase::Review {
            return Err(ActionError::WrongPhase(self.phase.label()));
        }
        self.send_row().await
    }

    /// Re-send after a failed submission.
    pub async fn resend(&mut self) -> Result<(), ActionError> {
        if !matches!(self.phase, Phase::Done { ok: false, .. }) {
            return Err(ActionError::WrongPhase(self.phase.label()));
        }
        self.resend_count += 1;
        self.report_available = self.resend_count >= 1;
        info!(attempt = self.resend_count, "Re-sending submission");
        self.send_row().await
    }

    async fn send_row(&mut self) -> Result<(), ActionError> {
        self.checklist.ensure_complete()?;
        let quantity = parse_quantity(&self.quantity)?;
        let backend = self.backend()?.clone();

        let now = Local::now();
        let row = TransactionRow::build(
            now.timestamp_millis(),
            now.naive_local(),
            &self.checklist,
            &self.vehicle,
            quantity,
        );

        self.phase = match backend.submit_row(&row).await {
            Ok(ack) => Phase::Done {
                ok: true,
                message: ack.message.unwrap_or_else(|| {
                    format!(
                        "record {} saved",
                        self.vehicle.fleet_number.to_uppercase()
                    )
                }),
            },
            Err(e) => {
                self.notice(e.to_string());
                Phase::Done {
                    ok: false,
                    message: e.to_string(),
                }
            }
        };
        Ok(())
    }

    // ── Remote ─────────────────────────────────────────

    /// Measure backend latency. Clears the stored latency on failure.
    pub async fn ping(&mut self) -> Result<Duration, ActionError> {
        let backend = self.backend()?.clone();
        match backend.ping().await {
            Ok(latency) => {
                self.latency = Some(latency);
                Ok(latency)
            }
            Err(e) => {
                self.latency = None;
                Err(e.into())
            }
        }
    }

    fn backend(&self) -> Result<&Backend, ActionError> {
        self.backend.as_ref().ok_or(ActionError::NotConfigured)
    }

    /// Hand pending notices to the caller for display.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    // ── Helpers ────────────────────────────────────────

    fn reset_form(&mut self) {
        self.record = None;
        self.vehicle = VehicleRecord::default();
        self.checklist.clear();
        self.quantity.clear();
        self.resend_count = 0;
        self.report_available = false;
    }

    fn notice(&mut self, text: String) {
        if self.notices.len() >= MAX_NOTICES {
            self.notices.remove(0);
        }
        self.notices.push(text);
    }
}
