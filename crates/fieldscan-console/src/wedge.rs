//! Keyboard-wedge decode engine.
//!
//! Hand-held barcode scanners usually present themselves as a keyboard:
//! each decoded code arrives as a line of typed text. The wedge plays all
//! three platform roles for such a device. It lists one pseudo camera,
//! always reports the permission as granted, and its "stream" is a
//! background thread forwarding submitted lines to the session's
//! [`FrameSink`] while open.
//!
//! # Cancellation
//!
//! `stop` raises the worker's cancel flag. The thread polls it every
//! 200 ms between line waits, and `stop` joins it before returning, so a
//! stream is always fully closed before the next one can open.
use async_trait::async_trait;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use fieldscan_core::platform::{
    CameraConstraint, CameraDescriptor, CameraDevices, DecodeConfig, DecodeEngine, FrameSink,
    PermissionProbe, PermissionState, PlatformError,
};
use fieldscan_core::session::SessionPorts;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifier of the single pseudo camera.
pub const WEDGE_DEVICE_ID: &str = "keyboard-wedge";

/// How often the worker checks its cancel flag while waiting for a line.
const CANCEL_POLL: Duration = Duration::from_millis(200);

struct Worker {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Decode engine fed by lines of text.
pub struct WedgeEngine {
    lines: Receiver<String>,
    worker: Mutex<Option<Worker>>,
}

impl WedgeEngine {
    /// `lines` carries whatever the scanner types, one code per line.
    pub fn new(lines: Receiver<String>) -> Self {
        Self {
            lines,
            worker: Mutex::new(None),
        }
    }

    /// Whether a stream is currently open.
    pub fn is_open(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Session ports backed by this engine.
    pub fn ports(self: &Arc<Self>) -> SessionPorts {
        SessionPorts {
            devices: self.clone(),
            permissions: self.clone(),
            engine: self.clone(),
        }
    }
}

#[async_trait]
impl CameraDevices for WedgeEngine {
    async fn enumerate(&self) -> Result<Vec<CameraDescriptor>, PlatformError> {
        Ok(vec![CameraDescriptor::new(WEDGE_DEVICE_ID, "Keyboard wedge scanner")])
    }
}

#[async_trait]
impl PermissionProbe for WedgeEngine {
    async fn query(&self) -> Result<PermissionState, PlatformError> {
        Ok(PermissionState::Granted)
    }
}

#[async_trait]
impl DecodeEngine for WedgeEngine {
    async fn start(
        &self,
        constraint: CameraConstraint,
        _config: DecodeConfig,
        sink: FrameSink,
    ) -> Result<(), PlatformError> {
        if let CameraConstraint::Device(id) = &constraint {
            if id != WEDGE_DEVICE_ID {
                return Err(PlatformError::ConstraintUnsatisfiable(format!(
                    "unknown device {id}"
                )));
            }
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(PlatformError::DeviceBusy("wedge stream already open".into()));
        }

        // Lines typed while no stream was open are stale.
        let stale = self.lines.try_iter().count();
        if stale > 0 {
            debug!(stale, "Discarded lines typed while the scanner was closed");
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_clone = Arc::clone(&cancel);
        let lines = self.lines.clone();
        let thread = std::thread::Builder::new()
            .name("fieldscan-wedge".to_owned())
            .spawn(move || run_wedge(lines, cancel_clone, sink))
            .map_err(|e| PlatformError::Backend(format!("failed to spawn wedge thread: {e}")))?;

        *worker = Some(Worker { cancel, thread });
        info!("Wedge stream opened");
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        worker.cancel.store(true, Ordering::Relaxed);

        let joined = tokio::task::spawn_blocking(move || worker.thread.join()).await;
        match joined {
            Ok(Ok(())) => {
                debug!("Wedge stream closed");
                Ok(())
            }
            Ok(Err(_)) => Err(PlatformError::Backend("wedge thread panicked".into())),
            Err(e) => Err(PlatformError::Backend(format!("failed to join wedge thread: {e}"))),
        }
    }

    async fn clear(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

impl Drop for WedgeEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.store(true, Ordering::Relaxed);
        }
    }
}

// ─── Background thread ──────────────────────────────────────────────────────

fn run_wedge(lines: Receiver<String>, cancel: Arc<AtomicBool>, sink: FrameSink) {
    debug!("Wedge: waiting for input");
    while !cancel.load(Ordering::Relaxed) {
        match lines.recv_timeout(CANCEL_POLL) {
            Ok(line) => {
                let text = line.trim();
                if !text.is_empty() {
                    sink.deliver(text);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Wedge: input closed");
                break;
            }
        }
    }
    debug!("Wedge: exiting");
}
