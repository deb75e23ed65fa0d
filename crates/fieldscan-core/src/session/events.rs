//! Session events: messages sent from the scan session to its controller
//! via a crossbeam channel.
//!
//! The controller drains the channel once per tick; the session never
//! calls into UI code directly.
use crate::payload::StructuredRecord;
use crate::platform::PermissionState;
use std::fmt;

/// Lifecycle of the camera decode loop.
///
/// `Starting` and `Stopping` are transient: while either is held, new
/// start / stop / switch requests are ignored rather than queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

/// Error classes reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// Enumeration found no camera.
    CameraUnavailable,
    /// Enumeration itself failed.
    CameraEnumerationFailed,
    PermissionDenied,
    /// The permission query failed.
    PermissionCheckFailed,
    /// Neither the selected device nor the fallback constraint could be opened.
    DecodeStartFailed,
}

impl ScanErrorKind {
    /// Stable machine-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::CameraUnavailable => "camera-unavailable",
            Self::CameraEnumerationFailed => "camera-enumeration-failed",
            Self::PermissionDenied => "permission-denied",
            Self::PermissionCheckFailed => "permission-check-failed",
            Self::DecodeStartFailed => "decode-start-failed",
        }
    }
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Notifications from the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// The camera list was refreshed. The switch affordance should be shown
    /// only when `can_switch` is set.
    CamerasChanged { count: usize, can_switch: bool },
    /// The permission gate was evaluated. When `enabled` is false the
    /// controller should offer manual code entry instead.
    Gate {
        enabled: bool,
        permission: PermissionState,
    },
    LifecycleChanged(LifecycleState),
    /// An accepted, validated scan.
    ValidDecode(StructuredRecord),
    Error { kind: ScanErrorKind, message: String },
}
