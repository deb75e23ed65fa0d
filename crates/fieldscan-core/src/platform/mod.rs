//! Platform ports - camera enumeration, permission queries, and the
//! decode engine.
//!
//! The session never touches hardware directly; the host (browser shim,
//! native capture layer, keyboard wedge) implements these traits.

pub mod cameras;
pub mod engine;
pub mod permissions;

pub use cameras::{CameraDescriptor, CameraDevices};
pub use engine::{CameraConstraint, CaptureRegion, DecodeConfig, DecodeEngine, FrameSink};
pub use permissions::{PermissionProbe, PermissionState};

/// Failure reported by a platform primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// No camera device is present.
    #[error("no camera found")]
    NoCamera,
    /// The user or the platform refused camera access.
    #[error("camera permission denied")]
    PermissionDenied,
    /// The device is held by another process or could not be read.
    #[error("camera busy or unreadable: {0}")]
    DeviceBusy(String),
    /// No device satisfies the requested constraint.
    #[error("camera constraint cannot be satisfied: {0}")]
    ConstraintUnsatisfiable(String),
    /// Anything else the backend reports.
    #[error("{0}")]
    Backend(String),
}
