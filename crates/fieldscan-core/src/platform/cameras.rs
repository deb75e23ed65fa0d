//! Camera enumeration.
//!
//! Lists the video input devices the host exposes, in the order the host
//! reports them. The session cycles through this list when switching.
use super::PlatformError;
use async_trait::async_trait;

/// A single camera device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    /// Opaque device identifier, passed back verbatim in [`super::CameraConstraint::Device`].
    pub id: String,
    /// Human-readable label (may be empty before permission is granted).
    pub label: String,
}

impl CameraDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Host primitive that lists camera devices.
#[async_trait]
pub trait CameraDevices: Send + Sync {
    /// Enumerate the available cameras.
    ///
    /// An empty list is a valid answer (no camera attached); `Err` is reserved
    /// for enumeration itself failing.
    async fn enumerate(&self) -> Result<Vec<CameraDescriptor>, PlatformError>;
}
