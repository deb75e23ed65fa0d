//! Decode engine port.
//!
//! The engine owns the actual camera stream and the frame-by-frame code
//! recogniser. It reports every recognised code through a [`FrameSink`];
//! duplicate suppression and validation happen on the session side.
use super::PlatformError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Which camera the engine should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraConstraint {
    /// An exact device from [`super::CameraDevices::enumerate`].
    Device(String),
    /// Any rear / environment-facing camera. Used as the fallback when the
    /// exact device cannot be opened.
    FacingEnvironment,
}

/// Region of the frame the recogniser looks at, in CSS-style pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub width: u32,
    pub height: u32,
}

/// Engine settings passed on every `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeConfig {
    /// Target frames per second for the recogniser.
    pub fps: u32,
    pub region: CaptureRegion,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            region: CaptureRegion {
                width: 300,
                height: 500,
            },
        }
    }
}

/// Callback handle the engine uses to report decoded text.
///
/// Cheap to clone. Delivery after the owning session is gone is a no-op.
#[derive(Clone)]
pub struct FrameSink {
    deliver: Arc<dyn Fn(&str) + Send + Sync>,
}

impl FrameSink {
    pub fn new(deliver: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Report one recognised code. Engines call this serially.
    pub fn deliver(&self, text: &str) {
        (self.deliver)(text);
    }
}

impl fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSink").finish_non_exhaustive()
    }
}

/// Host decode engine: opens one camera stream at a time.
///
/// `stop` releases the stream and camera handle, `clear` resets any
/// rendering surface the engine owns. Both are called on every teardown;
/// their failures are logged and ignored by the session.
#[async_trait]
pub trait DecodeEngine: Send + Sync {
    async fn start(
        &self,
        constraint: CameraConstraint,
        config: DecodeConfig,
        sink: FrameSink,
    ) -> Result<(), PlatformError>;

    async fn stop(&self) -> Result<(), PlatformError>;

    async fn clear(&self) -> Result<(), PlatformError>;
}
