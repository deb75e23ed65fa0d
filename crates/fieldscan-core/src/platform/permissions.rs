//! Camera permission checks.
//!
//! The host answers with one of the permission states below. Querying must
//! never touch camera hardware, so it is safe to call on every poll tick.
use super::PlatformError;
use async_trait::async_trait;

/// Camera permission as last observed by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    /// Not queried yet, or the last query failed.
    #[default]
    Unknown,
    /// The host will ask the user on the next stream open.
    Prompt,
    Granted,
    Denied,
    /// The host has no permission API at all.
    Unsupported,
}

impl PermissionState {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Prompt => "prompt",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Unsupported => "unsupported",
        }
    }

    /// Whether the gate may enable scanning under this state. Only an
    /// explicit grant does.
    pub fn allows_scanning(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Host primitive that reports the current camera permission.
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    async fn query(&self) -> Result<PermissionState, PlatformError>;
}
