//! Duplicate-scan suppression.
//!
//! Decode engines report the same code on every frame it stays in view.
//! An identical payload inside the window is dropped without touching the
//! stored timestamp, so a code held in front of the camera is accepted
//! once per window rather than once per frame.
use std::time::Duration;
use tokio::time::Instant;

/// The most recently accepted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastScan {
    pub payload: String,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct DuplicateFilter {
    window: Duration,
    last: Option<LastScan>,
}

impl DuplicateFilter {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns `true` and records the payload unless it repeats the last
    /// accepted payload within the window.
    pub fn accept(&mut self, payload: &str, now: Instant) -> bool {
        if let Some(last) = &self.last {
            if last.payload == payload && now.saturating_duration_since(last.at) < self.window {
                return false;
            }
        }
        self.last = Some(LastScan {
            payload: payload.to_owned(),
            at: now,
        });
        true
    }

    pub fn last(&self) -> Option<&LastScan> {
        self.last.as_ref()
    }
}
