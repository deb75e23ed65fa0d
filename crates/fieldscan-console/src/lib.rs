//! fieldscan console - terminal frontend.
//!
//! The controller state machine and the keyboard-wedge scanner. Business
//! logic lives in `fieldscan-core`.
pub mod controller;
pub mod wedge;

pub use controller::{ActionError, Controller, Phase};
pub use wedge::WedgeEngine;
