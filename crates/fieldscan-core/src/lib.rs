//! Fieldscan Core - scan session, remote calls, and form model.
//!
//! This crate contains all business logic with zero UI dependencies.
//! Frontends (the terminal console, a future GUI) only talk to it through
//! the session event channel and the backend client.
//!
//! # Modules
//!
//! - [`session`] - Camera scan lifecycle, duplicate suppression, permission polling.
//! - [`remote`] - Single-request JSON POST with timeout and outcome classification.
//! - [`payload`] - Base64 QR envelope decoding and validation.
//! - [`platform`] - Ports for camera enumeration, permission query, and the decode engine.
//! - [`form`] - Manual code entry, checklist, quantity, and transaction rows.
//! - [`backend`] - Typed backend operations on top of [`remote`].
//! - [`config`] - TOML configuration with defaults.

pub mod backend;
pub mod config;
pub mod form;
pub mod payload;
pub mod platform;
pub mod remote;
pub mod session;
