//! Remote call layer: one JSON POST per call, bounded by a timeout, with
//! every outcome classified.
//!
//! `post` never panics and never leaves a caller waiting past its deadline:
//! it resolves to either the parsed JSON object or a [`RemoteError`] whose
//! [`ErrorKind`] tells the caller which message to show.
//!
//! Classification order:
//! 1. transport failure → [`ErrorKind::NetworkError`]
//! 2. deadline reached first → [`ErrorKind::Timeout`]
//! 3. non-2xx status → [`ErrorKind::HttpError`] (short body appended,
//!    plus the read failure if the body broke off)
//! 4. zero-length body → [`ErrorKind::EmptyResponse`]
//! 5. body unreadable or not a JSON object → [`ErrorKind::ParseError`]
pub mod http;
pub mod transport;

pub use http::ReqwestTransport;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

use crate::config::{ConfigError, RemoteConfig};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on how much of an HTTP error body is echoed back.
pub const DEFAULT_DIAGNOSTIC_LIMIT: usize = 1_000;

/// Failure class of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server answered with a non-2xx status.
    HttpError(u16),
    EmptyResponse,
    ParseError,
    Timeout,
    NetworkError,
}

impl ErrorKind {
    /// Stable machine-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::HttpError(_) => "http-error",
            Self::EmptyResponse => "empty-response",
            Self::ParseError => "json-parse-error",
            Self::Timeout => "timeout",
            Self::NetworkError => "network-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified remote-call failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// JSON-over-HTTP caller bound to one endpoint.
///
/// Holds no per-request state: concurrent `post`s are independent, each
/// owning its own deadline.
#[derive(Clone)]
pub struct RemoteCall {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    timeout: Duration,
    diagnostic_limit: usize,
}

impl RemoteCall {
    pub fn new(transport: Arc<dyn HttpTransport>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            diagnostic_limit: DEFAULT_DIAGNOSTIC_LIMIT,
        }
    }

    pub fn from_config(
        transport: Arc<dyn HttpTransport>,
        config: &RemoteConfig,
    ) -> Result<Self, ConfigError> {
        let endpoint = config.require_endpoint()?;
        Ok(Self::new(transport, endpoint)
            .with_timeout(config.timeout())
            .with_diagnostic_limit(config.diagnostic_limit))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `payload` with the configured deadline.
    pub async fn post(&self, payload: &Value) -> Result<Value, RemoteError> {
        self.post_with_timeout(payload, self.timeout).await
    }

    /// POST `payload`, giving up after `timeout`.
    pub async fn post_with_timeout(
        &self,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, RemoteError> {
        let request = HttpRequest::post_json(&self.endpoint, payload.to_string().into_bytes());

        // The deadline timer is owned by this future and dropped with it on
        // every path; an expired deadline drops the in-flight send.
        let outcome = tokio::time::timeout(timeout, self.transport.send(request)).await;

        let result = match outcome {
            Ok(Err(e)) => Err(RemoteError::new(
                ErrorKind::NetworkError,
                format!("failed to reach server: {e}"),
            )),
            Err(_) => Err(RemoteError::new(
                ErrorKind::Timeout,
                format!("request timed out after {}", format_timeout(timeout)),
            )),
            Ok(Ok(response)) => classify(response, self.diagnostic_limit),
        };

        if let Err(ref e) = result {
            warn!(kind = %e.kind, endpoint = %self.endpoint, "Remote call failed: {}", e.message);
        }
        result
    }

    /// Reachability probe: POST `body` as plain text and time the round trip.
    ///
    /// Any HTTP response, whatever its status, counts as reachable.
    pub async fn probe(&self, body: &str) -> Result<Duration, RemoteError> {
        let request = HttpRequest::post_text(&self.endpoint, body);
        let started = Instant::now();

        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(Ok(response)) => {
                let latency = started.elapsed();
                debug!(status = response.status, ?latency, "Probe answered");
                Ok(latency)
            }
            Ok(Err(e)) => Err(RemoteError::new(
                ErrorKind::NetworkError,
                format!("failed to reach server: {e}"),
            )),
            Err(_) => Err(RemoteError::new(
                ErrorKind::Timeout,
                format!("request timed out after {}", format_timeout(self.timeout)),
            )),
        }
    }
}

/// Classify a response that arrived before the deadline.
fn classify(response: HttpResponse, diagnostic_limit: usize) -> Result<Value, RemoteError> {
    if !response.is_success() {
        let mut message = format!("HTTP error {}", response.status);
        let text = String::from_utf8_lossy(&response.body);
        let text = text.trim();
        if !text.is_empty() {
            message.push_str(": ");
            message.push_str(&truncate_chars(text, diagnostic_limit));
        }
        if let Some(e) = &response.body_error {
            message.push_str(&format!(" (failed to read error body: {e})"));
        }
        return Err(RemoteError::new(ErrorKind::HttpError(response.status), message));
    }

    if response.content_length == Some(0) {
        return Err(empty_response());
    }
    if let Some(e) = response.body_error {
        return Err(RemoteError::new(
            ErrorKind::ParseError,
            format!("response is not valid JSON: failed to read response body: {e}"),
        ));
    }
    if response.body.is_empty() {
        return Err(empty_response());
    }

    match serde_json::from_slice::<Value>(&response.body) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(RemoteError::new(
            ErrorKind::ParseError,
            "response is not valid JSON: not a JSON object",
        )),
        Err(e) => Err(RemoteError::new(
            ErrorKind::ParseError,
            format!("response is not valid JSON: {e}"),
        )),
    }
}

fn empty_response() -> RemoteError {
    RemoteError::new(ErrorKind::EmptyResponse, "server sent an empty response")
}

/// Cut `text` to at most `limit` characters, marking the cut.
fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_owned(),
    }
}

fn format_timeout(timeout: Duration) -> String {
    let ms = timeout.as_millis();
    if ms % 1_000 == 0 {
        format!("{} seconds", ms / 1_000)
    } else {
        format!("{ms} ms")
    }
}
