//! HTTP transport port.
//!
//! `RemoteCall` only needs "send these bytes, give me status + body". The
//! production implementation is [`super::http::ReqwestTransport`]; tests
//! substitute scripted transports. Cancellation is by drop: the caller
//! abandons the `send` future when its deadline fires.
use async_trait::async_trait;

/// One outgoing POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// A POST carrying a JSON document.
    pub fn post_json(url: &str, body: Vec<u8>) -> Self {
        Self {
            url: url.to_owned(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body,
        }
    }

    /// A POST carrying plain text with no content type.
    pub fn post_text(url: &str, body: &str) -> Self {
        Self {
            url: url.to_owned(),
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }
}

/// A response whose status line and headers arrived.
///
/// `body` holds whatever was read. When reading the body broke part-way,
/// `body_error` says why and `body` keeps the bytes received before that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Value of the `Content-Length` header, when the server sent one.
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
    pub body_error: Option<String>,
}

impl HttpResponse {
    /// A complete response with `Content-Length` matching `body`.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status,
            content_length: Some(body.len() as u64),
            body,
            body_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The server could not be reached, or the exchange broke before a status
/// line arrived (DNS, TLS, connection reset).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
