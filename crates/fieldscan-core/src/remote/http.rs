//! `reqwest`-backed transport.
use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Connection establishment limit. The overall request deadline is
/// enforced by `RemoteCall`, not here.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Most bytes of a non-2xx body read for diagnostics. The rest is left
/// unread.
const ERROR_BODY_LIMIT: usize = 16 * 1024;

/// Production transport over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError(describe(&e)))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let limit = (!response.status().is_success()).then_some(ERROR_BODY_LIMIT);
        let (body, body_error) = read_body(&mut response, limit).await;

        match &body_error {
            Some(e) => debug!(status, bytes = body.len(), url = %request.url, "Response body read failed: {e}"),
            None => debug!(status, bytes = body.len(), url = %request.url, "HTTP exchange complete"),
        }

        Ok(HttpResponse {
            status,
            content_length,
            body,
            body_error,
        })
    }
}

/// Read the body chunk by chunk, stopping at `limit` bytes when given.
/// A read failure keeps the bytes received so far.
async fn read_body(
    response: &mut reqwest::Response,
    limit: Option<usize>,
) -> (Vec<u8>, Option<String>) {
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                body.extend_from_slice(&chunk);
                if let Some(limit) = limit {
                    if body.len() >= limit {
                        body.truncate(limit);
                        return (body, None);
                    }
                }
            }
            Ok(None) => return (body, None),
            Err(e) => return (body, Some(describe(&e))),
        }
    }
}

/// Flatten a reqwest error and its sources into one line.
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
