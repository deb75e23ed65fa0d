//! Typed backend operations over [`RemoteCall`].
//!
//! The backend is a single endpoint dispatching on a `type` field. Every
//! reply is a JSON object `{confirm, status?, msg?, data?}`; `confirm:
//! false` is an application-level rejection, distinct from the transport
//! and parsing failures `RemoteCall` already classifies.
use crate::form::TransactionRow;
use crate::payload::StructuredRecord;
use crate::remote::{RemoteCall, RemoteError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

/// Body of the reachability probe.
pub const PING_BODY: &str = "tesPing";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The backend answered `confirm: false`.
    #[error("{0}")]
    Rejected(String),
    /// The reply object does not have the expected fields.
    #[error("malformed reply: {0}")]
    Malformed(String),
    /// A confirmed lookup without a `data` object.
    #[error("reply carries no record")]
    MissingData,
}

/// Positive acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    confirm: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl Reply {
    fn parse(value: Value) -> Result<Self, BackendError> {
        let reply: Reply =
            serde_json::from_value(value).map_err(|e| BackendError::Malformed(e.to_string()))?;
        if reply.confirm {
            Ok(reply)
        } else {
            Err(BackendError::Rejected(reply.rejection_message()))
        }
    }

    fn rejection_message(&self) -> String {
        match (self.status.as_deref(), self.msg.as_deref()) {
            (Some(status), Some(msg)) => format!("{status}: {msg}"),
            (Some(only), None) | (None, Some(only)) => only.to_owned(),
            (None, None) => "request rejected".to_owned(),
        }
    }
}

/// Client for the field-operations backend.
#[derive(Clone)]
pub struct Backend {
    remote: RemoteCall,
}

impl Backend {
    pub fn new(remote: RemoteCall) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &RemoteCall {
        &self.remote
    }

    /// Look up the record for a manually entered code.
    pub async fn lookup_code(&self, code: &str) -> Result<StructuredRecord, BackendError> {
        let value = self
            .remote
            .post(&json!({ "type": "getDriver", "code": code }))
            .await?;
        match Reply::parse(value)?.data {
            Some(Value::Object(record)) => {
                info!(code, "Code lookup succeeded");
                Ok(record)
            }
            _ => Err(BackendError::MissingData),
        }
    }

    /// Append a transaction row.
    pub async fn submit_row(&self, row: &TransactionRow) -> Result<Ack, BackendError> {
        let value = self
            .remote
            .post(&json!({ "type": "addData", "data": row.to_json() }))
            .await?;
        let reply = Reply::parse(value)?;
        info!(transaction = %row.columns()[0], "Transaction submitted");
        Ok(Ack { message: reply.msg })
    }

    /// Round-trip latency to the backend.
    pub async fn ping(&self) -> Result<Duration, BackendError> {
        Ok(self.remote.probe(PING_BODY).await?)
    }
}
