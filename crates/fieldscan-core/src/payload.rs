//! QR payload decoding and validation.
//!
//! A scanned code carries base64 text wrapping a JSON envelope
//! `{"auth": "<tenant marker>", "data": {...}}`. Only the envelope is
//! checked here; field-level defaults are the consumer's business
//! (see [`crate::form::VehicleRecord`]).
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::{Map, Value};

/// Marker every genuine envelope carries in its `auth` field.
pub const TENANT_MARKER: &str = "DLHP";

/// The validated `data` object, unchanged.
pub type StructuredRecord = Map<String, Value>;

/// Standard alphabet, padding optional on input (printed codes are often
/// generated without it).
const ENVELOPE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why a scanned payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Not base64, not UTF-8, or not JSON.
    #[error("decode failed")]
    DecodeFailed,
    /// `auth` is missing or is not the tenant marker.
    #[error("bad auth")]
    BadAuth,
    /// `data` is missing, null, or not an object.
    #[error("bad shape")]
    BadShape,
    /// A link is missing one of its required query parameters.
    #[error("missing link parameter: {0}")]
    MissingParameter(&'static str),
}

/// Decode a raw scan and return its `data` object.
pub fn decode_and_validate(raw_text: &str) -> Result<StructuredRecord, ValidationError> {
    let bytes = ENVELOPE_ENGINE
        .decode(raw_text.trim())
        .map_err(|_| ValidationError::DecodeFailed)?;
    let envelope: Value =
        serde_json::from_slice(&bytes).map_err(|_| ValidationError::DecodeFailed)?;

    if envelope.get("auth").and_then(Value::as_str) != Some(TENANT_MARKER) {
        return Err(ValidationError::BadAuth);
    }

    match envelope.get("data") {
        Some(Value::Object(data)) => Ok(data.clone()),
        _ => Err(ValidationError::BadShape),
    }
}

/// Wrap `data` in an envelope and encode it the way printed codes are.
pub fn encode_envelope(data: &StructuredRecord) -> String {
    let envelope = serde_json::json!({
        "auth": TENANT_MARKER,
        "data": data,
    });
    base64::engine::general_purpose::STANDARD.encode(envelope.to_string())
}

/// Decode a record delivered as a link, e.g. `https://host/?code=B-16&data=<base64>`.
///
/// The `code` parameter must be present; `data` is validated exactly like a
/// camera scan.
pub fn decode_link(link: &str) -> Result<StructuredRecord, ValidationError> {
    let url = reqwest::Url::parse(link).map_err(|_| ValidationError::DecodeFailed)?;

    let mut has_code = false;
    let mut data = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => has_code = true,
            "data" => data = Some(value.into_owned()),
            _ => {}
        }
    }

    if !has_code {
        return Err(ValidationError::MissingParameter("code"));
    }
    let data = data.ok_or(ValidationError::MissingParameter("data"))?;

    // Form decoding turns an unescaped '+' into a space.
    decode_and_validate(&data.replace(' ', "+"))
}
