//! Sum Service Input Validation
//!
//! Schema validation for the sum endpoint. The dispatcher validates each raw
//! request body against the target schema before the typed handler runs; on
//! failure the unparsed body is preserved verbatim so the repair path can
//! work with the original text.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Maximum request payload size (64KB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

lazy_static::lazy_static! {
    /// JSON Schema document for the sum request. Also rendered into the
    /// repair prompt, so it is kept as a plain value alongside the compiled
    /// form.
    pub static ref SUM_REQUEST_SCHEMA_JSON: Value = json!({
        "type": "object",
        "required": ["numbers"],
        "properties": {
            "numbers": {
                "type": "array",
                "items": {
                    "type": "number"
                }
            }
        },
        "additionalProperties": false
    });

    /// Compiled schema for sum request validation
    pub static ref SUM_REQUEST_SCHEMA: JSONSchema = {
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&SUM_REQUEST_SCHEMA_JSON)
            .expect("Invalid schema")
    };
}

/// Typed form of the sum request
#[derive(Debug, Deserialize)]
pub struct SumRequest {
    pub numbers: Vec<f64>,
}

/// Sum response body (JSON)
#[derive(Debug, Serialize)]
pub struct SumResponse {
    pub sum: f64,
}

/// Error response for validation failures
#[derive(Debug, serde::Serialize)]
pub struct ValidationErrorResponse {
    pub error: String,
    pub code: u16,
    pub details: Option<Vec<String>>,
}

/// Validation error for API requests
#[derive(Debug, thiserror::Error)]
pub enum ApiValidationError {
    #[error("Invalid request format: {0}")]
    InvalidFormat(String),

    #[error("Content type must be {0}")]
    ContentType(String),

    #[error("Request payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Schema validation error: {0}")]
    Schema(String),
}

impl ApiValidationError {
    /// Convert to HTTP status code and error response
    pub fn to_response(&self) -> (StatusCode, Json<ValidationErrorResponse>) {
        let (status, code) = match self {
            Self::InvalidFormat(_) => (StatusCode::BAD_REQUEST, 400),
            Self::ContentType(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, 415),
            Self::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, 413),
            Self::Schema(_) => (StatusCode::BAD_REQUEST, 400),
        };

        (
            status,
            Json(ValidationErrorResponse {
                error: self.to_string(),
                code,
                details: None,
            }),
        )
    }
}

/// A rejected request body, carrying the original raw payload for recovery.
///
/// The body text is kept exactly as received, not the partially parsed
/// result, so the repair prompt sees what the client actually sent.
#[derive(Debug)]
pub struct ValidationFailure {
    pub raw_payload: String,
    pub detail: ApiValidationError,
}

impl ValidationFailure {
    fn new(raw_payload: &str, detail: ApiValidationError) -> Self {
        Self {
            raw_payload: raw_payload.to_string(),
            detail,
        }
    }

    /// The canonical validation-error response for this failure. This is
    /// what the caller sees whether or not a repair was attempted.
    pub fn to_response(&self) -> Response {
        let (status, body) = self.detail.to_response();
        (status, body).into_response()
    }
}

/// Validate the Content-Type header
pub fn validate_content_type(
    headers: &HeaderMap,
    expected: &str,
) -> Result<(), ApiValidationError> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !content_type.starts_with(expected) {
        return Err(ApiValidationError::ContentType(format!(
            "Expected content type '{}', got '{}'",
            expected, content_type
        )));
    }

    Ok(())
}

/// Validate a raw request body against the sum request schema.
///
/// Returns the typed request on success, or a `ValidationFailure` holding
/// the verbatim body and the error detail.
pub fn validate_payload(raw: &str) -> Result<SumRequest, ValidationFailure> {
    if raw.len() > MAX_PAYLOAD_SIZE {
        return Err(ValidationFailure::new(
            raw,
            ApiValidationError::PayloadTooLarge(format!(
                "Payload size ({} bytes) exceeds maximum allowed size ({} bytes)",
                raw.len(),
                MAX_PAYLOAD_SIZE
            )),
        ));
    }

    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(e) => {
            return Err(ValidationFailure::new(
                raw,
                ApiValidationError::InvalidFormat(format!("Invalid JSON: {}", e)),
            ));
        }
    };

    parse_conformant(&SUM_REQUEST_SCHEMA, &value)
        .map_err(|detail| ValidationFailure::new(raw, detail))
}

/// Parse a JSON value into a typed request, accepting only values that pass
/// the schema check. Used for incoming payloads and for repaired model
/// output alike, so nothing non-conformant ever reaches a handler.
pub fn parse_conformant<T: DeserializeOwned>(
    schema: &JSONSchema,
    value: &Value,
) -> Result<T, ApiValidationError> {
    let validation = schema.validate(value);
    if let Err(errors) = validation {
        let error_details: Vec<String> = errors
            .map(|err| format!("{:?} at {}", err.kind, err.instance_path))
            .collect();

        return Err(ApiValidationError::Schema(if error_details.is_empty() {
            "Schema validation failed".to_string()
        } else {
            error_details.join("; ")
        }));
    }

    serde_json::from_value(value.clone())
        .map_err(|e| ApiValidationError::Schema(format!("Typed parse failed: {}", e)))
}

/// Generate middleware config for payload limits
pub fn payload_limit_config() -> tower_http::limit::RequestBodyLimitLayer {
    tower_http::limit::RequestBodyLimitLayer::new(MAX_PAYLOAD_SIZE)
}
