//! Payload repair interceptor
//!
//! When schema validation rejects a request body, the interceptor asks the
//! completion backend to rewrite the raw payload into the target schema,
//! parses the result under the same schema check, and re-invokes the target
//! handler with the repaired value. One attempt only; any failure along the
//! way falls back to the canonical validation-error response, so the caller
//! never observes that a repair was tried.

use std::future::Future;
use std::sync::Arc;

use axum::response::Response;
use jsonschema::JSONSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::llm_client::{CompletionBackend, LlmError};
use crate::validation::{parse_conformant, ApiValidationError, ValidationFailure};

/// Instruction template for the repair call. The placeholders are filled
/// with the schema document and the raw payload text, and nothing else.
const REPAIR_PROMPT_TEMPLATE: &str = "\
Reformat the data in the request payload into the schema specified. The
schema is compatible with JSON Schema Core, JSON Schema Validation and
OpenAPI.

Output the new request payload in a JSON format. Only output the JSON by
itself.

schema:
```
{schema}
```

request payload:
```
{payload}
```
";

/// Errors inside the repair pipeline. None of these reach the caller; they
/// are logged and converted to the canonical validation-error response.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("Completion call failed: {0}")]
    Model(#[from] LlmError),

    #[error("Model output is not valid JSON: {0}")]
    MalformedOutput(String),

    #[error("Model output does not conform to the target schema: {0}")]
    NonConformant(ApiValidationError),
}

/// Best-effort repair of malformed payloads around one target schema.
///
/// Holds the injected completion backend plus the schema in both compiled
/// form (to check repaired output) and document form (to show the model).
pub struct RepairInterceptor {
    backend: Arc<dyn CompletionBackend>,
    schema: &'static JSONSchema,
    schema_text: String,
    template: &'static str,
}

impl RepairInterceptor {
    /// `schema` checks the repaired output; `schema_json` is the document
    /// rendered into the prompt. Both must describe the same shape.
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        schema: &'static JSONSchema,
        schema_json: &Value,
    ) -> Self {
        let schema_text = serde_json::to_string_pretty(schema_json)
            .unwrap_or_else(|_| schema_json.to_string());

        Self {
            backend,
            schema,
            schema_text,
            template: REPAIR_PROMPT_TEMPLATE,
        }
    }

    /// Replace the instruction template. The template must carry the
    /// `{schema}` and `{payload}` placeholders.
    pub fn with_template(mut self, template: &'static str) -> Self {
        self.template = template;
        self
    }

    /// Render the repair prompt for a raw payload. Pure substitution: the
    /// same payload always yields the same prompt.
    pub fn render_prompt(&self, raw_payload: &str) -> String {
        self.template
            .replace("{schema}", &self.schema_text)
            .replace("{payload}", raw_payload)
    }

    /// One repair attempt: prompt the backend, pull the JSON object out of
    /// its output, and parse it under the target schema check.
    pub async fn attempt_repair<T: DeserializeOwned>(
        &self,
        raw_payload: &str,
    ) -> Result<T, RepairError> {
        let prompt = self.render_prompt(raw_payload);
        let output = self.backend.complete(&prompt).await?;

        let json_text = extract_json(&output);
        let value = serde_json::from_str::<Value>(&json_text)
            .map_err(|e| RepairError::MalformedOutput(format!("{}", e)))?;

        parse_conformant(self.schema, &value).map_err(RepairError::NonConformant)
    }

    /// Handle a validation failure: repair the payload and re-invoke the
    /// explicitly passed target handler, or return the canonical
    /// validation-error response built from the original failure.
    ///
    /// The repaired value has already passed the schema check by the time
    /// the handler sees it; nothing partially repaired escapes this
    /// boundary.
    pub async fn on_validation_failure<T, H, Fut>(
        &self,
        failure: ValidationFailure,
        target_handler: H,
    ) -> Response
    where
        T: DeserializeOwned,
        H: FnOnce(T) -> Fut,
        Fut: Future<Output = Response>,
    {
        match self.attempt_repair::<T>(&failure.raw_payload).await {
            Ok(repaired) => {
                log::info!("Payload repaired, re-dispatching to target handler");
                target_handler(repaired).await
            }
            Err(err) => {
                log::warn!("Payload repair failed ({}); returning validation error", err);
                failure.to_response()
            }
        }
    }
}

/// Extract the first well-formed JSON block from model output.
///
/// The prompt asks for bare JSON, but the parser does not assume compliance:
/// json code fences, bare fences, and JSON surrounded by commentary are all
/// handled. Returns the trimmed input when nothing better is found, and the
/// subsequent parse rejects it.
pub fn extract_json(raw: &str) -> String {
    if let Some(start) = raw.find("```json") {
        let content_start = start + 7;
        if let Some(end) = raw[content_start..].find("```") {
            return raw[content_start..content_start + end].trim().to_string();
        }
    }

    if let Some(start) = raw.find("```") {
        let content_start = start + 3;
        if let Some(end) = raw[content_start..].find("```") {
            let block = raw[content_start..content_start + end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return block.to_string();
            }
        }
    }

    if let Some(start) = raw.find('{') {
        if let Some(end) = raw.rfind('}') {
            if end > start {
                return raw[start..=end].to_string();
            }
        }
    }

    raw.trim().to_string()
}
