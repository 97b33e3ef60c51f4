// sum-service-rs/src/llm_client.rs
//
// HTTP client for the language-model completion service (OpenAI-compatible API)
//
// Configuration (.env file):
// - LLM_API_KEY: API key for the LLM provider
// - LLM_API_URL: API endpoint URL (defaults to OpenAI compatible endpoint)
// - LLM_MODEL: Model to use (e.g. "gpt-3.5-turbo", "anthropic/claude-3.5-sonnet")
// - LLM_TIMEOUT_SECS: Deadline for a single completion call (default: 30)
// - LLM_MAX_TOKENS: Output token cap per completion (default: 256)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// Errors from the completion backend, classified by origin
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String), // 400, 401, 403, 404

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String), // 429

    #[error("Server error: {0}")]
    ServerError(String), // 500, 502, 503, 504

    #[error("Network error: {0}")]
    NetworkError(String), // connection failures and timeouts

    #[error("Parse error: {0}")]
    ParseError(String), // malformed completion response

    #[error("Unknown error: {0}")]
    UnknownError(String),
}

/// A single-turn text completion capability.
///
/// The service holds the backend behind this trait so tests can substitute
/// a scripted implementation for the real HTTP client.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send one prompt, with no conversation history, and return the
    /// generated text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    /// Creates a new LlmClient instance with configuration from environment
    /// variables.
    ///
    /// Reads:
    /// - LLM_API_URL: The API endpoint URL (defaults to OpenAI chat completions)
    /// - LLM_MODEL: The model to use (defaults to "gpt-3.5-turbo")
    /// - LLM_API_KEY: Bearer token for the provider
    /// - LLM_TIMEOUT_SECS: Per-call deadline in seconds (default: 30)
    /// - LLM_MAX_TOKENS: Output token cap (default: 256)
    pub fn from_env() -> Self {
        let api_url = env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let api_key = env::var("LLM_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            log::warn!("LLM_API_KEY is not set; repair calls will fail and fall back");
        }

        let timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let max_tokens = env::var("LLM_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        log::info!(
            "LLM client initialized (endpoint: {}, model: {}, timeout: {}s)",
            api_url,
            model,
            timeout_secs
        );

        Self {
            client,
            api_url,
            api_key,
            model,
            // Reformatting task, not prose generation
            temperature: 0.0,
            max_tokens,
        }
    }

    // Execute a single request attempt
    async fn execute_request(
        &self,
        request_body: &ChatCompletionRequest,
    ) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::InvalidRequest("API key is not set".to_string()));
        }

        // Send the HTTP request; the client-level timeout bounds the wait
        let response = match self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                if err.is_timeout() {
                    return Err(LlmError::NetworkError(format!(
                        "Request timed out: {}",
                        err
                    )));
                } else if err.is_connect() {
                    return Err(LlmError::NetworkError(format!(
                        "Connection failed: {}",
                        err
                    )));
                } else {
                    return Err(LlmError::NetworkError(format!("Network error: {}", err)));
                }
            }
        };

        // Handle HTTP status codes
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();

            return match status.as_u16() {
                400 => Err(LlmError::InvalidRequest(format!("Bad request: {}", text))),
                401 => Err(LlmError::InvalidRequest(format!("Unauthorized: {}", text))),
                403 => Err(LlmError::InvalidRequest(format!("Forbidden: {}", text))),
                404 => Err(LlmError::InvalidRequest(format!("Not found: {}", text))),
                429 => Err(LlmError::RateLimitExceeded(format!(
                    "Rate limit exceeded: {}",
                    text
                ))),
                500 | 502 | 503 | 504 => Err(LlmError::ServerError(format!(
                    "Server error ({}): {}",
                    status, text
                ))),
                _ => Err(LlmError::UnknownError(format!(
                    "Unknown error ({}): {}",
                    status, text
                ))),
            };
        }

        // Parse the successful response
        let response_data: Result<ChatCompletionResponse, _> = response.json().await;
        match response_data {
            Ok(data) => {
                if let Some(choice) = data.choices.first() {
                    let response_text = choice.message.content.clone();

                    if let Some(usage) = &data.usage {
                        log::info!("LLM request completed. Used {} tokens", usage.total_tokens);
                    }

                    Ok(response_text)
                } else {
                    Err(LlmError::ParseError(
                        "No choices returned in response".to_string(),
                    ))
                }
            }
            Err(err) => Err(LlmError::ParseError(format!(
                "Failed to parse response: {}",
                err
            ))),
        }
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        log::info!(
            "Sending completion request to {} (model: {})",
            self.api_url,
            self.model
        );

        self.execute_request(&request_body).await
    }
}
