//! Text-generation client
//!
//! Every call is stateless: role instructions plus a context payload in, text
//! (or an already-structured value) out. The core never depends on transport,
//! authentication, or model identity beyond this contract.

use async_trait::async_trait;
use std::time::Duration;
use tutor_core::{ModelConfig, Result, TutorError};

use crate::auth;
use crate::types::{
    AnthropicMessage, AnthropicRequest, AnthropicResponse, GenerationOutput, GenerationRequest,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Rate limit retry configuration
const MAX_RETRIES: u32 = 4;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

const JSON_MODE_INSTRUCTION: &str =
    "\n\nRespond with a single valid JSON object and nothing else: no prose, no markdown fences.";

/// Stateless text-generation service
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send one request and wait for the full reply
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput>;
}

/// Anthropic Messages API client
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    default_model: String,
    max_tokens_cap: u32,
    base_url: String,
}

impl AnthropicClient {
    /// Create a client from the model configuration
    pub fn from_config(models: &ModelConfig) -> Result<Self> {
        let api_key = auth::get_api_key(&models.api_key_env)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| TutorError::Api(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            default_model: models.default.clone(),
            max_tokens_cap: models.max_tokens,
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint (proxies, local gateways)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, request: &GenerationRequest) -> AnthropicRequest {
        let mut system = request.system_prompt.clone();
        if request.options.json_mode {
            system.push_str(JSON_MODE_INSTRUCTION);
        }

        AnthropicRequest {
            model: request
                .options
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            max_tokens: request.options.max_tokens.min(self.max_tokens_cap),
            system,
            temperature: request.options.temperature,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.user_payload.clone(),
            }],
        }
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput> {
        let body = self.build_request(&request);
        tracing::debug!(
            role = %request.role,
            subject = ?request.subject,
            model = %body.model,
            "Sending generation request ({} chars)",
            request.user_payload.len()
        );

        // Retry loop with exponential backoff for rate limits and server errors
        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            let response = self
                .http
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| TutorError::Generation(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            // Handle rate limit (429) with retry
            if status.as_u16() == 429 {
                retries += 1;

                if retries > MAX_RETRIES {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown".to_string());
                    return Err(TutorError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries. Last error: {}",
                        MAX_RETRIES, error_text
                    )));
                }

                // Parse retry-after header if present, otherwise use exponential backoff
                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                tracing::warn!(
                    "Rate limited (429). Waiting {} seconds before retry {}/{}",
                    wait_secs,
                    retries,
                    MAX_RETRIES
                );

                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    tracing::warn!(
                        "Server error ({}). Waiting {} seconds before retry {}/{}",
                        status,
                        backoff_secs,
                        retries,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                return Err(TutorError::Api(format!(
                    "Anthropic API error {}: {}",
                    status, error_text
                )));
            }

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| TutorError::Api(format!("Failed to parse response: {}", e)))?;

            let text: String = parsed
                .content
                .iter()
                .filter(|block| block.content_type == "text")
                .map(|block| block.text.as_str())
                .collect();

            if let Some(usage) = &parsed.usage {
                tracing::debug!(
                    role = %request.role,
                    "Generation complete ({} chars, {} input tokens, {} output tokens)",
                    text.len(),
                    usage.input_tokens,
                    usage.output_tokens
                );
            }

            return Ok(GenerationOutput::Text(text));
        }
    }
}
