//! Request and response types for text generation

use serde::{Deserialize, Serialize};
use tutor_core::{AgentRole, Result};

use crate::parsing::extract_json;

/// Per-call generation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// Ask the service for a single JSON object
    pub json_mode: bool,
    pub max_tokens: u32,
    /// Model override; the client default is used when unset
    pub model: Option<String>,
}

impl GenerationOptions {
    /// Deterministic structured-output options, as used by every judge
    pub fn judge(max_tokens: u32) -> Self {
        Self {
            temperature: 0.0,
            json_mode: true,
            max_tokens,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            json_mode: false,
            max_tokens: 1024,
            model: None,
        }
    }
}

/// One stateless call: role instructions plus a context payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub role: AgentRole,
    /// Persona or other routing key, used for logging and scripted replies
    pub subject: Option<String>,
    pub system_prompt: String,
    pub user_payload: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(
        role: AgentRole,
        system_prompt: impl Into<String>,
        user_payload: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            role,
            subject: None,
            system_prompt: system_prompt.into(),
            user_payload: user_payload.into(),
            options,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// What the service returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl GenerationOutput {
    /// Parse into JSON, running free text through the fallback parser
    pub fn into_json(self) -> Result<serde_json::Value> {
        match self {
            Self::Structured(value) => Ok(value),
            Self::Text(text) => extract_json(&text),
        }
    }

    /// Text view; structured output is serialized
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl From<&str> for GenerationOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for GenerationOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<serde_json::Value> for GenerationOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anthropic API message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

/// Anthropic API request format
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub temperature: f32,
    pub messages: Vec<AnthropicMessage>,
}

/// Anthropic API response format
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<AnthropicContent>,
    pub usage: Option<Usage>,
}

/// Content block in Anthropic response
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_output_passes_through() {
        let value = json!({"severity": 2});
        let out = GenerationOutput::from(value.clone());
        assert_eq!(out.into_json().unwrap(), value);
    }

    #[test]
    fn test_text_output_is_parsed() {
        let out = GenerationOutput::from("Sure: {\"uniqueness\": 0.4}");
        assert_eq!(out.into_json().unwrap(), json!({"uniqueness": 0.4}));
    }

    #[test]
    fn test_judge_options_are_deterministic() {
        let opts = GenerationOptions::judge(200).with_model("m");
        assert_eq!(opts.temperature, 0.0);
        assert!(opts.json_mode);
        assert_eq!(opts.model.as_deref(), Some("m"));
    }

    #[test]
    fn test_anthropic_response_skips_non_text_blocks() {
        let raw = r#"{"id":"msg_1","content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":3,"output_tokens":1}}"#;
        let resp: AnthropicResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.content[0].text, "hi");
        assert_eq!(resp.usage.unwrap().output_tokens, 1);
    }
}
