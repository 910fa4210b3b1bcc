//! Anthropic Claude API Provider
//!
//! This module implements the LLMProvider trait for Anthropic's Messages API.
//! The same implementation backs both registered Claude entries; they differ only
//! in registry key, display name and model.

use crate::error::Result;
use crate::llm::client::LLMHttpClient;
use crate::llm::provider::{credential, ChatResponse, LLMProvider, Message, DEFAULT_MAX_TOKENS};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Anthropic API base URL
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const OPUS_MODEL: &str = "claude-opus-4-20250514";
pub const SONNET_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic Claude API provider
pub struct AnthropicProvider {
    /// Registry key
    id: String,
    /// Display name
    name: String,
    /// API key for authentication
    api_key: Option<String>,
    /// Model to use
    model: String,
    /// HTTP client for making requests
    client: LLMHttpClient,
    /// Maximum tokens for generation
    max_tokens: u32,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    ///
    /// # Arguments
    /// * `id` - Registry key
    /// * `name` - Display name
    /// * `api_key` - Anthropic API key, if configured
    /// * `model` - Model identifier
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            name: name.into(),
            api_key: credential(api_key),
            model: model.into(),
            client: LLMHttpClient::new()?,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// High-end reasoning model (`claude-opus`)
    pub fn opus(api_key: Option<String>, model: Option<String>) -> Result<Self> {
        Self::new(
            "claude-opus",
            "Claude Opus 4.5",
            api_key,
            model.unwrap_or_else(|| OPUS_MODEL.to_string()),
        )
    }

    /// Fast general model (`claude-sonnet`)
    pub fn sonnet(api_key: Option<String>, model: Option<String>) -> Result<Self> {
        Self::new(
            "claude-sonnet",
            "Claude Sonnet 4",
            api_key,
            model.unwrap_or_else(|| SONNET_MODEL.to_string()),
        )
    }

    /// Set the maximum tokens for generation
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build headers for Anthropic API
    fn build_headers(&self, api_key: &str) -> Result<HeaderMap> {
        let headers = LLMHttpClient::build_headers_with_auth("x-api-key", api_key)?;
        LLMHttpClient::add_header(headers, "anthropic-version", ANTHROPIC_VERSION)
    }

    /// Build the request body; the system prompt is a top-level field
    fn build_request(&self, messages: &[Message], system_prompt: &str) -> AnthropicRequest {
        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system_prompt.to_string(),
            messages: messages
                .iter()
                .map(|msg| AnthropicMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                })
                .collect(),
        }
    }

    /// Concatenate text blocks of the response
    fn extract_content(response: &AnthropicResponse) -> String {
        response
            .content
            .iter()
            .filter(|block| block.type_ == "text")
            .filter_map(|block| block.text.as_deref())
            .collect()
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(&self, messages: &[Message], system_prompt: &str) -> Result<ChatResponse> {
        self.ensure_configured()?;
        let api_key = self.api_key.as_deref().unwrap_or_default();

        let request = self.build_request(messages, system_prompt);
        debug!(provider = %self.id, model = %self.model, messages = messages.len(), "Calling Anthropic");

        let response_text = self
            .client
            .post_with_retry("Anthropic", ANTHROPIC_API_BASE, self.build_headers(api_key)?, &request)
            .await?;

        let anthropic_response: AnthropicResponse = serde_json::from_str(&response_text)
            .map_err(|e| self.invalid_response(format!("Failed to parse response: {}", e)))?;

        let content = Self::extract_content(&anthropic_response);
        if content.is_empty() {
            return Err(self.invalid_response("Unexpected response type from Claude"));
        }

        Ok(self.response(content))
    }
}

/// Anthropic API request format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

/// Anthropic API message format
#[derive(Debug, Serialize, Clone)]
struct AnthropicMessage {
    role: String,
    content: String,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

/// Content block in Anthropic response
#[derive(Debug, Deserialize, Clone)]
struct ContentBlock {
    #[serde(rename = "type")]
    type_: String,
    text: Option<String>,
}
