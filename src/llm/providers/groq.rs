//! Groq API Provider
//!
//! This module implements the LLMProvider trait for Groq's fast inference API.

use crate::error::Result;
use crate::llm::client::LLMHttpClient;
use crate::llm::provider::{credential, ChatResponse, LLMProvider, Message, DEFAULT_MAX_TOKENS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Groq API base URL
const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1/chat/completions";

pub const GROQ_MODEL: &str = "llama-3.3-70b-versatile";

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Groq API provider
pub struct GroqProvider {
    /// API key for authentication
    api_key: Option<String>,
    /// Model to use (e.g., "llama-3.3-70b-versatile")
    model: String,
    /// HTTP client for making requests
    client: LLMHttpClient,
    /// Maximum tokens for generation
    max_tokens: u32,
    temperature: f32,
}

impl GroqProvider {
    /// Create a new Groq provider
    ///
    /// # Arguments
    /// * `api_key` - Groq API key, if configured
    /// * `model` - Model identifier (defaults to llama-3.3-70b-versatile)
    pub fn new(api_key: Option<String>, model: Option<String>) -> Result<Self> {
        Ok(Self {
            api_key: credential(api_key),
            model: model.unwrap_or_else(|| GROQ_MODEL.to_string()),
            client: LLMHttpClient::new()?,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    /// Set the maximum tokens for generation
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Convert our Message format to Groq format (OpenAI-compatible)
    ///
    /// The system prompt travels as the first message.
    fn build_request(&self, messages: &[Message], system_prompt: &str) -> GroqRequest {
        let mut groq_messages = Vec::with_capacity(messages.len() + 1);
        groq_messages.push(GroqMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
        groq_messages.extend(messages.iter().map(|msg| GroqMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }));

        GroqRequest {
            model: self.model.clone(),
            messages: groq_messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Extract text content from Groq response
    fn extract_content(response: &GroqResponse) -> Option<String> {
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.is_empty())
    }
}

#[async_trait]
impl LLMProvider for GroqProvider {
    fn id(&self) -> &str {
        "groq"
    }

    fn display_name(&self) -> &str {
        "Llama 3.3 70B"
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
        debug!(model = %self.model, messages = messages.len(), "Calling Groq");

        let headers = LLMHttpClient::build_headers(api_key)?;
        let response_text = self
            .client
            .post_with_retry("Groq", GROQ_API_BASE, headers, &request)
            .await?;

        let groq_response: GroqResponse = serde_json::from_str(&response_text)
            .map_err(|e| self.invalid_response(format!("Failed to parse response: {}", e)))?;

        let content = Self::extract_content(&groq_response)
            .ok_or_else(|| self.invalid_response("Empty response from Groq"))?;

        Ok(self.response(content))
    }
}

/// Groq API request format (OpenAI-compatible)
#[derive(Debug, Serialize)]
struct GroqRequest {
    model: String,
    messages: Vec<GroqMessage>,
    max_tokens: u32,
    temperature: f32,
}

/// Groq API message format
#[derive(Debug, Serialize, Clone)]
struct GroqMessage {
    role: String,
    content: String,
}

/// Groq API response format (OpenAI-compatible)
#[derive(Debug, Deserialize)]
struct GroqResponse {
    #[serde(default)]
    choices: Vec<GroqChoice>,
}

/// Choice in Groq response
#[derive(Debug, Deserialize, Clone)]
struct GroqChoice {
    message: GroqMessageResponse,
}

/// Message in Groq response
#[derive(Debug, Deserialize, Clone)]
struct GroqMessageResponse {
    content: Option<String>,
}
