//! Google Gemini API Provider
//!
//! Gemini takes a system instruction plus a chat history whose assistant turns use
//! the role `model`.

use crate::error::Result;
use crate::llm::client::LLMHttpClient;
use crate::llm::provider::{
    credential, ChatResponse, LLMProvider, Message, MessageRole, DEFAULT_MAX_TOKENS,
};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gemini API base URL
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const GEMINI_MODEL: &str = "gemini-2.5-flash-preview-05-20";

/// Google Gemini API provider
pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    client: LLMHttpClient,
    max_tokens: u32,
}

impl GeminiProvider {
    /// Create a new Gemini provider
    ///
    /// # Arguments
    /// * `api_key` - Google API key, if configured
    /// * `model` - Model identifier (defaults to gemini-2.5-flash)
    pub fn new(api_key: Option<String>, model: Option<String>) -> Result<Self> {
        Ok(Self {
            api_key: credential(api_key),
            model: model.unwrap_or_else(|| GEMINI_MODEL.to_string()),
            client: LLMHttpClient::new()?,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.model)
    }

    fn build_headers(api_key: &str) -> Result<HeaderMap> {
        LLMHttpClient::build_headers_with_auth("x-goog-api-key", api_key)
    }

    fn build_request(&self, messages: &[Message], system_prompt: &str) -> GeminiRequest {
        GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: system_prompt.to_string(),
                }],
            },
            contents: messages
                .iter()
                .map(|msg| GeminiContent {
                    role: Some(
                        match msg.role {
                            MessageRole::User => "user",
                            MessageRole::Assistant => "model",
                        }
                        .to_string(),
                    ),
                    parts: vec![GeminiPart {
                        text: msg.content.clone(),
                    }],
                })
                .collect(),
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
            },
        }
    }

    /// Text parts of the first candidate, concatenated
    fn extract_content(response: &GeminiResponse) -> String {
        response
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn display_name(&self) -> &str {
        "Gemini 2.5 Flash"
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
        debug!(model = %self.model, messages = messages.len(), "Calling Gemini");

        let response_text = self
            .client
            .post_with_retry("Gemini", &self.endpoint(), Self::build_headers(api_key)?, &request)
            .await?;

        let gemini_response: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| self.invalid_response(format!("Failed to parse response: {}", e)))?;

        let content = Self::extract_content(&gemini_response);
        if content.is_empty() {
            return Err(self.invalid_response("Empty response from Gemini"));
        }

        Ok(self.response(content))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uses_model_role() {
        let provider = GeminiProvider::new(Some("k".to_string()), None).unwrap();
        let request = provider.build_request(
            &[Message::user("schema..."), Message::assistant("ok"), Message::user("count users")],
            "system",
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "system");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "count users");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn test_endpoint() {
        let provider = GeminiProvider::new(None, Some("gemini-test".to_string())).unwrap();
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-test:generateContent"
        );
        assert!(!provider.is_configured());
    }

    #[test]
    fn test_extract_content() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{\"message\":"},{"text":"\"hi\"}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(GeminiProvider::extract_content(&response), r#"{"message":"hi"}"#);

        let blocked: GeminiResponse = serde_json::from_str(r#"{"candidates":[{}]}"#).unwrap();
        assert!(GeminiProvider::extract_content(&blocked).is_empty());
    }
}
