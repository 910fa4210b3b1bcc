//! LLM Provider Trait
//!
//! This module defines the one capability interface every language-model backend
//! implements. Backends differ wildly in their native request shapes (message
//! arrays, system-instruction-plus-history, and so on); callers only ever see
//! [`LLMProvider::chat`].

use crate::error::{QueryAgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default output budget for every backend
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// LLM message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message (question, or schema context on the first turn)
    User,
    /// Assistant message (model reply)
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// LLM message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: MessageRole,
    /// Message content
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Normalized reply from any backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Generated text content
    pub content: String,
    /// Registry key of the backend that answered
    pub provider_id: String,
    /// Model identifier sent to the backend
    pub model_id: String,
}

/// Trait for LLM providers
///
/// Adding a backend means adding one implementation and registering it; call
/// sites never change.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Registry key, e.g. `claude-sonnet`
    fn id(&self) -> &str;

    /// Human-readable name, e.g. `Claude Sonnet 4`
    fn display_name(&self) -> &str;

    /// Model identifier sent to the backend
    fn model_id(&self) -> &str;

    /// Whether the backend's credential is present
    fn is_configured(&self) -> bool;

    /// Send the conversation and return the reply
    ///
    /// # Arguments
    /// * `messages` - Conversation history, oldest first, ending with the user turn
    /// * `system_prompt` - Fixed instructions for the assistant
    async fn chat(&self, messages: &[Message], system_prompt: &str) -> Result<ChatResponse>;

    /// Fail fast, without any network call, when no credential is configured
    fn ensure_configured(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(QueryAgentError::ProviderNotConfigured(self.id().to_string()));
        }
        Ok(())
    }

    /// Wrap reply text in a [`ChatResponse`] attributed to this provider
    fn response(&self, content: String) -> ChatResponse {
        ChatResponse {
            content,
            provider_id: self.id().to_string(),
            model_id: self.model_id().to_string(),
        }
    }

    /// Error for an empty or unreadable reply body
    fn invalid_response(&self, message: impl Into<String>) -> QueryAgentError
    where
        Self: Sized,
    {
        QueryAgentError::LLMApiError {
            provider: self.display_name().to_string(),
            message: message.into(),
            status: 0,
        }
    }
}

/// Non-empty credential
pub(crate) fn credential(api_key: Option<String>) -> Option<String> {
    api_key.filter(|key| !key.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unconfigured;

    #[async_trait]
    impl LLMProvider for Unconfigured {
        fn id(&self) -> &str {
            "gemini"
        }
        fn display_name(&self) -> &str {
            "Gemini"
        }
        fn model_id(&self) -> &str {
            "gemini-test"
        }
        fn is_configured(&self) -> bool {
            false
        }
        async fn chat(&self, _messages: &[Message], _system_prompt: &str) -> Result<ChatResponse> {
            self.ensure_configured()?;
            Ok(self.response("unreachable".to_string()))
        }
    }

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);

        let assistant_msg = Message::assistant("Hi there!");
        assert_eq!(assistant_msg.role, MessageRole::Assistant);
        assert_eq!(
            serde_json::to_value(&assistant_msg).unwrap()["role"],
            serde_json::json!("assistant")
        );
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_fast() {
        let err = Unconfigured.chat(&[Message::user("hi")], "sys").await.unwrap_err();
        assert!(matches!(err, QueryAgentError::ProviderNotConfigured(ref id) if id == "gemini"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_credential_filter() {
        assert_eq!(credential(Some("k".to_string())), Some("k".to_string()));
        assert_eq!(credential(Some("  ".to_string())), None);
        assert_eq!(credential(None), None);
    }
}
