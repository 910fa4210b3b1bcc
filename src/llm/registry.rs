//! Provider registry
//!
//! Fixed, read-only table of chat backends built once at startup from the
//! configured credentials. Lookup order is the order the UI lists them in.

use crate::config::ProviderSettings;
use crate::error::{QueryAgentError, Result};
use crate::llm::provider::LLMProvider;
use crate::llm::providers::{anthropic::AnthropicProvider, gemini::GeminiProvider, groq::GroqProvider};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Provider used when a request names none
pub const DEFAULT_PROVIDER: &str = "claude-sonnet";

/// Capability entry for provider discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub configured: bool,
}

/// Process-wide set of chat backends
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn LLMProvider>>,
}

impl ProviderRegistry {
    /// Build the standard four backends; unconfigured ones are still listed
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let registry = Self::with_providers(vec![
            Arc::new(AnthropicProvider::opus(
                settings.anthropic_api_key.clone(),
                settings.model_for("claude-opus"),
            )?),
            Arc::new(AnthropicProvider::sonnet(
                settings.anthropic_api_key.clone(),
                settings.model_for("claude-sonnet"),
            )?),
            Arc::new(GroqProvider::new(
                settings.groq_api_key.clone(),
                settings.model_for("groq"),
            )?),
            Arc::new(GeminiProvider::new(
                settings.google_api_key.clone(),
                settings.model_for("gemini"),
            )?),
        ]);

        let configured: Vec<&str> = registry
            .providers
            .iter()
            .filter(|p| p.is_configured())
            .map(|p| p.id())
            .collect();
        info!(configured = ?configured, "Provider registry ready");

        Ok(registry)
    }

    /// Registry over an explicit provider list
    pub fn with_providers(providers: Vec<Arc<dyn LLMProvider>>) -> Self {
        Self { providers }
    }

    /// Look up a backend by registry key
    pub fn get(&self, id: &str) -> Result<Arc<dyn LLMProvider>> {
        self.providers
            .iter()
            .find(|p| p.id() == id)
            .cloned()
            .ok_or_else(|| QueryAgentError::UnknownProvider(id.to_string()))
    }

    /// Every registered backend with its configuration state
    pub fn list_available(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .iter()
            .map(|p| ProviderDescriptor {
                id: p.id().to_string(),
                name: p.display_name().to_string(),
                configured: p.is_configured(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn settings() -> ProviderSettings {
        let mut settings = ProviderSettings {
            groq_api_key: Some("gsk-test".to_string()),
            ..ProviderSettings::default()
        };
        settings
            .models
            .insert("gemini".to_string(), "gemini-custom".to_string());
        settings
    }

    #[test]
    fn test_list_available_order_and_state() {
        let registry = ProviderRegistry::from_settings(&settings()).unwrap();
        let listed = registry.list_available();

        let ids: Vec<&str> = listed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["claude-opus", "claude-sonnet", "groq", "gemini"]);
        assert!(!listed[0].configured);
        assert!(listed[2].configured);
        assert_eq!(listed[2].name, "Llama 3.3 70B");
    }

    #[test]
    fn test_model_override() {
        let registry = ProviderRegistry::from_settings(&settings()).unwrap();
        assert_eq!(registry.get("gemini").unwrap().model_id(), "gemini-custom");
        assert_eq!(
            registry.get(DEFAULT_PROVIDER).unwrap().model_id(),
            "claude-sonnet-4-20250514"
        );
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::from_settings(&settings()).unwrap();
        let err = registry.get("gpt").err().unwrap();
        assert!(matches!(err, QueryAgentError::UnknownProvider(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
