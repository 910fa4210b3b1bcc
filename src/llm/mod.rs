//! LLM integration module
//!
//! This module provides trait-based LLM provider abstraction
//! and implementations for the supported chat backends.

pub mod client;
pub mod provider;
pub mod registry;

// Provider implementations
pub mod providers {
    pub mod anthropic;
    pub mod gemini;
    pub mod groq;
}

// Re-exports
pub use provider::{ChatResponse, LLMProvider, Message, MessageRole};
pub use registry::{ProviderDescriptor, ProviderRegistry, DEFAULT_PROVIDER};
