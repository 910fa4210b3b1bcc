//! Error types for Query-Agent
//!
//! This module defines the error types used throughout the application.
//! Every variant belongs to one [`ErrorKind`], which is what the request/response
//! facade and the tool surface use to shape their error payloads.

use crate::database::guard::Rejection;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for Query-Agent
pub type Result<T> = std::result::Result<T, QueryAgentError>;

/// Coarse error category surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or unknown provider / bad settings
    Configuration,
    /// Statement rejected or malformed input
    Validation,
    /// Database or LLM backend failure
    Upstream,
    /// Lookup miss
    NotFound,
    /// Everything else
    Internal,
}

/// Main error type for Query-Agent
#[derive(Error, Debug)]
pub enum QueryAgentError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Selected provider has no credential
    #[error("Provider '{0}' is not configured (missing API key)")]
    ProviderNotConfigured(String),

    /// Provider id not present in the registry
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Statement blocked by the safety gate
    #[error("{0}")]
    Rejected(Rejection),

    /// Malformed caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Identifier that cannot be interpolated safely
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Statement execution failed on the server
    #[error("Database error: {0}")]
    Database(String),

    /// Could not establish a connection
    #[error("Database connection error ({target}): {message}")]
    DbConnection { target: String, message: String },

    /// No pooled connection became available in time
    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// Call exceeded its deadline
    #[error("Timeout: {operation} exceeded {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Caller cancelled the call
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// HTTP-related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// LLM API returned an error status or an unreadable body
    #[error("{provider} API error (status {status}): {message}")]
    LLMApiError {
        provider: String,
        message: String,
        status: u16,
    },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Slash command with missing arguments
    #[error("Invalid syntax for {command}. Expected: {expected}")]
    InvalidCommandSyntax { command: String, expected: String },

    /// Slash command that does not exist
    #[error("Unknown command: {0}. Type /help for the list of commands")]
    UnknownCommand(String),

    /// Tool server transport failures
    #[error("Tool server transport error: {0}")]
    Transport(String),
}

impl QueryAgentError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::ProviderNotConfigured(_) | Self::UnknownProvider(_) => {
                ErrorKind::Configuration
            }
            Self::Rejected(_) | Self::InvalidInput(_) | Self::InvalidIdentifier(_) => {
                ErrorKind::Validation
            }
            Self::Database(_)
            | Self::DbConnection { .. }
            | Self::PoolExhausted(_)
            | Self::Timeout { .. }
            | Self::Cancelled(_)
            | Self::Http(_)
            | Self::LLMApiError { .. } => ErrorKind::Upstream,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io(_)
            | Self::Serialization(_)
            | Self::InvalidCommandSyntax { .. }
            | Self::UnknownCommand(_)
            | Self::Transport(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same call unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted(_) | Self::Timeout { .. } | Self::DbConnection { .. } => true,
            Self::LLMApiError { status, .. } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<tiberius::error::Error> for QueryAgentError {
    fn from(error: tiberius::error::Error) -> Self {
        match error {
            tiberius::error::Error::Io { kind, message } => Self::DbConnection {
                target: format!("{:?}", kind),
                message,
            },
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<bb8::RunError<tiberius::error::Error>> for QueryAgentError {
    fn from(error: bb8::RunError<tiberius::error::Error>) -> Self {
        match error {
            bb8::RunError::User(e) => e.into(),
            bb8::RunError::TimedOut => {
                Self::PoolExhausted("timed out waiting for a pooled connection".to_string())
            }
        }
    }
}

impl From<Rejection> for QueryAgentError {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected(rejection)
    }
}
