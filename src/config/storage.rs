//! Configuration Storage
//!
//! This module handles the optional on-disk configuration file. Every field is
//! optional so a file only needs the settings it overrides; environment variables
//! are applied on top by [`crate::config::AppConfig::load`].

use crate::error::{QueryAgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Persistent configuration data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// `[database]` section
    pub database: DatabaseSection,
    /// API keys for LLM providers, keyed by credential name (anthropic, groq, google)
    pub api_keys: HashMap<String, String>,
    /// Model overrides keyed by provider id (claude-opus, claude-sonnet, groq, gemini)
    pub models: HashMap<String, String>,
    /// `[session]` section
    pub session: SessionSection,
    /// Per-statement deadline in seconds
    pub query_timeout_secs: Option<u64>,
    /// Default log level
    pub log_level: Option<String>,
}

/// Database overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub encrypt: Option<bool>,
    pub pool_max_size: Option<u32>,
    pub pool_idle_timeout_secs: Option<u64>,
    pub pool_acquire_timeout_secs: Option<u64>,
}

/// Session overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub max_messages: Option<usize>,
    pub ttl_secs: Option<u64>,
    pub reap_interval_secs: Option<u64>,
}

impl FileConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("query-agent"))
            .ok_or_else(|| {
                QueryAgentError::Config("Could not find configuration directory".to_string())
            })
    }

    /// Get the default configuration file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Load the default configuration file, or an empty configuration if it does not exist
    pub fn load_default() -> Result<Self> {
        match Self::config_file() {
            Ok(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            QueryAgentError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::parse(&content)
            .map_err(|e| QueryAgentError::Config(format!("{} ({})", e, path.display())))
    }

    /// Parse TOML content
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| QueryAgentError::Config(format!("Failed to parse config file: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = FileConfig::parse("").unwrap();
        assert!(config.api_keys.is_empty());
        assert!(config.database.host.is_none());
    }

    #[test]
    fn test_partial_config() {
        let config = FileConfig::parse(
            r#"
            query_timeout_secs = 12

            [database]
            host = "sql.internal"
            pool_max_size = 4

            [api_keys]
            groq = "gsk-test"

            [models]
            gemini = "gemini-2.5-pro"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.host.as_deref(), Some("sql.internal"));
        assert_eq!(config.database.pool_max_size, Some(4));
        assert_eq!(config.api_keys.get("groq").map(String::as_str), Some("gsk-test"));
        assert_eq!(config.models.get("gemini").map(String::as_str), Some("gemini-2.5-pro"));
        assert_eq!(config.query_timeout_secs, Some(12));
    }

    #[test]
    fn test_invalid_config() {
        assert!(FileConfig::parse("database = 5").is_err());
    }
}
