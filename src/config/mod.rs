//! Configuration module
//!
//! Settings are resolved in three layers: built-in defaults, the optional TOML
//! file (see [`storage`]), then environment variables (a `.env` file is honoured).

pub mod storage;

use crate::error::{QueryAgentError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use storage::FileConfig;

/// SQL Server connection and pool settings
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub encrypt: bool,
    pub pool_max_size: u32,
    pub pool_idle_timeout_secs: u64,
    pub pool_acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            database: "master".to_string(),
            user: None,
            password: None,
            encrypt: false,
            pool_max_size: 10,
            pool_idle_timeout_secs: 30,
            pool_acquire_timeout_secs: 15,
        }
    }
}

/// LLM credentials and model overrides
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub anthropic_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub google_api_key: Option<String>,
    /// Model overrides keyed by provider id
    pub models: HashMap<String, String>,
}

impl ProviderSettings {
    pub fn model_for(&self, provider_id: &str) -> Option<String> {
        self.models.get(provider_id).cloned()
    }
}

/// Conversation store limits
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_messages: usize,
    pub ttl_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_messages: 20,
            ttl_secs: 30 * 60,
            reap_interval_secs: 60,
        }
    }
}

/// Fully resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub providers: ProviderSettings,
    pub session: SessionSettings,
    /// Deadline applied to every statement execution
    pub query_timeout_secs: u64,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            providers: ProviderSettings::default(),
            session: SessionSettings::default(),
            query_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then the config file, then the environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        // A missing .env file is not an error
        dotenv::dotenv().ok();

        let file = match config_path {
            Some(path) => FileConfig::load_from(path)?,
            None => FileConfig::load_default()?,
        };

        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from a parsed config file
    pub fn apply_file(&mut self, file: FileConfig) {
        let db = file.database;
        set(&mut self.database.host, db.host);
        set(&mut self.database.port, db.port);
        set(&mut self.database.database, db.database);
        self.database.user = db.user.or(self.database.user.take());
        self.database.password = db.password.or(self.database.password.take());
        set(&mut self.database.encrypt, db.encrypt);
        set(&mut self.database.pool_max_size, db.pool_max_size);
        set(&mut self.database.pool_idle_timeout_secs, db.pool_idle_timeout_secs);
        set(&mut self.database.pool_acquire_timeout_secs, db.pool_acquire_timeout_secs);

        self.providers.anthropic_api_key = file.api_keys.get("anthropic").cloned();
        self.providers.groq_api_key = file.api_keys.get("groq").cloned();
        self.providers.google_api_key = file.api_keys.get("google").cloned();
        self.providers.models.extend(file.models);

        set(&mut self.session.max_messages, file.session.max_messages);
        set(&mut self.session.ttl_secs, file.session.ttl_secs);
        set(&mut self.session.reap_interval_secs, file.session.reap_interval_secs);

        set(&mut self.query_timeout_secs, file.query_timeout_secs);
        set(&mut self.log_level, file.log_level);
    }

    /// Overlay values from environment variables, read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        set(&mut self.database.host, text("MSSQL_HOST"));
        set(&mut self.database.port, parse_env(&text, "MSSQL_PORT")?);
        set(&mut self.database.database, text("MSSQL_DATABASE"));
        if let Some(user) = text("MSSQL_USER") {
            self.database.user = Some(user);
        }
        if let Some(password) = text("MSSQL_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(encrypt) = text("MSSQL_ENCRYPT") {
            self.database.encrypt = encrypt.eq_ignore_ascii_case("true");
        }
        set(&mut self.database.pool_max_size, parse_env(&text, "MSSQL_POOL_MAX")?);
        set(
            &mut self.database.pool_idle_timeout_secs,
            parse_env(&text, "MSSQL_POOL_IDLE_SECS")?,
        );
        set(
            &mut self.database.pool_acquire_timeout_secs,
            parse_env(&text, "MSSQL_POOL_ACQUIRE_SECS")?,
        );

        if let Some(key) = text("ANTHROPIC_API_KEY") {
            self.providers.anthropic_api_key = Some(key);
        }
        if let Some(key) = text("GROQ_API_KEY") {
            self.providers.groq_api_key = Some(key);
        }
        if let Some(key) = text("GOOGLE_API_KEY") {
            self.providers.google_api_key = Some(key);
        }

        set(&mut self.session.max_messages, parse_env(&text, "SESSION_MAX_MESSAGES")?);
        set(&mut self.session.ttl_secs, parse_env(&text, "SESSION_TTL_SECS")?);
        set(&mut self.session.reap_interval_secs, parse_env(&text, "SESSION_REAP_SECS")?);
        set(&mut self.query_timeout_secs, parse_env(&text, "QUERY_TIMEOUT_SECS")?);
        set(&mut self.log_level, text("LOG_LEVEL"));

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.database.pool_max_size == 0 {
            return Err(QueryAgentError::Config(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        if self.session.max_messages < 2 {
            return Err(QueryAgentError::Config(
                "session max_messages must be at least 2".to_string(),
            ));
        }
        if self.session.ttl_secs == 0 {
            return Err(QueryAgentError::Config(
                "session ttl_secs must be positive".to_string(),
            ));
        }
        if self.session.reap_interval_secs == 0 {
            return Err(QueryAgentError::Config(
                "session reap_interval_secs must be positive".to_string(),
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err(QueryAgentError::Config(
                "query_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn parse_env<T, F>(text: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    text(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| QueryAgentError::Config(format!("{} has an invalid value: {}", key, raw)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.port, 1433);
        assert_eq!(config.database.database, "master");
        assert_eq!(config.database.pool_max_size, 10);
        assert_eq!(config.database.pool_idle_timeout_secs, 30);
        assert_eq!(config.session.max_messages, 20);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::default();
        let file = FileConfig::parse(
            r#"
            [database]
            host = "from-file"
            port = 1500
            [api_keys]
            anthropic = "file-key"
            "#,
        )
        .unwrap();
        config.apply_file(file);
        config
            .apply_env(env(&[
                ("MSSQL_HOST", "from-env"),
                ("MSSQL_ENCRYPT", "true"),
                ("GROQ_API_KEY", "gsk-env"),
            ]))
            .unwrap();

        assert_eq!(config.database.host, "from-env");
        assert_eq!(config.database.port, 1500);
        assert!(config.database.encrypt);
        assert_eq!(config.providers.anthropic_api_key.as_deref(), Some("file-key"));
        assert_eq!(config.providers.groq_api_key.as_deref(), Some("gsk-env"));
        assert!(config.providers.google_api_key.is_none());
    }

    #[test]
    fn test_blank_env_values_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("ANTHROPIC_API_KEY", "  "), ("MSSQL_HOST", "")]))
            .unwrap();
        assert!(config.providers.anthropic_api_key.is_none());
        assert_eq!(config.database.host, "localhost");
    }

    #[test]
    fn test_invalid_env_number() {
        let mut config = AppConfig::default();
        let result = config.apply_env(env(&[("MSSQL_PORT", "not-a-port")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env(&[("MSSQL_POOL_MAX", "0")])).is_err());
    }

    #[test]
    fn test_zero_reap_interval_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(env(&[("SESSION_REAP_SECS", "0")]));
        assert!(matches!(result, Err(QueryAgentError::Config(_))));

        let mut config = AppConfig::default();
        config.apply_file(FileConfig::parse("[session]\nreap_interval_secs = 0\n").unwrap());
        let error = config.apply_env(env(&[])).unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_zero_session_ttl_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(env(&[("SESSION_TTL_SECS", "0")]));
        assert!(matches!(result, Err(QueryAgentError::Config(_))));
    }
}
