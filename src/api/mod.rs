//! Request/response facade
//!
//! One method per operation of the request/response surface, with serializable
//! inputs and outputs. Route wiring is left to the embedding server; every error
//! maps to an [`ErrorPayload`] through [`respond`].

use crate::chat::{ChatRequest, ChatTurn, ConversationOrchestrator, SessionStore};
use crate::config::AppConfig;
use crate::database::{
    ExecutionGateway, MssqlPool, ProcedureSummary, RefreshStats, RenderOptions, ResultSet,
    SchemaCatalog, SchemaSnapshot, SqlBackend, StoredProcedureInfo, TableInfo, TableSummary,
};
use crate::error::{ErrorKind, QueryAgentError, Result};
use crate::llm::{ProviderDescriptor, ProviderRegistry};
use crate::tools::ToolSurface;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Error body returned for any failed operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl ErrorPayload {
    /// HTTP-style status for the error category
    pub fn status(&self) -> u16 {
        match self.kind {
            ErrorKind::Configuration | ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Upstream => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl From<&QueryAgentError> for ErrorPayload {
    fn from(error: &QueryAgentError) -> Self {
        Self {
            error: error.to_string(),
            kind: error.kind(),
            retryable: error.is_retryable(),
        }
    }
}

/// Turn an operation result into a success body or an [`ErrorPayload`]
pub fn respond<T>(result: Result<T>) -> std::result::Result<T, ErrorPayload> {
    result.map_err(|e| {
        warn!(kind = ?e.kind(), error = %e, "Request failed");
        ErrorPayload::from(&e)
    })
}

/// Schema dump format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFormat {
    #[default]
    Text,
    #[serde(alias = "json")]
    Structured,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaQuery {
    #[serde(default)]
    pub format: SchemaFormat,
    #[serde(default)]
    pub refresh: bool,
}

/// Schema dump body
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SchemaDump {
    Text { schema: String },
    Structured(Box<SchemaSnapshot>),
}

/// Change check body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatus {
    pub changed: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub cached: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub sql: String,
}

/// Connectivity check body
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub connected: bool,
    pub message: String,
}

/// Acknowledgement body
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Backend for every request/response operation
pub struct QueryService {
    orchestrator: Arc<ConversationOrchestrator>,
    reap_interval: Duration,
}

impl QueryService {
    /// Wire the whole backend from configuration; the database is not contacted yet
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let pool = MssqlPool::new(config.database.clone());
        info!(target_db = %pool.target(), "Query service configured");

        let backend: Arc<dyn SqlBackend> = Arc::new(pool);
        let registry = ProviderRegistry::from_settings(&config.providers)?;
        let service = Self::new(
            backend,
            registry,
            SessionStore::new(&config.session),
            Duration::from_secs(config.query_timeout_secs),
        );
        Ok(service.with_reap_interval(Duration::from_secs(config.session.reap_interval_secs)))
    }

    /// Wire the backend over an explicit statement runner and provider set
    pub fn new(
        backend: Arc<dyn SqlBackend>,
        providers: ProviderRegistry,
        sessions: SessionStore,
        query_timeout: Duration,
    ) -> Self {
        let catalog = Arc::new(SchemaCatalog::new(Arc::clone(&backend)));
        let gateway = Arc::new(ExecutionGateway::new(backend, query_timeout));
        let orchestrator = ConversationOrchestrator::new(
            catalog,
            gateway,
            Arc::new(providers),
            Arc::new(sessions),
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            reap_interval: Duration::from_secs(60),
        }
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn orchestrator(&self) -> &Arc<ConversationOrchestrator> {
        &self.orchestrator
    }

    /// Tool surface sharing this service's catalog and gateway
    pub fn tool_surface(&self) -> ToolSurface {
        ToolSurface::new(
            Arc::clone(self.orchestrator.catalog()),
            Arc::clone(self.orchestrator.gateway()),
        )
    }

    /// Start evicting idle sessions until `shutdown` fires
    pub fn start_session_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        Arc::clone(self.orchestrator.sessions()).start_reaper(self.reap_interval, shutdown)
    }

    fn catalog(&self) -> &SchemaCatalog {
        self.orchestrator.catalog()
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatTurn> {
        self.orchestrator.chat(request).await
    }

    pub async fn chat_with_cancel(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatTurn> {
        self.orchestrator.chat_with_cancel(request, cancel).await
    }

    pub async fn clear_session(&self, session_id: &str) -> Ack {
        self.orchestrator.clear(session_id).await;
        Ack::new("Conversation history cleared")
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.orchestrator.providers().list_available()
    }

    /// Rendered or structured catalog, optionally forcing a rescan first
    pub async fn schema(&self, query: SchemaQuery) -> Result<SchemaDump> {
        let snapshot = self.catalog().load(query.refresh).await?;
        Ok(match query.format {
            SchemaFormat::Text => SchemaDump::Text {
                schema: snapshot.render(&RenderOptions::default()),
            },
            SchemaFormat::Structured => SchemaDump::Structured(Box::new((*snapshot).clone())),
        })
    }

    pub async fn refresh(&self) -> Result<RefreshStats> {
        self.catalog().refresh_stats().await
    }

    pub async fn check(&self) -> Result<ChangeStatus> {
        let changed = self.catalog().has_changed().await?;
        let current = self.catalog().current().await;
        Ok(ChangeStatus {
            changed,
            last_updated: current.as_ref().map(|s| s.last_updated),
            cached: current.is_some(),
        })
    }

    pub async fn tables(&self) -> Result<Vec<TableSummary>> {
        self.catalog().list_tables().await
    }

    pub async fn table(&self, name: &str) -> Result<TableInfo> {
        self.orchestrator.describe_table(name).await
    }

    pub async fn procedures(&self) -> Result<Vec<ProcedureSummary>> {
        self.catalog().list_procedures().await
    }

    pub async fn procedure(&self, name: &str) -> Result<StoredProcedureInfo> {
        self.orchestrator.describe_procedure(name).await
    }

    pub async fn relationships(&self) -> Result<String> {
        self.catalog().relationships().await
    }

    /// Gated raw statement execution
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ResultSet> {
        self.execute_inner(request, None).await
    }

    /// Gated raw statement execution, abandoned when `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        request: ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<ResultSet> {
        self.execute_inner(request, Some(cancel)).await
    }

    async fn execute_inner(
        &self,
        request: ExecuteRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResultSet> {
        if request.sql.trim().is_empty() {
            return Err(QueryAgentError::InvalidInput("SQL query is required".to_string()));
        }
        let output = self.orchestrator.gateway().run_checked(&request.sql, cancel).await?;
        Ok(output.to_result_set())
    }

    pub async fn clear_cache(&self) -> Ack {
        self.catalog().clear().await;
        Ack::new("Schema cache cleared")
    }

    /// Connectivity check
    pub async fn health(&self) -> Health {
        match self.orchestrator.gateway().ping().await {
            Ok(()) => Health {
                connected: true,
                message: "Database connected".to_string(),
            },
            Err(e) => {
                warn!(error = %e, "Database ping failed");
                Health {
                    connected: false,
                    message: format!("Connection failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::guard;

    #[test]
    fn test_error_payload_mapping() {
        let rejected = guard::evaluate("DROP TABLE Users").into_result().unwrap_err();
        let payload = ErrorPayload::from(&rejected);
        assert_eq!(payload.kind, ErrorKind::Validation);
        assert_eq!(payload.status(), 400);
        assert!(!payload.retryable);

        let missing = QueryAgentError::NotFound("Table not found: dbo.Nope".to_string());
        assert_eq!(ErrorPayload::from(&missing).status(), 404);

        let timeout = QueryAgentError::Timeout {
            operation: "statement execution".to_string(),
            secs: 30,
        };
        let payload = respond::<()>(Err(timeout)).unwrap_err();
        assert_eq!(payload.status(), 502);
        assert!(payload.retryable);
    }

    #[test]
    fn test_schema_query_defaults() {
        let query: SchemaQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.format, SchemaFormat::Text);
        assert!(!query.refresh);

        let query: SchemaQuery =
            serde_json::from_str(r#"{"format":"json","refresh":true}"#).unwrap();
        assert_eq!(query.format, SchemaFormat::Structured);
        assert!(query.refresh);
    }
}
