//! Conversation orchestrator
//!
//! Drives one chat turn end to end: make sure the catalog is fresh, build the
//! outbound message (schema context on a session's first turn), call the selected
//! provider with the whole history, decode the reply and, when it asks for it, run
//! the statement through the safety gate and the execution gateway.

use crate::chat::prompt::{self, SYSTEM_PROMPT};
use crate::chat::reply::{AssistantReply, ReplyAction};
use crate::chat::session::{SessionStore, DEFAULT_SESSION_ID};
use crate::database::{
    ExecutionGateway, RenderOptions, ResultSet, SchemaCatalog, StoredProcedureInfo, TableInfo,
};
use crate::error::{QueryAgentError, Result};
use crate::llm::provider::Message;
use crate::llm::registry::{ProviderRegistry, DEFAULT_PROVIDER};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inbound chat turn
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Outcome of one chat turn
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub message: String,
    pub sql: Option<String>,
    pub action: ReplyAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables_used: Option<Vec<String>>,
    /// Rows of the executed statement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSet>,
    /// Why the statement did not run (rejection or database error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub provider_id: String,
    pub model_id: String,
    pub session_id: String,
    pub schema_refreshed: bool,
}

/// Shared conversational backend
pub struct ConversationOrchestrator {
    catalog: Arc<SchemaCatalog>,
    gateway: Arc<ExecutionGateway>,
    providers: Arc<ProviderRegistry>,
    sessions: Arc<SessionStore>,
}

impl ConversationOrchestrator {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        gateway: Arc<ExecutionGateway>,
        providers: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            catalog,
            gateway,
            providers,
            sessions,
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn gateway(&self) -> &Arc<ExecutionGateway> {
        &self.gateway
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run one chat turn
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatTurn> {
        self.turn(request, None).await
    }

    /// Run one chat turn; cancelling the token abandons the provider call or the statement
    pub async fn chat_with_cancel(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatTurn> {
        self.turn(request, Some(cancel)).await
    }

    async fn turn(&self, request: ChatRequest, cancel: Option<&CancellationToken>) -> Result<ChatTurn> {
        let question = request.message.trim();
        if question.is_empty() {
            return Err(QueryAgentError::InvalidInput("message must not be empty".to_string()));
        }
        let provider_id = request.provider_id.as_deref().unwrap_or(DEFAULT_PROVIDER);
        let session_id = request.session_id.as_deref().unwrap_or(DEFAULT_SESSION_ID);

        let provider = self.providers.get(provider_id)?;
        provider.ensure_configured()?;

        let (snapshot, schema_refreshed) = self.catalog.load_tracked(false).await?;
        if schema_refreshed {
            info!(session = session_id, "Schema refreshed before chat turn");
        }

        let session = self.sessions.session(session_id).await;
        let mut history = session.lock().await;

        let outbound = if history.is_empty() {
            prompt::first_turn(
                &snapshot.render(&RenderOptions::default()),
                &snapshot.relationships(),
                question,
            )
        } else {
            question.to_string()
        };
        history.push(Message::user(outbound));

        info!(
            provider = provider.id(),
            model = provider.model_id(),
            session = session_id,
            messages = history.len(),
            "Calling provider"
        );
        let call = provider.chat(history.messages(), SYSTEM_PROMPT);
        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(QueryAgentError::Cancelled("provider call".to_string())),
                    outcome = call => outcome,
                }
            }
            None => call.await,
        };
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                // Keep the history alternating user/assistant
                history.pop();
                warn!(provider = provider.id(), error = %e, "Provider call failed");
                return Err(e);
            }
        };

        history.push(Message::assistant(response.content.clone()));
        if history.trim(self.sessions.max_messages()) {
            debug!(session = session_id, kept = history.len(), "Session history trimmed");
        }
        drop(history);

        let reply = AssistantReply::parse(&response.content);
        if matches!(reply, AssistantReply::Freeform(_)) {
            debug!(provider = provider.id(), "Reply degraded to plain message");
        }

        let mut turn = ChatTurn {
            message: reply.message().to_string(),
            sql: reply.sql().map(str::to_string),
            action: reply.action(),
            tables_used: reply.tables_used().map(<[String]>::to_vec),
            result: None,
            error: None,
            provider_id: response.provider_id,
            model_id: response.model_id,
            session_id: session_id.to_string(),
            schema_refreshed,
        };

        if let Some(sql) = reply.runnable_sql() {
            match self.gateway.run_checked(sql, cancel).await {
                Ok(output) => turn.result = Some(output.to_result_set()),
                Err(e) => {
                    warn!(session = session_id, error = %e, "Statement from chat turn failed");
                    turn.error = Some(e.to_string());
                }
            }
        }

        Ok(turn)
    }

    /// Forget a session's history; returns whether it existed
    pub async fn clear(&self, session_id: &str) -> bool {
        let existed = self.sessions.clear(session_id).await;
        info!(session = session_id, existed, "Conversation history cleared");
        existed
    }

    /// Table metadata by full or bare name
    pub async fn describe_table(&self, name: &str) -> Result<TableInfo> {
        self.catalog
            .find_table(name)
            .await?
            .ok_or_else(|| QueryAgentError::NotFound(format!("Table not found: {}", name)))
    }

    /// Stored procedure metadata by full or bare name
    pub async fn describe_procedure(&self, name: &str) -> Result<StoredProcedureInfo> {
        self.catalog.find_procedure(name).await?.ok_or_else(|| {
            QueryAgentError::NotFound(format!("Stored procedure not found: {}", name))
        })
    }
}
