//! MCP tool server
//!
//! Publishes the [`ToolSurface`] operations as Model Context Protocol tools. The
//! stdio transport speaks newline-delimited JSON-RPC: `initialize`, `tools/list`
//! and `tools/call`. A `notifications/cancelled` for an in-flight call fires the
//! request's cancellation token, which abandons the running statement.

use crate::database::ParamValue;
use crate::error::QueryAgentError;
use crate::tools::{ToolOutput, ToolSurface};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, ErrorData, tool_router, RoleServer, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Input for `execute_query`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// SQL statement to run
    pub query: String,
}

/// Input for `execute_stored_procedure`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteProcedureInput {
    /// Procedure name, e.g. dbo.GetUsers
    pub procedure: String,
    /// Parameter values by name, e.g. {"userId": 1, "status": "active"}
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

/// Input for `preview_table`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PreviewTableInput {
    /// Table name, e.g. dbo.Users
    pub table: String,
    /// Rows to return (default 10, max 100)
    #[serde(default)]
    pub limit: Option<i64>,
}

impl From<ToolOutput> for CallToolResult {
    fn from(output: ToolOutput) -> Self {
        let content = vec![Content::text(output.text)];
        if output.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

/// MCP handler wrapping the tool surface
#[derive(Clone)]
pub struct QueryToolService {
    surface: Arc<ToolSurface>,
    /// Tool router for MCP tool dispatch (generated)
    tool_router: ToolRouter<Self>,
}

impl QueryToolService {
    pub fn new(surface: Arc<ToolSurface>) -> Self {
        Self {
            surface,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl QueryToolService {
    #[tool(
        description = "Show the database tables, columns, relationships, stored procedures and views.\nUse it to find out which tables exist and how they are structured."
    )]
    async fn get_schema(&self) -> std::result::Result<CallToolResult, ErrorData> {
        debug!(tool = "get_schema", "Tool invoked");
        Ok(self.surface.get_schema().await.into())
    }

    #[tool(
        description = "Run a SQL query and return the rows.\nDROP, TRUNCATE, DELETE and other destructive statements are blocked."
    )]
    async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        debug!(tool = "execute_query", "Tool invoked");
        Ok(self.surface
            .execute_query(&input.query, Some(&context.ct))
            .await
            .into())
    }

    #[tool(description = "List the stored procedures with their parameters.")]
    async fn get_stored_procedures(&self) -> std::result::Result<CallToolResult, ErrorData> {
        debug!(tool = "get_stored_procedures", "Tool invoked");
        Ok(self.surface.get_stored_procedures().await.into())
    }

    #[tool(
        description = "Execute a stored procedure with named parameters and return its result."
    )]
    async fn execute_stored_procedure(
        &self,
        Parameters(input): Parameters<ExecuteProcedureInput>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        debug!(tool = "execute_stored_procedure", procedure = %input.procedure, "Tool invoked");
        Ok(self.surface
            .execute_stored_procedure(&input.procedure, &input.params, Some(&context.ct))
            .await
            .into())
    }

    #[tool(description = "Show sample rows of a table.")]
    async fn preview_table(
        &self,
        Parameters(input): Parameters<PreviewTableInput>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        debug!(tool = "preview_table", table = %input.table, "Tool invoked");
        Ok(self.surface
            .preview_table(&input.table, input.limit, Some(&context.ct))
            .await
            .into())
    }
}

#[tool_handler]
impl ServerHandler for QueryToolService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "query-agent".to_owned(),
                title: Some("Query-Agent SQL Server tools".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "SQL Server tools.\n\
                \n\
                ## Workflow\n\
                1. Call `get_schema` to see the tables, columns and relationships\n\
                2. Use `execute_query` for SELECT statements, or `preview_table` for sample rows\n\
                3. Use `get_stored_procedures` and `execute_stored_procedure` for procedures\n\
                \n\
                Destructive statements (DROP, TRUNCATE, DELETE, ...) are rejected."
                    .to_string(),
            ),
        }
    }
}

/// Serve the tools on stdin/stdout until the client disconnects
pub async fn run_stdio(surface: Arc<ToolSurface>) -> crate::error::Result<()> {
    info!("Starting MCP tool server on stdio");

    let running = QueryToolService::new(surface)
        .serve(stdio())
        .await
        .map_err(|e| {
            QueryAgentError::Transport(format!("failed to start stdio transport: {}", e))
        })?;

    let reason = running
        .waiting()
        .await
        .map_err(|e| QueryAgentError::Transport(e.to_string()))?;
    info!(?reason, "Tool server stopped");
    Ok(())
}
