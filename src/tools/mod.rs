//! Agent tool surface
//!
//! Five stateless operations for an agent runtime. They share the catalog and the
//! execution gateway with the conversational path, so the same safety gate applies
//! on both. Every outcome, including failures, is a [`ToolOutput`].

pub mod format;
pub mod service;

use crate::database::executor::DEFAULT_PREVIEW_LIMIT;
use crate::database::{ExecutionGateway, ParamValue, RenderOptions, SchemaCatalog};
use crate::error::QueryAgentError;
use format::CellStyle;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Text result of a tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Failure text; rejections are shown as warnings without the context prefix
    fn failure(context: &str, error: &QueryAgentError) -> Self {
        match error {
            QueryAgentError::Rejected(rejection) => Self::error(format!("⚠️ {}", rejection)),
            other => Self::error(format!("{}: {}", context, other)),
        }
    }
}

/// Stateless tool operations
pub struct ToolSurface {
    catalog: Arc<SchemaCatalog>,
    gateway: Arc<ExecutionGateway>,
}

impl ToolSurface {
    pub fn new(catalog: Arc<SchemaCatalog>, gateway: Arc<ExecutionGateway>) -> Self {
        Self { catalog, gateway }
    }

    /// Full rendered catalog
    pub async fn get_schema(&self) -> ToolOutput {
        match self.catalog.render(&RenderOptions::default()).await {
            Ok(text) => ToolOutput::ok(text),
            Err(e) => ToolOutput::failure("Schema lookup failed", &e),
        }
    }

    /// Run a gated statement
    pub async fn execute_query(&self, query: &str, cancel: Option<&CancellationToken>) -> ToolOutput {
        match self.gateway.run_checked(query, cancel).await {
            Ok(output) if output.is_empty() => {
                ToolOutput::ok("Query executed but returned no rows. (0 rows)")
            }
            Ok(output) => ToolOutput::ok(format!(
                "Result: {} rows\n\n{}",
                output.row_count(),
                format::render_rows(&output, CellStyle::Full)
            )),
            Err(e) => {
                warn!(error = %e, "execute_query failed");
                ToolOutput::failure("Query failed", &e)
            }
        }
    }

    /// Procedure signatures with descriptions
    pub async fn get_stored_procedures(&self) -> ToolOutput {
        let snapshot = match self.catalog.load(false).await {
            Ok(snapshot) => snapshot,
            Err(e) => return ToolOutput::failure("Stored procedure listing failed", &e),
        };

        let mut text = String::from("=== STORED PROCEDURES ===\n\n");
        if snapshot.stored_procedures.is_empty() {
            text.push_str("(no stored procedures)\n");
        }
        for procedure in snapshot.stored_procedures.values() {
            text.push_str(&procedure.signature());
            text.push('\n');
            if let Some(ref description) = procedure.description {
                text.push_str(&format!("  -- {}\n", description));
            }
            text.push('\n');
        }
        ToolOutput::ok(text)
    }

    /// Execute a procedure, gated on its name
    pub async fn execute_stored_procedure(
        &self,
        procedure: &str,
        params: &BTreeMap<String, ParamValue>,
        cancel: Option<&CancellationToken>,
    ) -> ToolOutput {
        match self.gateway.execute_procedure(procedure, params, cancel).await {
            Ok(output) if output.is_empty() => {
                ToolOutput::ok(format!("{} executed (no results)", procedure))
            }
            Ok(output) => ToolOutput::ok(format!(
                "{} result: {} rows\n\n{}",
                procedure,
                output.row_count(),
                format::render_rows(&output, CellStyle::Full)
            )),
            Err(e) => {
                warn!(procedure, error = %e, "execute_stored_procedure failed");
                ToolOutput::failure("Stored procedure execution failed", &e)
            }
        }
    }

    /// First rows of a table; limit defaults to 10 and is clamped into 1..=100
    pub async fn preview_table(
        &self,
        table: &str,
        limit: Option<i64>,
        cancel: Option<&CancellationToken>,
    ) -> ToolOutput {
        let limit = limit.unwrap_or(DEFAULT_PREVIEW_LIMIT);
        match self.gateway.preview(table, limit, cancel).await {
            Ok(output) if output.is_empty() => ToolOutput::ok(format!("{} has no rows.", table)),
            Ok(output) => ToolOutput::ok(format!(
                "{} preview ({} rows)\n\n{}",
                table,
                output.row_count(),
                format::render_rows(&output, CellStyle::Truncated)
            )),
            Err(e) => ToolOutput::failure("Table preview failed", &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{QueryOutput, SqlBackend, SqlValue};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers every statement with the same rows and records what it saw
    struct RowsBackend {
        rows: usize,
        stall: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlBackend for RowsBackend {
        async fn run(&self, sql: &str) -> Result<QueryOutput> {
            self.seen.lock().unwrap().push(sql.to_string());
            if self.stall {
                std::future::pending::<()>().await;
            }
            if sql.contains("Missing") {
                return Err(QueryAgentError::Database("Invalid object name 'Missing'".to_string()));
            }
            Ok(QueryOutput::new(
                vec!["Id".to_string(), "Bio".to_string()],
                (0..self.rows)
                    .map(|i| vec![SqlValue::Int(i as i64), SqlValue::Text("z".repeat(60))])
                    .collect(),
            ))
        }
    }

    fn surface_with(rows: usize, stall: bool) -> (ToolSurface, Arc<RowsBackend>) {
        let backend = Arc::new(RowsBackend {
            rows,
            stall,
            seen: Mutex::new(Vec::new()),
        });
        let catalog = Arc::new(SchemaCatalog::new(backend.clone()));
        let gateway = Arc::new(ExecutionGateway::new(backend.clone(), Duration::from_secs(5)));
        (ToolSurface::new(catalog, gateway), backend)
    }

    fn surface(rows: usize) -> (ToolSurface, Arc<RowsBackend>) {
        surface_with(rows, false)
    }

    #[tokio::test]
    async fn test_execute_query_header_and_rows() {
        let (tools, _) = surface(3);
        let out = tools.execute_query("SELECT Id, Bio FROM dbo.Users", None).await;
        assert!(!out.is_error);
        assert!(out.text.starts_with("Result: 3 rows\n\nId | Bio\n--- | ---\n0 | "));
        assert!(out.text.contains(&"z".repeat(60)));
    }

    #[tokio::test]
    async fn test_rejected_query_is_error_without_round_trip() {
        let (tools, backend) = surface(3);
        let out = tools.execute_query("drop table Foo", None).await;
        assert!(out.is_error);
        assert!(out.text.starts_with("⚠️ Dangerous query detected"));
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result() {
        let (tools, _) = surface(0);
        let out = tools.execute_query("SELECT * FROM dbo.Users WHERE 1 = 0", None).await;
        assert_eq!(out, ToolOutput::ok("Query executed but returned no rows. (0 rows)"));
    }

    #[tokio::test]
    async fn test_database_error_is_tool_error() {
        let (tools, _) = surface(1);
        let out = tools.execute_query("SELECT * FROM Missing", None).await;
        assert!(out.is_error);
        assert!(out.text.starts_with("Query failed: Database error: Invalid object name"));
    }

    #[tokio::test]
    async fn test_preview_truncates_and_defaults() {
        let (tools, backend) = surface(2);
        let out = tools.preview_table("dbo.Users", None, None).await;
        assert!(out.text.starts_with("dbo.Users preview (2 rows)"));
        assert!(out.text.contains(&format!("{}...", "z".repeat(47))));
        assert!(!out.text.contains(&"z".repeat(48)));
        assert_eq!(
            backend.seen.lock().unwrap().as_slice(),
            ["SELECT TOP 10 * FROM dbo.Users".to_string()]
        );
    }

    #[tokio::test]
    async fn test_procedure_gated_and_formatted() {
        let (tools, backend) = surface(1);
        let out = tools
            .execute_stored_procedure("master.dbo.sp_who", &BTreeMap::new(), None)
            .await;
        assert!(out.is_error);
        assert!(backend.seen.lock().unwrap().is_empty());

        let params: BTreeMap<String, ParamValue> =
            serde_json::from_value(serde_json::json!({"name": "O'Hara", "id": 7})).unwrap();
        let out = tools.execute_stored_procedure("dbo.GetUser", &params, None).await;
        assert!(out.text.starts_with("dbo.GetUser result: 1 rows"));
        assert_eq!(
            backend.seen.lock().unwrap().as_slice(),
            ["EXEC dbo.GetUser @id = 7, @name = N'O''Hara'".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancelled_query_is_tool_error() {
        let (tools, backend) = surface_with(1, true);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let out = tools.execute_query("SELECT * FROM dbo.Users", Some(&token)).await;
        assert_eq!(
            out,
            ToolOutput::error("Query failed: Cancelled: statement execution")
        );
        assert_eq!(backend.seen.lock().unwrap().len(), 1);
    }
}
