//! Execution gateway
//!
//! Runs statements against the shared backend under a per-call deadline and an
//! optional cancellation token. Row values come back raw ([`QueryOutput`]);
//! rendering decides how NULLs and timestamps are shown.

use crate::database::connection::SqlBackend;
use crate::database::guard;
use crate::database::value::QueryOutput;
use crate::error::{QueryAgentError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Row cap for previews and rendered results
pub const MAX_ROWS: usize = 100;

/// Preview size when the caller gives none
pub const DEFAULT_PREVIEW_LIMIT: i64 = 10;

/// Literal value for a stored procedure argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl ParamValue {
    /// SQL literal; strings are quoted with embedded quotes doubled
    pub fn to_sql_literal(&self) -> String {
        match self {
            ParamValue::Null => "NULL".to_string(),
            ParamValue::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            ParamValue::Number(n) => n.to_string(),
            ParamValue::Text(s) => format!("N'{}'", s.replace('\'', "''")),
        }
    }
}

/// Clamp a requested row limit into `1..=100`
pub fn clamp_limit(limit: i64) -> u32 {
    limit.clamp(1, MAX_ROWS as i64) as u32
}

/// Build `EXEC name @a = 1, @b = N'x'` from a vetted name and parameters
pub fn build_procedure_call(name: &str, params: &BTreeMap<String, ParamValue>) -> Result<String> {
    let name = guard::validate_identifier(name)?;
    let mut sql = format!("EXEC {}", name);

    let args = params
        .iter()
        .map(|(key, value)| {
            guard::validate_parameter_name(key)
                .map(|key| format!("@{} = {}", key, value.to_sql_literal()))
        })
        .collect::<Result<Vec<_>>>()?;

    if !args.is_empty() {
        sql.push(' ');
        sql.push_str(&args.join(", "));
    }
    Ok(sql)
}

/// Runs vetted statements against the database
pub struct ExecutionGateway {
    backend: Arc<dyn SqlBackend>,
    timeout: Duration,
}

impl ExecutionGateway {
    /// Create a gateway
    ///
    /// # Arguments
    /// * `backend` - Shared statement runner (one pool per process)
    /// * `timeout` - Deadline applied to every call
    pub fn new(backend: Arc<dyn SqlBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a statement that has already passed the safety gate
    pub async fn run(&self, sql: &str) -> Result<QueryOutput> {
        self.run_with(sql, None).await
    }

    /// Run a statement that may be abandoned by the caller
    pub async fn run_cancellable(&self, sql: &str, cancel: &CancellationToken) -> Result<QueryOutput> {
        self.run_with(sql, Some(cancel)).await
    }

    /// Gate free statement text, then run it
    ///
    /// A rejected statement never reaches the backend.
    pub async fn run_checked(
        &self,
        sql: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryOutput> {
        if let guard::Verdict::Reject(rejection) = guard::evaluate(sql) {
            warn!(reason = rejection.reason(), "Statement rejected");
            return Err(rejection.into());
        }
        self.run_with(sql, cancel).await
    }

    /// First `limit` rows of a table, limit clamped into `1..=100`
    pub async fn preview(
        &self,
        table: &str,
        limit: i64,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryOutput> {
        let table = guard::validate_identifier(table)?;
        let sql = format!("SELECT TOP {} * FROM {}", clamp_limit(limit), table);
        self.run_with(&sql, cancel).await
    }

    /// Gate the procedure name, then execute it with literal arguments
    pub async fn execute_procedure(
        &self,
        name: &str,
        params: &BTreeMap<String, ParamValue>,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryOutput> {
        if let guard::Verdict::Reject(rejection) = guard::evaluate_procedure_name(name) {
            warn!(procedure = name, reason = rejection.reason(), "Procedure rejected");
            return Err(rejection.into());
        }
        let sql = build_procedure_call(name, params)?;
        self.run_with(&sql, cancel).await
    }

    /// Connectivity check under the same deadline
    pub async fn ping(&self) -> Result<()> {
        tokio::time::timeout(self.timeout, self.backend.ping())
            .await
            .map_err(|_| self.timeout_error("ping"))?
    }

    async fn run_with(&self, sql: &str, cancel: Option<&CancellationToken>) -> Result<QueryOutput> {
        debug!(sql, "Executing statement");
        let started = Instant::now();
        let call = tokio::time::timeout(self.timeout, self.backend.run(sql));

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(QueryAgentError::Cancelled("statement execution".to_string()));
                    }
                    outcome = call => outcome,
                }
            }
            None => call.await,
        };

        let output = outcome.map_err(|_| self.timeout_error("statement execution"))??;
        debug!(
            rows = output.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Statement executed"
        );
        Ok(output)
    }

    fn timeout_error(&self, operation: &str) -> QueryAgentError {
        QueryAgentError::Timeout {
            operation: operation.to_string(),
            secs: self.timeout.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        statements: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl RecordingBackend {
        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlBackend for RecordingBackend {
        async fn run(&self, sql: &str) -> Result<QueryOutput> {
            self.statements.lock().unwrap().push(sql.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(QueryOutput::default())
        }
    }

    fn gateway(backend: Arc<RecordingBackend>) -> ExecutionGateway {
        ExecutionGateway::new(backend, Duration::from_secs(5))
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(500), 100);
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(-3), 1);
        assert_eq!(clamp_limit(25), 25);
    }

    #[test]
    fn test_build_procedure_call() {
        let mut params = BTreeMap::new();
        params.insert("@Name".to_string(), ParamValue::Text("O'Brien".to_string()));
        params.insert("Limit".to_string(), ParamValue::Number(5.into()));
        params.insert("Since".to_string(), ParamValue::Null);

        let sql = build_procedure_call("dbo.FindUsers", &params).unwrap();
        assert_eq!(
            sql,
            "EXEC dbo.FindUsers @Name = N'O''Brien', @Limit = 5, @Since = NULL"
        );

        assert_eq!(build_procedure_call("dbo.Ping", &BTreeMap::new()).unwrap(), "EXEC dbo.Ping");
        assert!(build_procedure_call("dbo.Ping; DROP TABLE x", &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_param_value_from_json() {
        let params: BTreeMap<String, ParamValue> =
            serde_json::from_str(r#"{"a": null, "b": 2.5, "c": "x", "d": true}"#).unwrap();
        assert_eq!(params["a"], ParamValue::Null);
        assert_eq!(params["b"].to_sql_literal(), "2.5");
        assert_eq!(params["c"].to_sql_literal(), "N'x'");
        assert_eq!(params["d"].to_sql_literal(), "1");
    }

    #[tokio::test]
    async fn test_preview_clamps() {
        let backend = Arc::new(RecordingBackend::default());
        let gateway = gateway(backend.clone());

        gateway.preview("dbo.Users", 500, None).await.unwrap();
        gateway.preview("dbo.Users", 0, None).await.unwrap();

        assert_eq!(
            backend.statements(),
            vec![
                "SELECT TOP 100 * FROM dbo.Users".to_string(),
                "SELECT TOP 1 * FROM dbo.Users".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_preview_rejects_bad_identifier() {
        let backend = Arc::new(RecordingBackend::default());
        let err = gateway(backend.clone())
            .preview("Users; DROP TABLE Users", 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryAgentError::InvalidIdentifier(_)));
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_statement_never_reaches_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let gateway = gateway(backend.clone());

        assert!(gateway.run_checked("DROP TABLE Users", None).await.is_err());
        assert!(gateway
            .execute_procedure("xp_cmdshell", &BTreeMap::new(), None)
            .await
            .is_err());
        assert!(backend.statements().is_empty());

        gateway.run_checked("SELECT 1", None).await.unwrap();
        assert_eq!(backend.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_deadline() {
        let backend = Arc::new(RecordingBackend {
            delay: Some(Duration::from_millis(200)),
            ..RecordingBackend::default()
        });
        let gateway = ExecutionGateway::new(backend, Duration::from_millis(20));

        let err = gateway.run("SELECT 1").await.unwrap_err();
        assert!(matches!(err, QueryAgentError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let backend = Arc::new(RecordingBackend {
            delay: Some(Duration::from_millis(500)),
            ..RecordingBackend::default()
        });
        let gateway = gateway(backend);
        let token = CancellationToken::new();
        token.cancel();

        let err = gateway.run_cancellable("SELECT 1", &token).await.unwrap_err();
        assert!(matches!(err, QueryAgentError::Cancelled(_)));
    }
}
