//! Database connection abstraction
//!
//! This module provides the [`SqlBackend`] seam used by the schema catalog and the
//! execution gateway, and its SQL Server implementation: one lazily-built, bounded
//! connection pool (bb8 over tiberius) shared by the whole process.

use crate::config::DatabaseSettings;
use crate::database::value::{QueryOutput, SqlValue};
use crate::error::Result;
use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::time::Duration;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Row};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// Anything that can run a statement and hand back raw rows
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Run one statement batch and return its first result set plus affected-row counts
    async fn run(&self, sql: &str) -> Result<QueryOutput>;

    /// Connectivity check
    async fn ping(&self) -> Result<()> {
        self.run("SELECT 1 AS test").await.map(|_| ())
    }
}

/// bb8 manager producing TDS clients
pub struct TdsConnectionManager {
    config: Config,
}

impl TdsConnectionManager {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ManageConnection for TdsConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server connection pool
///
/// The pool itself is created on first use; connections are opened on demand
/// (no minimum kept warm) and recycled after the configured idle timeout.
pub struct MssqlPool {
    settings: DatabaseSettings,
    pool: OnceCell<Pool<TdsConnectionManager>>,
}

impl MssqlPool {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            pool: OnceCell::new(),
        }
    }

    /// Human-readable target, never includes credentials
    pub fn target(&self) -> String {
        format!(
            "{}:{}/{}",
            self.settings.host, self.settings.port, self.settings.database
        )
    }

    fn tds_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.settings.host);
        config.port(self.settings.port);
        config.database(&self.settings.database);
        if let (Some(user), Some(password)) = (&self.settings.user, &self.settings.password) {
            config.authentication(AuthMethod::sql_server(user, password));
        }
        config.trust_cert();
        config.encryption(if self.settings.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        config
    }

    async fn pool(&self) -> &Pool<TdsConnectionManager> {
        self.pool
            .get_or_init(|| async {
                info!(
                    target_db = %self.target(),
                    max_size = self.settings.pool_max_size,
                    "Creating SQL Server connection pool"
                );
                Pool::builder()
                    .max_size(self.settings.pool_max_size)
                    .min_idle(None)
                    .idle_timeout(Some(Duration::from_secs(self.settings.pool_idle_timeout_secs)))
                    .connection_timeout(Duration::from_secs(self.settings.pool_acquire_timeout_secs))
                    .build_unchecked(TdsConnectionManager::new(self.tds_config()))
            })
            .await
    }
}

#[async_trait]
impl SqlBackend for MssqlPool {
    async fn run(&self, sql: &str) -> Result<QueryOutput> {
        let pool = self.pool().await;
        let mut conn = pool.get().await?;

        if is_row_count_statement(sql) {
            let result = conn.execute(sql, &[]).await?;
            debug!(rows_affected = ?result.rows_affected(), "Statement executed");
            return Ok(QueryOutput {
                columns: Vec::new(),
                rows: Vec::new(),
                rows_affected: result.rows_affected().to_vec(),
            });
        }

        let mut stream = conn.simple_query(sql).await?;
        let columns: Vec<String> = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let result_sets = stream.into_results().await?;

        let rows_affected = if result_sets.is_empty() {
            vec![0]
        } else {
            result_sets.iter().map(|set| set.len() as u64).collect()
        };
        let rows = result_sets
            .into_iter()
            .next()
            .unwrap_or_default()
            .iter()
            .map(convert_row)
            .collect();

        Ok(QueryOutput {
            columns,
            rows,
            rows_affected,
        })
    }
}

/// Single DML statement whose only output is the affected-row count
///
/// DML with an `OUTPUT` clause, or a batch with more statements after the
/// first, yields result sets and goes through the query path instead.
fn is_row_count_statement(sql: &str) -> bool {
    let text = sql.trim();
    let first = text
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if !matches!(first.as_str(), "INSERT" | "UPDATE" | "DELETE" | "MERGE") {
        return false;
    }

    let has_output = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case("OUTPUT"));
    let single_statement = !text.trim_end_matches(';').contains(';');
    !has_output && single_statement
}

fn convert_row(row: &Row) -> Vec<SqlValue> {
    row.cells()
        .enumerate()
        .map(|(idx, (_, data))| convert_cell(row, idx, data))
        .collect()
}

fn convert_cell(row: &Row, idx: usize, data: &ColumnData<'static>) -> SqlValue {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| SqlValue::Guid(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Numeric(v) => v.as_ref().map(|n| SqlValue::Decimal(n.to_string())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlValue::Text(x.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::DateTime),
        ColumnData::Date(_) => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Date),
        ColumnData::Time(_) => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Time),
        ColumnData::DateTimeOffset(_) => row
            .try_get::<DateTime<FixedOffset>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::DateTimeOffset),
        #[allow(unreachable_patterns)]
        _ => None,
    };
    value.unwrap_or(SqlValue::Null)
}
