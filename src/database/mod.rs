//! Database module
//!
//! This module provides the SQL Server connection pool, the schema catalog
//! cache, the statement safety gate and the execution gateway.

pub mod cache;
pub mod connection;
pub mod executor;
pub mod guard;
pub mod indexer;
pub mod schema;
pub mod value;

// Re-exports
pub use cache::{RefreshStats, SchemaCatalog};
pub use connection::{MssqlPool, SqlBackend};
pub use executor::{ExecutionGateway, ParamValue};
pub use guard::{GateRule, Rejection, Verdict};
pub use schema::{
    ColumnInfo, ParameterInfo, ProcedureSummary, RenderOptions, SchemaSnapshot,
    StoredProcedureInfo, TableInfo, TableSummary, ViewInfo,
};
pub use value::{QueryOutput, ResultSet, SqlValue};
