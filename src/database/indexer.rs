//! Schema Indexer
//!
//! This module scans the SQL Server system catalogs and turns the raw rows into
//! catalog entities. Each scan is one statement, so the three scans and the
//! checksum can run concurrently on separate pooled connections.

use crate::database::connection::SqlBackend;
use crate::database::schema::{ColumnInfo, ParameterInfo, StoredProcedureInfo, TableInfo, ViewInfo};
use crate::database::value::{QueryOutput, Record};
use crate::error::{QueryAgentError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Base tables with columns, primary-key flags and foreign-key targets
pub const TABLES_QUERY: &str = r#"
SELECT
    t.TABLE_SCHEMA,
    t.TABLE_NAME,
    c.COLUMN_NAME,
    c.DATA_TYPE,
    c.IS_NULLABLE,
    c.CHARACTER_MAXIMUM_LENGTH,
    CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS IS_PRIMARY,
    fk.REFERENCED_TABLE_SCHEMA,
    fk.REFERENCED_TABLE_NAME,
    fk.REFERENCED_COLUMN_NAME
FROM INFORMATION_SCHEMA.TABLES t
JOIN INFORMATION_SCHEMA.COLUMNS c
    ON t.TABLE_NAME = c.TABLE_NAME AND t.TABLE_SCHEMA = c.TABLE_SCHEMA
LEFT JOIN (
    SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
        ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
        AND tc.CONSTRAINT_SCHEMA = ku.CONSTRAINT_SCHEMA
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
) pk ON c.TABLE_SCHEMA = pk.TABLE_SCHEMA
    AND c.TABLE_NAME = pk.TABLE_NAME
    AND c.COLUMN_NAME = pk.COLUMN_NAME
LEFT JOIN (
    SELECT
        cu.TABLE_SCHEMA,
        cu.TABLE_NAME,
        cu.COLUMN_NAME,
        ku.TABLE_SCHEMA AS REFERENCED_TABLE_SCHEMA,
        ku.TABLE_NAME AS REFERENCED_TABLE_NAME,
        ku.COLUMN_NAME AS REFERENCED_COLUMN_NAME
    FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
    JOIN INFORMATION_SCHEMA.CONSTRAINT_COLUMN_USAGE cu
        ON rc.CONSTRAINT_NAME = cu.CONSTRAINT_NAME
        AND rc.CONSTRAINT_SCHEMA = cu.CONSTRAINT_SCHEMA
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
        ON rc.UNIQUE_CONSTRAINT_NAME = ku.CONSTRAINT_NAME
        AND rc.UNIQUE_CONSTRAINT_SCHEMA = ku.CONSTRAINT_SCHEMA
) fk ON c.TABLE_SCHEMA = fk.TABLE_SCHEMA
    AND c.TABLE_NAME = fk.TABLE_NAME
    AND c.COLUMN_NAME = fk.COLUMN_NAME
WHERE t.TABLE_TYPE = 'BASE TABLE'
ORDER BY t.TABLE_SCHEMA, t.TABLE_NAME, c.ORDINAL_POSITION
"#;

/// User stored procedures with parameters and `MS_Description`
pub const PROCEDURES_QUERY: &str = r#"
SELECT
    SCHEMA_NAME(p.schema_id) AS SCHEMA_NAME,
    p.name AS PROCEDURE_NAME,
    par.name AS PARAMETER_NAME,
    TYPE_NAME(par.user_type_id) AS DATA_TYPE,
    par.max_length AS MAX_LENGTH,
    par.is_output AS IS_OUTPUT,
    CAST(ep.value AS nvarchar(4000)) AS DESCRIPTION
FROM sys.procedures p
LEFT JOIN sys.parameters par ON p.object_id = par.object_id
LEFT JOIN sys.extended_properties ep
    ON p.object_id = ep.major_id AND ep.name = 'MS_Description' AND ep.minor_id = 0
WHERE p.is_ms_shipped = 0
ORDER BY SCHEMA_NAME(p.schema_id), p.name, par.parameter_id
"#;

/// Views with their columns
pub const VIEWS_QUERY: &str = r#"
SELECT
    v.TABLE_SCHEMA,
    v.TABLE_NAME,
    c.COLUMN_NAME,
    c.DATA_TYPE,
    c.IS_NULLABLE,
    c.CHARACTER_MAXIMUM_LENGTH
FROM INFORMATION_SCHEMA.VIEWS v
JOIN INFORMATION_SCHEMA.COLUMNS c
    ON v.TABLE_NAME = c.TABLE_NAME AND v.TABLE_SCHEMA = c.TABLE_SCHEMA
ORDER BY v.TABLE_SCHEMA, v.TABLE_NAME, c.ORDINAL_POSITION
"#;

/// Change fingerprint: SHA-256 over every column definition, SHA-256 over every
/// procedure's modify date, and the latest modify date of any table, procedure or view
pub const CHECKSUM_QUERY: &str = r#"
SELECT
    CONVERT(varchar(64), HASHBYTES('SHA2_256', ISNULL((
        SELECT STRING_AGG(CONVERT(nvarchar(max), CONCAT(
                c.TABLE_SCHEMA, '.', c.TABLE_NAME, '.', c.COLUMN_NAME, ':',
                c.DATA_TYPE, ':', ISNULL(c.CHARACTER_MAXIMUM_LENGTH, 0))), N'|')
            WITHIN GROUP (ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION)
        FROM INFORMATION_SCHEMA.TABLES t
        JOIN INFORMATION_SCHEMA.COLUMNS c
            ON t.TABLE_NAME = c.TABLE_NAME AND t.TABLE_SCHEMA = c.TABLE_SCHEMA
        WHERE t.TABLE_TYPE = 'BASE TABLE'
    ), N'')), 2) AS TABLES_HASH,
    CONVERT(varchar(64), HASHBYTES('SHA2_256', ISNULL((
        SELECT STRING_AGG(CONVERT(nvarchar(max), CONCAT(
                SCHEMA_NAME(schema_id), '.', name, ':', CONVERT(varchar(33), modify_date, 126))), N'|')
            WITHIN GROUP (ORDER BY SCHEMA_NAME(schema_id), name)
        FROM sys.procedures
    ), N'')), 2) AS PROCEDURES_HASH,
    CONVERT(varchar(33), (
        SELECT MAX(modify_date) FROM sys.objects WHERE type IN ('U', 'P', 'V')
    ), 126) AS LAST_MODIFIED
"#;

/// Scan base tables
pub async fn scan_tables(backend: &dyn SqlBackend) -> Result<Vec<TableInfo>> {
    let output = backend.run(TABLES_QUERY).await?;
    let tables = decode_tables(&output);
    debug!(count = tables.len(), "Scanned tables");
    Ok(tables)
}

/// Scan stored procedures
pub async fn scan_procedures(backend: &dyn SqlBackend) -> Result<Vec<StoredProcedureInfo>> {
    let output = backend.run(PROCEDURES_QUERY).await?;
    let procedures = decode_procedures(&output);
    debug!(count = procedures.len(), "Scanned stored procedures");
    Ok(procedures)
}

/// Scan views
pub async fn scan_views(backend: &dyn SqlBackend) -> Result<Vec<ViewInfo>> {
    let output = backend.run(VIEWS_QUERY).await?;
    let views = decode_views(&output);
    debug!(count = views.len(), "Scanned views");
    Ok(views)
}

/// Compute the current change fingerprint
pub async fn fetch_checksum(backend: &dyn SqlBackend) -> Result<String> {
    let output = backend.run(CHECKSUM_QUERY).await?;
    decode_checksum(&output)
}

/// Group column rows into tables, preserving row order
pub fn decode_tables(output: &QueryOutput) -> Vec<TableInfo> {
    group_columns(output, |record| {
        let referenced_table = record.get_str("REFERENCED_TABLE_NAME");
        let foreign_key_ref = referenced_table.map(|table| {
            format!(
                "{}.{}.{}",
                record.get_string("REFERENCED_TABLE_SCHEMA"),
                table,
                record.get_string("REFERENCED_COLUMN_NAME")
            )
        });

        ColumnInfo {
            name: record.get_string("COLUMN_NAME"),
            data_type: record.get_string("DATA_TYPE"),
            max_length: record.get_i64("CHARACTER_MAXIMUM_LENGTH"),
            is_nullable: record.get_bool("IS_NULLABLE"),
            is_primary_key: record.get_bool("IS_PRIMARY"),
            is_foreign_key: foreign_key_ref.is_some(),
            foreign_key_ref,
        }
    })
}

/// Group column rows into views; view columns carry no key semantics
pub fn decode_views(output: &QueryOutput) -> Vec<ViewInfo> {
    group_columns(output, |record| ColumnInfo {
        max_length: record.get_i64("CHARACTER_MAXIMUM_LENGTH"),
        is_nullable: record.get_bool("IS_NULLABLE"),
        ..ColumnInfo::new(record.get_string("COLUMN_NAME"), record.get_string("DATA_TYPE"))
    })
}

fn group_columns<F>(output: &QueryOutput, column: F) -> Vec<TableInfo>
where
    F: Fn(&Record<'_>) -> ColumnInfo,
{
    let mut order: Vec<String> = Vec::new();
    let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();

    for record in output.records() {
        let table = TableInfo::new(
            record.get_string("TABLE_SCHEMA"),
            record.get_string("TABLE_NAME"),
        );
        let entry = tables.entry(table.full_name.clone()).or_insert_with(|| {
            order.push(table.full_name.clone());
            table
        });

        let column = column(&record);
        // A column in two constraints comes back twice; keep the first row
        if entry.get_column(&column.name).is_none() {
            entry.columns.push(column);
        }
    }

    order
        .into_iter()
        .filter_map(|name| tables.remove(&name))
        .collect()
}

/// Group parameter rows into procedures; procedures without parameters have one NULL row
pub fn decode_procedures(output: &QueryOutput) -> Vec<StoredProcedureInfo> {
    let mut order: Vec<String> = Vec::new();
    let mut procedures: BTreeMap<String, StoredProcedureInfo> = BTreeMap::new();

    for record in output.records() {
        let mut procedure = StoredProcedureInfo::new(
            record.get_string("SCHEMA_NAME"),
            record.get_string("PROCEDURE_NAME"),
        );
        procedure.description = record
            .get_str("DESCRIPTION")
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string);

        let entry = procedures
            .entry(procedure.full_name.clone())
            .or_insert_with(|| {
                order.push(procedure.full_name.clone());
                procedure
            });

        if let Some(name) = record.get_str("PARAMETER_NAME").filter(|n| !n.is_empty()) {
            entry.parameters.push(ParameterInfo {
                name: name.to_string(),
                data_type: record.get_string("DATA_TYPE"),
                max_length: record.get_i64("MAX_LENGTH"),
                is_output: record.get_bool("IS_OUTPUT"),
            });
        }
    }

    order
        .into_iter()
        .filter_map(|name| procedures.remove(&name))
        .collect()
}

/// Combine the three fingerprint parts into one opaque string
pub fn decode_checksum(output: &QueryOutput) -> Result<String> {
    let record = output.records().next().ok_or_else(|| {
        QueryAgentError::Database("checksum query returned no rows".to_string())
    })?;

    Ok(format!(
        "{}-{}-{}",
        record.get_string("TABLES_HASH"),
        record.get_string("PROCEDURES_HASH"),
        record.get_string("LAST_MODIFIED")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::value::SqlValue;

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_tables() {
        let output = QueryOutput::new(
            columns(&[
                "TABLE_SCHEMA",
                "TABLE_NAME",
                "COLUMN_NAME",
                "DATA_TYPE",
                "IS_NULLABLE",
                "CHARACTER_MAXIMUM_LENGTH",
                "IS_PRIMARY",
                "REFERENCED_TABLE_SCHEMA",
                "REFERENCED_TABLE_NAME",
                "REFERENCED_COLUMN_NAME",
            ]),
            vec![
                vec![
                    text("dbo"), text("Users"), text("Id"), text("int"), text("NO"),
                    SqlValue::Null, SqlValue::Int(1), SqlValue::Null, SqlValue::Null, SqlValue::Null,
                ],
                vec![
                    text("dbo"), text("Users"), text("Email"), text("nvarchar"), text("YES"),
                    SqlValue::Int(255), SqlValue::Int(0), SqlValue::Null, SqlValue::Null, SqlValue::Null,
                ],
                vec![
                    text("dbo"), text("Orders"), text("UserId"), text("int"), text("NO"),
                    SqlValue::Null, SqlValue::Int(0), text("dbo"), text("Users"), text("Id"),
                ],
            ],
        );

        let tables = decode_tables(&output);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].full_name, "dbo.Users");
        assert_eq!(tables[0].columns.len(), 2);
        assert!(tables[0].columns[0].is_primary_key);
        assert!(!tables[0].columns[0].is_nullable);
        assert_eq!(tables[0].columns[1].max_length, Some(255));

        let fk = &tables[1].columns[0];
        assert!(fk.is_foreign_key);
        assert_eq!(fk.foreign_key_ref.as_deref(), Some("dbo.Users.Id"));
    }

    #[test]
    fn test_decode_procedures() {
        let output = QueryOutput::new(
            columns(&[
                "SCHEMA_NAME",
                "PROCEDURE_NAME",
                "PARAMETER_NAME",
                "DATA_TYPE",
                "MAX_LENGTH",
                "IS_OUTPUT",
                "DESCRIPTION",
            ]),
            vec![
                vec![
                    text("dbo"), text("GetOrders"), text("@UserId"), text("int"),
                    SqlValue::Int(4), SqlValue::Bool(false), text("Orders by user"),
                ],
                vec![
                    text("dbo"), text("GetOrders"), text("@Count"), text("int"),
                    SqlValue::Int(4), SqlValue::Bool(true), text("Orders by user"),
                ],
                vec![
                    text("dbo"), text("Ping"), SqlValue::Null, SqlValue::Null,
                    SqlValue::Null, SqlValue::Null, SqlValue::Null,
                ],
            ],
        );

        let procedures = decode_procedures(&output);
        assert_eq!(procedures.len(), 2);
        assert_eq!(procedures[0].parameters.len(), 2);
        assert!(procedures[0].parameters[1].is_output);
        assert_eq!(procedures[0].description.as_deref(), Some("Orders by user"));
        assert!(procedures[1].parameters.is_empty());
        assert!(procedures[1].description.is_none());
    }

    #[test]
    fn test_decode_checksum() {
        let output = QueryOutput::new(
            columns(&["TABLES_HASH", "PROCEDURES_HASH", "LAST_MODIFIED"]),
            vec![vec![text("AB12"), text("CD34"), text("2024-05-01T10:00:00.123")]],
        );
        assert_eq!(
            decode_checksum(&output).unwrap(),
            "AB12-CD34-2024-05-01T10:00:00.123"
        );

        assert!(decode_checksum(&QueryOutput::default()).is_err());
    }
}
