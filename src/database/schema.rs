//! Schema data structures
//!
//! This module defines the catalog metadata (tables, columns, stored procedures,
//! views) and the immutable [`SchemaSnapshot`] that groups them. Rendering the
//! snapshot for a language model lives here too, since it only reads the snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Represents a column of a table or view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Server data type name (e.g. "nvarchar", "int")
    pub data_type: String,
    /// Character maximum length; -1 means MAX
    pub max_length: Option<i64>,
    /// Whether the column accepts NULL
    pub is_nullable: bool,
    /// Whether this column is part of the primary key
    pub is_primary_key: bool,
    /// Whether this column references another table
    pub is_foreign_key: bool,
    /// Referenced column as `schema.table.column`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key_ref: Option<String>,
}

impl ColumnInfo {
    /// Create a plain nullable column with no key semantics
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            is_nullable: true,
            is_primary_key: false,
            is_foreign_key: false,
            foreign_key_ref: None,
        }
    }

    /// Type with its length suffix, e.g. `nvarchar(100)`
    pub fn type_display(&self) -> String {
        match self.max_length {
            Some(len) if len != 0 => format!("{}({})", self.data_type, len),
            _ => self.data_type.clone(),
        }
    }

    fn nullability(&self) -> &'static str {
        if self.is_nullable {
            "NULL"
        } else {
            "NOT NULL"
        }
    }

    /// Column line for tables: type, nullability, then key annotations
    pub fn format_with_keys(&self) -> String {
        let mut line = format!("{}: {} {}", self.name, self.type_display(), self.nullability());
        if self.is_primary_key {
            line.push_str(" [PK]");
        }
        if let Some(ref target) = self.foreign_key_ref {
            line.push_str(&format!(" [FK → {}]", target));
        }
        line
    }

    /// Column line for views: no key annotations
    pub fn format_plain(&self) -> String {
        format!("{}: {} {}", self.name, self.type_display(), self.nullability())
    }
}

/// Represents a base table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// `schema.name`, unique within a snapshot
    pub full_name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Create a new, column-less table
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        let schema = schema.into();
        let name = name.into();
        Self {
            full_name: format!("{}.{}", schema, name),
            schema,
            name,
            columns: Vec::new(),
        }
    }

    /// Get a column by name (case-insensitive)
    pub fn get_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Columns that reference another table
    pub fn foreign_keys(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.is_foreign_key)
    }
}

impl fmt::Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.full_name)?;
        for column in &self.columns {
            writeln!(f, "  - {}", column.format_with_keys())?;
        }
        Ok(())
    }
}

/// Views share the table shape; their columns never carry key flags
pub type ViewInfo = TableInfo;

/// Represents a stored procedure parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterInfo {
    /// Parameter name including the leading `@`
    pub name: String,
    pub data_type: String,
    /// Maximum length in bytes as reported by the server
    pub max_length: Option<i64>,
    pub is_output: bool,
}

impl fmt::Display for ParameterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if self.is_output {
            write!(f, " OUTPUT")?;
        }
        Ok(())
    }
}

/// Represents a stored procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProcedureInfo {
    pub schema: String,
    pub name: String,
    pub full_name: String,
    /// Parameters in declaration order
    pub parameters: Vec<ParameterInfo>,
    /// `MS_Description` extended property, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StoredProcedureInfo {
    /// Create a new procedure without parameters
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        let schema = schema.into();
        let name = name.into();
        Self {
            full_name: format!("{}.{}", schema, name),
            schema,
            name,
            parameters: Vec::new(),
            description: None,
        }
    }

    /// Call signature, e.g. `dbo.GetOrders(@UserId int, @Total money OUTPUT)`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.parameters.iter().map(|p| p.to_string()).collect();
        format!("{}({})", self.full_name, params.join(", "))
    }
}

/// Options for [`SchemaSnapshot::render`]
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub include_tables: bool,
    pub include_procedures: bool,
    pub include_views: bool,
    /// Case-insensitive substrings matched against table full names; empty means all
    pub table_filter: Vec<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            include_tables: true,
            include_procedures: true,
            include_views: true,
            table_filter: Vec::new(),
        }
    }
}

impl RenderOptions {
    /// All sections, with tables filtered by one substring
    pub fn filtered(filter: impl Into<String>) -> Self {
        Self {
            table_filter: vec![filter.into()],
            ..Self::default()
        }
    }

    fn matches(&self, table: &TableInfo) -> bool {
        if self.table_filter.is_empty() {
            return true;
        }
        let full_name = table.full_name.to_lowercase();
        self.table_filter
            .iter()
            .any(|f| full_name.contains(&f.to_lowercase()))
    }
}

/// Table listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub schema: String,
    pub name: String,
    pub full_name: String,
    pub column_count: usize,
}

/// Procedure listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureSummary {
    pub schema: String,
    pub name: String,
    pub full_name: String,
    pub parameter_count: usize,
    pub description: Option<String>,
}

/// Entity counts of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub tables: usize,
    pub stored_procedures: usize,
    pub views: usize,
}

/// Immutable catalog snapshot
///
/// A snapshot is never mutated after it is published; a refresh builds a new one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    /// Tables keyed by full name
    pub tables: BTreeMap<String, TableInfo>,
    /// Stored procedures keyed by full name
    pub stored_procedures: BTreeMap<String, StoredProcedureInfo>,
    /// Views keyed by full name
    pub views: BTreeMap<String, ViewInfo>,
    pub last_updated: DateTime<Utc>,
    /// Change-detection fingerprint paired with this content
    #[serde(skip)]
    pub checksum: String,
}

impl SchemaSnapshot {
    /// Build a snapshot from scanned entities
    pub fn new(
        tables: Vec<TableInfo>,
        stored_procedures: Vec<StoredProcedureInfo>,
        views: Vec<ViewInfo>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.full_name.clone(), t)).collect(),
            stored_procedures: stored_procedures
                .into_iter()
                .map(|p| (p.full_name.clone(), p))
                .collect(),
            views: views.into_iter().map(|v| (v.full_name.clone(), v)).collect(),
            last_updated: Utc::now(),
            checksum: checksum.into(),
        }
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            tables: self.tables.len(),
            stored_procedures: self.stored_procedures.len(),
            views: self.views.len(),
        }
    }

    /// Format the catalog for LLM context
    pub fn render(&self, options: &RenderOptions) -> String {
        let mut result = String::new();

        if options.include_tables {
            result.push_str("=== DATABASE TABLES ===\n\n");
            for table in self.tables.values().filter(|t| options.matches(t)) {
                result.push_str(&table.to_string());
                result.push('\n');
            }
        }

        if options.include_procedures && !self.stored_procedures.is_empty() {
            result.push_str("=== STORED PROCEDURES ===\n\n");
            for procedure in self.stored_procedures.values() {
                result.push_str(&procedure.signature());
                result.push('\n');
                if let Some(ref description) = procedure.description {
                    result.push_str(&format!("  -- {}\n", description));
                }
                result.push('\n');
            }
        }

        if options.include_views && !self.views.is_empty() {
            result.push_str("=== VIEWS ===\n\n");
            for view in self.views.values() {
                result.push_str(&format!("{}:\n", view.full_name));
                for column in &view.columns {
                    result.push_str(&format!("  - {}\n", column.format_plain()));
                }
                result.push('\n');
            }
        }

        result
    }

    /// Foreign-key map of every table that has at least one FK column
    pub fn relationships(&self) -> String {
        let mut result = String::from("=== TABLE RELATIONSHIPS ===\n\n");
        for table in self.tables.values() {
            let mut fks = table.foreign_keys().peekable();
            if fks.peek().is_none() {
                continue;
            }
            result.push_str(&format!("{}:\n", table.full_name));
            for column in fks {
                result.push_str(&format!(
                    "  {} → {}\n",
                    column.name,
                    column.foreign_key_ref.as_deref().unwrap_or_default()
                ));
            }
            result.push('\n');
        }
        result
    }

    /// Exact full-name match first, then a case-insensitive bare-name match
    pub fn find_table(&self, name: &str) -> Option<&TableInfo> {
        find_entry(&self.tables, name, |t| &t.name)
    }

    /// Exact full-name match first, then a case-insensitive bare-name match
    pub fn find_procedure(&self, name: &str) -> Option<&StoredProcedureInfo> {
        find_entry(&self.stored_procedures, name, |p| &p.name)
    }

    pub fn list_tables(&self) -> Vec<TableSummary> {
        self.tables
            .values()
            .map(|t| TableSummary {
                schema: t.schema.clone(),
                name: t.name.clone(),
                full_name: t.full_name.clone(),
                column_count: t.columns.len(),
            })
            .collect()
    }

    pub fn list_procedures(&self) -> Vec<ProcedureSummary> {
        self.stored_procedures
            .values()
            .map(|p| ProcedureSummary {
                schema: p.schema.clone(),
                name: p.name.clone(),
                full_name: p.full_name.clone(),
                parameter_count: p.parameters.len(),
                description: p.description.clone(),
            })
            .collect()
    }
}

fn find_entry<'a, T, F>(entries: &'a BTreeMap<String, T>, name: &str, bare: F) -> Option<&'a T>
where
    F: Fn(&T) -> &String,
{
    entries.get(name).or_else(|| {
        entries
            .values()
            .find(|entry| bare(entry).eq_ignore_ascii_case(name))
    })
}
