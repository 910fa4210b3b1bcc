//! Command handlers for CLI
//!
//! This module implements all `/` commands for the Query-Agent REPL. Any line that
//! does not start with `/` is a chat turn.

use crate::api::{ExecuteRequest, QueryService};
use crate::chat::ChatRequest;
use crate::database::executor::DEFAULT_PREVIEW_LIMIT;
use crate::database::{RenderOptions, ResultSet};
use crate::error::{QueryAgentError, Result};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Rows shown in the terminal for one result
const DISPLAY_ROWS: usize = 50;

/// Command types
#[derive(Debug, Clone, PartialEq)]
pub enum CommandType {
    /// Render the catalog, optionally filtering tables by name
    Schema { filter: Option<String> },
    /// Force a catalog rescan
    Refresh,
    /// Check whether the catalog is stale
    Check,
    /// List tables
    Tables,
    /// List stored procedures
    Procedures,
    /// Describe one table
    Table { name: String },
    /// Describe one stored procedure
    Proc { name: String },
    /// Show foreign-key relationships
    Relationships,
    /// Run a statement directly (gated)
    Sql { statement: String },
    /// Preview a table
    Preview { table: String, limit: Option<i64> },
    /// List LLM providers
    Providers,
    /// Switch provider
    Use { provider: String },
    /// Clear chat context
    Clear,
    /// Drop the cached catalog
    ClearCache,
    /// Show help message
    Help,
    /// Exit the application
    Quit,
    /// Natural language query
    Query { text: String },
}

/// Parsed command
#[derive(Debug, Clone)]
pub struct Command {
    /// The type of command
    pub command_type: CommandType,
}

impl Command {
    /// Parse a command from user input
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let Some(rest) = input.strip_prefix('/') else {
            return Ok(Self::of(CommandType::Query {
                text: input.to_string(),
            }));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        let cmd = format!("/{}", name);

        let command_type = match cmd.as_str() {
            "/schema" => CommandType::Schema {
                filter: (!args.is_empty()).then(|| args.to_string()),
            },
            "/refresh" => CommandType::Refresh,
            "/check" => CommandType::Check,
            "/tables" => CommandType::Tables,
            "/procedures" => CommandType::Procedures,
            "/table" => CommandType::Table {
                name: required(&cmd, args, "/table <name>")?,
            },
            "/proc" => CommandType::Proc {
                name: required(&cmd, args, "/proc <name>")?,
            },
            "/relationships" => CommandType::Relationships,
            "/sql" => CommandType::Sql {
                statement: required(&cmd, args, "/sql <statement>")?,
            },
            "/preview" => {
                let expected = "/preview <table> [limit]";
                let mut parts = args.split_whitespace();
                let table = required(&cmd, parts.next().unwrap_or_default(), expected)?;
                let limit = match parts.next() {
                    Some(limit) => Some(limit.parse::<i64>().map_err(|_| {
                        QueryAgentError::InvalidCommandSyntax {
                            command: cmd.clone(),
                            expected: expected.to_string(),
                        }
                    })?),
                    None => None,
                };
                CommandType::Preview { table, limit }
            }
            "/providers" => CommandType::Providers,
            "/use" => CommandType::Use {
                provider: required(&cmd, args, "/use <provider>")?,
            },
            "/clear" => CommandType::Clear,
            "/clearcache" => CommandType::ClearCache,
            "/help" => CommandType::Help,
            "/quit" | "/exit" => CommandType::Quit,
            _ => return Err(QueryAgentError::UnknownCommand(cmd)),
        };
        Ok(Self::of(command_type))
    }

    fn of(command_type: CommandType) -> Self {
        Self { command_type }
    }
}

fn required(command: &str, value: &str, expected: &str) -> Result<String> {
    if value.is_empty() {
        return Err(QueryAgentError::InvalidCommandSyntax {
            command: command.to_string(),
            expected: expected.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Per-REPL state: the selected provider and the REPL's own chat session
pub struct ReplState {
    pub provider_id: String,
    pub session_id: String,
}

/// Handle a command and return the result message
///
/// Firing `cancel` abandons a running chat turn, statement or preview.
pub async fn handle_command(
    command: &Command,
    service: &QueryService,
    state: &mut ReplState,
    cancel: &CancellationToken,
) -> Result<String> {
    match &command.command_type {
        CommandType::Schema { filter } => {
            let options = match filter {
                Some(filter) => RenderOptions::filtered(filter.clone()),
                None => RenderOptions::default(),
            };
            service.orchestrator().catalog().render(&options).await
        }
        CommandType::Refresh => {
            let stats = service.refresh().await?;
            Ok(format!(
                "✓ Schema cache refreshed: {} tables, {} stored procedures, {} views ({} ms)",
                stats.tables, stats.stored_procedures, stats.views, stats.duration_ms
            ))
        }
        CommandType::Check => {
            let status = service.check().await?;
            let last_updated = status
                .last_updated
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            Ok(format!(
                "Changed: {}\nCached: {}\nLast updated: {}",
                status.changed, status.cached, last_updated
            ))
        }
        CommandType::Tables => {
            let mut table = new_table(vec!["Table", "Columns"]);
            for summary in service.tables().await? {
                table.add_row(vec![summary.full_name, summary.column_count.to_string()]);
            }
            Ok(table.to_string())
        }
        CommandType::Procedures => {
            let mut table = new_table(vec!["Procedure", "Parameters", "Description"]);
            for summary in service.procedures().await? {
                table.add_row(vec![
                    summary.full_name,
                    summary.parameter_count.to_string(),
                    summary.description.unwrap_or_default(),
                ]);
            }
            Ok(table.to_string())
        }
        CommandType::Table { name } => Ok(service.table(name).await?.to_string()),
        CommandType::Proc { name } => {
            let procedure = service.procedure(name).await?;
            let mut text = procedure.signature();
            if let Some(description) = procedure.description {
                text.push_str(&format!("\n  -- {}", description));
            }
            Ok(text)
        }
        CommandType::Relationships => {
            let relationships = service.relationships().await?;
            if relationships.trim().is_empty() {
                Ok("No foreign-key relationships found".to_string())
            } else {
                Ok(relationships)
            }
        }
        CommandType::Sql { statement } => {
            let result = service
                .execute_with_cancel(
                    ExecuteRequest {
                        sql: statement.clone(),
                    },
                    cancel,
                )
                .await?;
            Ok(format_result_set(&result))
        }
        CommandType::Preview { table, limit } => {
            let output = service
                .orchestrator()
                .gateway()
                .preview(table, limit.unwrap_or(DEFAULT_PREVIEW_LIMIT), Some(cancel))
                .await?;
            Ok(format_result_set(&output.to_result_set()))
        }
        CommandType::Providers => {
            let mut table = new_table(vec!["", "Provider", "Name", "Configured"]);
            for provider in service.providers() {
                let marker = if provider.id == state.provider_id { "*" } else { "" };
                table.add_row(vec![
                    marker.to_string(),
                    provider.id,
                    provider.name,
                    (if provider.configured { "yes" } else { "no" }).to_string(),
                ]);
            }
            Ok(table.to_string())
        }
        CommandType::Use { provider } => {
            let selected = service.orchestrator().providers().get(provider)?;
            if !selected.is_configured() {
                return Err(QueryAgentError::ProviderNotConfigured(provider.clone()));
            }
            state.provider_id = provider.clone();
            Ok(format!(
                "✓ Using {} ({})",
                selected.display_name(),
                selected.model_id()
            ))
        }
        CommandType::Clear => {
            service.clear_session(&state.session_id).await;
            Ok("✓ Chat context cleared".to_string())
        }
        CommandType::ClearCache => {
            service.clear_cache().await;
            Ok("✓ Schema cache cleared".to_string())
        }
        CommandType::Help => Ok(HELP.to_string()),
        CommandType::Quit => Ok("Goodbye!".to_string()),
        CommandType::Query { text } => {
            let turn = service
                .chat_with_cancel(
                    ChatRequest::new(text.clone())
                        .with_provider(state.provider_id.clone())
                        .with_session(state.session_id.clone()),
                    cancel,
                )
                .await?;

            let mut out = turn.message.clone();
            if let Some(sql) = &turn.sql {
                out.push_str(&format!("\n\nSQL:\n{}", sql));
            }
            if let Some(result) = &turn.result {
                out.push_str("\n\n");
                out.push_str(&format_result_set(result));
            }
            if let Some(error) = &turn.error {
                out.push_str(&format!("\n\nError: {}", error));
            }
            if turn.schema_refreshed {
                out.push_str("\n\n(schema cache refreshed)");
            }
            Ok(out)
        }
    }
}

const HELP: &str = r#"
Query-Agent Commands

Schema:
  /schema [filter]       Show the schema (tables filtered by name)
  /refresh               Force a schema cache refresh
  /check                 Check whether the schema changed
  /tables                List tables
  /procedures            List stored procedures
  /table <name>          Describe a table
  /proc <name>           Describe a stored procedure
  /relationships         Show foreign-key relationships

Data:
  /sql <statement>       Run a statement (destructive statements are blocked)
  /preview <table> [n]   Show the first n rows of a table (default 10, max 100)

Providers:
  /providers             List LLM providers
  /use <provider>        Switch provider (claude-opus, claude-sonnet, groq, gemini)

Session:
  /clear                 Clear chat context
  /clearcache            Drop the cached schema
  /help                  Show this help message
  /quit, /exit           Exit Query-Agent

Natural Language:
  Any text without a / prefix is sent to the selected provider.
"#;

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Render rows as a terminal table
pub fn format_result_set(result: &ResultSet) -> String {
    if result.rows.is_empty() {
        let affected: u64 = result.rows_affected.iter().sum();
        return format!("(0 rows, {} affected)", affected);
    }

    let mut table = new_table(result.columns.iter().map(String::as_str).collect());
    for row in result.rows.iter().take(DISPLAY_ROWS) {
        table.add_row(
            result
                .columns
                .iter()
                .map(|column| cell_text(row.get(column).unwrap_or(&Value::Null)))
                .collect::<Vec<_>>(),
        );
    }

    let mut out = table.to_string();
    out.push_str(&format!("\n{} rows", result.rows.len()));
    if result.rows.len() > DISPLAY_ROWS {
        out.push_str(&format!(" (first {} shown)", DISPLAY_ROWS));
    }
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format an error for display
pub fn format_error(error: &QueryAgentError) -> String {
    format!("Error: {}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{QueryOutput, SqlValue};

    #[test]
    fn test_parse_schema_command() {
        let cmd = Command::parse("/schema").unwrap();
        assert_eq!(cmd.command_type, CommandType::Schema { filter: None });

        let cmd = Command::parse("/schema  order ").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Schema {
                filter: Some("order".to_string())
            }
        );
    }

    #[test]
    fn test_parse_sql_keeps_statement() {
        let cmd = Command::parse("/sql SELECT TOP 5 * FROM dbo.Users WHERE Name = 'a b'").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Sql {
                statement: "SELECT TOP 5 * FROM dbo.Users WHERE Name = 'a b'".to_string()
            }
        );
    }

    #[test]
    fn test_parse_preview_command() {
        let cmd = Command::parse("/preview dbo.Users 25").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Preview {
                table: "dbo.Users".to_string(),
                limit: Some(25)
            }
        );

        let cmd = Command::parse("/preview dbo.Users").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Preview {
                table: "dbo.Users".to_string(),
                limit: None
            }
        );

        assert!(Command::parse("/preview dbo.Users many").is_err());
    }

    #[test]
    fn test_parse_quit_command() {
        assert_eq!(Command::parse("/quit").unwrap().command_type, CommandType::Quit);
        assert_eq!(Command::parse("/exit").unwrap().command_type, CommandType::Quit);
    }

    #[test]
    fn test_parse_query() {
        let cmd = Command::parse("Show me all users").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Query {
                text: "Show me all users".to_string()
            }
        );
    }

    #[test]
    fn test_parse_invalid_command() {
        let err = Command::parse("/invalid").unwrap_err();
        assert!(matches!(err, QueryAgentError::UnknownCommand(ref c) if c == "/invalid"));
    }

    #[test]
    fn test_parse_missing_args() {
        for input in ["/table", "/proc", "/sql", "/preview", "/use  "] {
            assert!(
                matches!(
                    Command::parse(input),
                    Err(QueryAgentError::InvalidCommandSyntax { .. })
                ),
                "{}",
                input
            );
        }
    }

    #[test]
    fn test_format_result_set() {
        let output = QueryOutput::new(
            vec!["Id".to_string(), "Email".to_string()],
            vec![vec![SqlValue::Int(1), SqlValue::Null]],
        );
        let text = format_result_set(&output.to_result_set());
        assert!(text.contains("Email"));
        assert!(text.contains("NULL"));
        assert!(text.ends_with("1 rows"));

        let empty = QueryOutput {
            rows_affected: vec![3],
            ..QueryOutput::default()
        };
        assert_eq!(format_result_set(&empty.to_result_set()), "(0 rows, 3 affected)");
    }
}
