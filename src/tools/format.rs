//! Plain-text result tables for the tool surface
//!
//! Layout: a header row of column names, a separator row of dashes, then at most
//! [`MAX_ROWS`] data rows, cells joined by ` | `.

use crate::database::executor::MAX_ROWS;
use crate::database::QueryOutput;

/// Longest preview cell kept as is
const PREVIEW_CELL_LIMIT: usize = 50;

/// Characters kept from a longer preview cell (an ellipsis is appended)
const PREVIEW_CELL_KEEP: usize = 47;

/// Cell rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStyle {
    /// Values as they are
    Full,
    /// Long values shortened to 47 characters plus `...`
    Truncated,
}

/// Render rows as a text table, appending an omission line past the row cap
pub fn render_rows(output: &QueryOutput, style: CellStyle) -> String {
    let mut text = String::new();
    text.push_str(&output.columns.join(" | "));
    text.push('\n');
    text.push_str(&vec!["---"; output.columns.len()].join(" | "));
    text.push('\n');

    for row in output.rows.iter().take(MAX_ROWS) {
        let cells: Vec<String> = row
            .iter()
            .map(|value| {
                let cell = value.to_text();
                match style {
                    CellStyle::Full => cell,
                    CellStyle::Truncated => truncate_cell(&cell),
                }
            })
            .collect();
        text.push_str(&cells.join(" | "));
        text.push('\n');
    }

    if output.rows.len() > MAX_ROWS {
        text.push_str(&format!("\n... {} more rows omitted", output.rows.len() - MAX_ROWS));
    }
    text
}

/// Shorten a cell longer than 50 characters to 47 plus `...`
pub fn truncate_cell(cell: &str) -> String {
    if cell.chars().count() <= PREVIEW_CELL_LIMIT {
        return cell.to_string();
    }
    let mut short: String = cell.chars().take(PREVIEW_CELL_KEEP).collect();
    short.push_str("...");
    short
}
