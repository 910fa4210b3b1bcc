//! Statement safety gate
//!
//! Denylist filter applied before anything reaches the database. It is keyword
//! based, not a SQL parser: it blocks destructive DDL, a bare delete-all, and calls
//! into dangerous system procedures. Both the conversational path and the tool
//! surface go through [`evaluate`] / [`evaluate_procedure_name`].

use crate::error::{QueryAgentError, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// DDL keywords anywhere, or a `DELETE FROM <name>` with nothing after the name.
/// A predicated `DELETE FROM t WHERE ...` is allowed.
static DESTRUCTIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(DROP|TRUNCATE|ALTER|CREATE)\b|\bDELETE\s+FROM\s+[\w.\[\]"]+\s*;?$"#)
        .expect("destructive statement pattern is valid")
});

/// `EXEC`/`EXECUTE` of master-database, `xp_` or login-management procedures
static SYSTEM_PROCEDURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bEXEC(UTE)?\s+(@\w+\s*=\s*)?(\[?\w+\]?\.)*\[?(master\]?\.|xp_|sp_addlogin|sp_droplogin|sp_password)",
    )
    .expect("system procedure pattern is valid")
});

/// Same denylist for a bare procedure name such as `master.dbo.sp_who` or `xp_cmdshell`
static SYSTEM_PROCEDURE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\.)(master\.|xp_|sp_addlogin|sp_droplogin|sp_password)")
        .expect("system procedure name pattern is valid")
});

/// One bracketed or plain identifier part
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\[[^\[\]]+\]|[A-Za-z_][A-Za-z0-9_$#@]*)(\.(\[[^\[\]]+\]|[A-Za-z_][A-Za-z0-9_$#@]*)){0,2}$")
        .expect("identifier pattern is valid")
});

/// Which denylist fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRule {
    /// DROP, TRUNCATE, ALTER, CREATE or a bare DELETE FROM
    DestructiveStatement,
    /// master., xp_ and login/password procedures
    SystemProcedure,
}

impl GateRule {
    /// Message shown to the caller
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DestructiveStatement => {
                "Dangerous query detected. DROP, TRUNCATE, DELETE, ALTER and CREATE statements cannot be executed."
            }
            Self::SystemProcedure => "Calling system stored procedures is not allowed.",
        }
    }
}

/// A rejected statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub rule: GateRule,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        self.rule.reason()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Gate decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Turn a rejection into an error
    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Reject(rejection) => Err(QueryAgentError::Rejected(rejection)),
        }
    }
}

fn reject(rule: GateRule) -> Verdict {
    Verdict::Reject(Rejection { rule })
}

/// Check free statement text
pub fn evaluate(sql: &str) -> Verdict {
    let sql = sql.trim();
    if DESTRUCTIVE_PATTERN.is_match(sql) {
        return reject(GateRule::DestructiveStatement);
    }
    if SYSTEM_PROCEDURE_PATTERN.is_match(sql) {
        return reject(GateRule::SystemProcedure);
    }
    Verdict::Allow
}

/// Check a procedure name passed on its own (no `EXEC` keyword)
pub fn evaluate_procedure_name(name: &str) -> Verdict {
    let normalized: String = name.trim().chars().filter(|c| *c != '[' && *c != ']').collect();
    if SYSTEM_PROCEDURE_NAME_PATTERN.is_match(&normalized) {
        return reject(GateRule::SystemProcedure);
    }
    Verdict::Allow
}

/// Validate a possibly qualified object name before it is interpolated into SQL
///
/// Accepts up to three dotted parts, each plain (`Users`, `_tmp$1`) or bracketed (`[Order Details]`).
pub fn validate_identifier(name: &str) -> Result<&str> {
    let name = name.trim();
    if IDENTIFIER_PATTERN.is_match(name) {
        Ok(name)
    } else {
        Err(QueryAgentError::InvalidIdentifier(name.to_string()))
    }
}

/// Validate a procedure parameter name; the leading `@` is optional and stripped
pub fn validate_parameter_name(name: &str) -> Result<&str> {
    let bare = name.trim().trim_start_matches('@');
    if !bare.contains('.') && IDENTIFIER_PATTERN.is_match(bare) && !bare.starts_with('[') {
        Ok(bare)
    } else {
        Err(QueryAgentError::InvalidIdentifier(name.to_string()))
    }
}
