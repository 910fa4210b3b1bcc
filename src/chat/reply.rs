//! Assistant reply decoding
//!
//! Models are asked for a JSON object but often wrap it in prose or a code fence.
//! Decoding takes the first balanced `{...}` block; anything that does not decode,
//! or decodes without a message, becomes [`AssistantReply::Freeform`] instead of
//! an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// What the assistant wants done with its statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyAction {
    Query,
    Execute,
    Explain,
    #[default]
    #[serde(other)]
    None,
}

impl ReplyAction {
    /// Whether a statement attached to this action should be run
    pub fn runs_statement(&self) -> bool {
        matches!(self, ReplyAction::Query | ReplyAction::Execute)
    }
}

/// Structured reply shape
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReply {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub action: ReplyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables_used: Option<Vec<String>>,
}

/// Decoded assistant reply
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    Structured(StructuredReply),
    Freeform(String),
}

impl AssistantReply {
    /// Decode raw model text, never failing
    pub fn parse(raw: &str) -> Self {
        let decoded = first_json_object(raw)
            .and_then(|block| serde_json::from_str::<StructuredReply>(block).ok());

        match decoded {
            Some(mut reply) if !reply.message.trim().is_empty() => {
                reply.sql = reply
                    .sql
                    .map(|sql| sql.trim().to_string())
                    .filter(|sql| !sql.is_empty());
                Self::Structured(reply)
            }
            _ => {
                debug!("Reply is not structured, treating as plain message");
                Self::Freeform(raw.to_string())
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Structured(reply) => &reply.message,
            Self::Freeform(text) => text,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Structured(reply) => reply.sql.as_deref(),
            Self::Freeform(_) => None,
        }
    }

    pub fn action(&self) -> ReplyAction {
        match self {
            Self::Structured(reply) => reply.action,
            Self::Freeform(_) => ReplyAction::None,
        }
    }

    pub fn tables_used(&self) -> Option<&[String]> {
        match self {
            Self::Structured(reply) => reply.tables_used.as_deref(),
            Self::Freeform(_) => None,
        }
    }

    /// Statement to run, if the action calls for one
    pub fn runnable_sql(&self) -> Option<&str> {
        self.sql().filter(|_| self.action().runs_statement())
    }
}

/// First balanced `{...}` block, skipping braces inside JSON strings
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let reply = AssistantReply::parse(
            r#"{"message":"Top users","sql":"SELECT TOP 100 * FROM dbo.Users","action":"query","tablesUsed":["dbo.Users"]}"#,
        );
        assert_eq!(reply.message(), "Top users");
        assert_eq!(reply.action(), ReplyAction::Query);
        assert_eq!(reply.runnable_sql(), Some("SELECT TOP 100 * FROM dbo.Users"));
        assert_eq!(reply.tables_used(), Some(&["dbo.Users".to_string()][..]));
    }

    #[test]
    fn test_json_inside_prose_and_fence() {
        let raw = "Sure! Here you go:\n```json\n{\"message\": \"Uses {braces} in text\", \"sql\": null, \"action\": \"explain\"}\n```\nAnything else? {not json}";
        let reply = AssistantReply::parse(raw);
        assert!(matches!(reply, AssistantReply::Structured(_)));
        assert_eq!(reply.message(), "Uses {braces} in text");
        assert_eq!(reply.action(), ReplyAction::Explain);
        assert_eq!(reply.sql(), None);
    }

    #[test]
    fn test_prose_degrades_to_freeform() {
        let reply = AssistantReply::parse("I could not find a Customers table.");
        assert_eq!(
            reply,
            AssistantReply::Freeform("I could not find a Customers table.".to_string())
        );
        assert_eq!(reply.action(), ReplyAction::None);
        assert_eq!(reply.runnable_sql(), None);
    }

    #[test]
    fn test_broken_json_degrades_to_freeform() {
        let reply = AssistantReply::parse(r#"{"message": "unterminated"#);
        assert!(matches!(reply, AssistantReply::Freeform(_)));
    }

    #[test]
    fn test_unknown_action_and_empty_sql() {
        let reply = AssistantReply::parse(r#"{"message":"hi","sql":"  ","action":"dance"}"#);
        assert_eq!(reply.action(), ReplyAction::None);
        assert_eq!(reply.sql(), None);
    }

    #[test]
    fn test_explain_does_not_run() {
        let reply = AssistantReply::parse(
            r#"{"message":"This would be","sql":"SELECT 1","action":"explain"}"#,
        );
        assert_eq!(reply.sql(), Some("SELECT 1"));
        assert_eq!(reply.runnable_sql(), None);
    }

    #[test]
    fn test_object_without_message_degrades_to_freeform() {
        let reply = AssistantReply::parse("{}");
        assert_eq!(reply, AssistantReply::Freeform("{}".to_string()));

        let raw = r#"{"sql":"SELECT 1","action":"query"}"#;
        let reply = AssistantReply::parse(raw);
        assert_eq!(reply, AssistantReply::Freeform(raw.to_string()));
        assert_eq!(reply.runnable_sql(), None);

        let reply = AssistantReply::parse(r#"{"message":"   ","sql":"SELECT 1"}"#);
        assert!(matches!(reply, AssistantReply::Freeform(_)));
    }
}
