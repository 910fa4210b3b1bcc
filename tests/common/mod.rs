//! Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use query_agent::database::indexer::{CHECKSUM_QUERY, PROCEDURES_QUERY, TABLES_QUERY, VIEWS_QUERY};
use query_agent::database::{QueryOutput, SqlBackend, SqlValue};
use query_agent::error::{QueryAgentError, Result};
use query_agent::llm::{ChatResponse, LLMProvider, Message};
use std::collections::VecDeque;
use std::sync::Mutex;

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// In-memory database answering the catalog queries, recording every other statement
pub struct FakeBackend {
    checksum: Mutex<String>,
    extra_columns: Mutex<Vec<(String, String)>>,
    statements: Mutex<Vec<String>>,
    catalog_scans: Mutex<usize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            checksum: Mutex::new("v1".to_string()),
            extra_columns: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
            catalog_scans: Mutex::new(0),
        }
    }

    /// Add a column to dbo.Users and move the fingerprint
    pub fn add_user_column(&self, name: &str, data_type: &str) {
        self.extra_columns
            .lock()
            .unwrap()
            .push((name.to_string(), data_type.to_string()));
        let mut checksum = self.checksum.lock().unwrap();
        checksum.push('+');
    }

    /// Non-catalog statements, in execution order
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Number of full table scans so far
    pub fn catalog_scans(&self) -> usize {
        *self.catalog_scans.lock().unwrap()
    }

    fn tables(&self) -> QueryOutput {
        *self.catalog_scans.lock().unwrap() += 1;
        let none = || SqlValue::Null;
        let mut rows = vec![
            vec![
                text("dbo"), text("Users"), text("Id"), text("int"), text("NO"),
                none(), SqlValue::Int(1), none(), none(), none(),
            ],
            vec![
                text("dbo"), text("Users"), text("Email"), text("nvarchar"), text("NO"),
                SqlValue::Int(255), SqlValue::Int(0), none(), none(), none(),
            ],
        ];
        for (name, data_type) in self.extra_columns.lock().unwrap().iter() {
            rows.push(vec![
                text("dbo"), text("Users"), text(name), text(data_type), text("YES"),
                none(), SqlValue::Int(0), none(), none(), none(),
            ]);
        }
        rows.push(vec![
            text("dbo"), text("Orders"), text("Id"), text("int"), text("NO"),
            none(), SqlValue::Int(1), none(), none(), none(),
        ]);
        rows.push(vec![
            text("dbo"), text("Orders"), text("UserId"), text("int"), text("YES"),
            none(), SqlValue::Int(0), text("dbo"), text("Users"), text("Id"),
        ]);

        QueryOutput::new(
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
            rows,
        )
    }

    fn procedures(&self) -> QueryOutput {
        QueryOutput::new(
            columns(&[
                "SCHEMA_NAME",
                "PROCEDURE_NAME",
                "PARAMETER_NAME",
                "DATA_TYPE",
                "MAX_LENGTH",
                "IS_OUTPUT",
                "DESCRIPTION",
            ]),
            vec![vec![
                text("dbo"), text("GetOrdersByUser"), text("@UserId"), text("int"),
                SqlValue::Int(4), SqlValue::Bool(false), text("Orders placed by one user"),
            ]],
        )
    }

    fn views(&self) -> QueryOutput {
        QueryOutput::new(
            columns(&[
                "TABLE_SCHEMA",
                "TABLE_NAME",
                "COLUMN_NAME",
                "DATA_TYPE",
                "IS_NULLABLE",
                "CHARACTER_MAXIMUM_LENGTH",
            ]),
            vec![vec![
                text("dbo"), text("ActiveUsers"), text("Email"), text("nvarchar"), text("YES"),
                SqlValue::Int(255),
            ]],
        )
    }

    fn checksum(&self) -> QueryOutput {
        QueryOutput::new(
            columns(&["TABLES_HASH", "PROCEDURES_HASH", "LAST_MODIFIED"]),
            vec![vec![
                text(&self.checksum.lock().unwrap()),
                text("P1"),
                text("2024-05-01T10:00:00"),
            ]],
        )
    }
}

#[async_trait]
impl SqlBackend for FakeBackend {
    async fn run(&self, sql: &str) -> Result<QueryOutput> {
        if sql == TABLES_QUERY {
            return Ok(self.tables());
        }
        if sql == PROCEDURES_QUERY {
            return Ok(self.procedures());
        }
        if sql == VIEWS_QUERY {
            return Ok(self.views());
        }
        if sql == CHECKSUM_QUERY {
            return Ok(self.checksum());
        }

        self.statements.lock().unwrap().push(sql.to_string());
        Ok(QueryOutput::new(
            columns(&["Id", "Email"]),
            vec![vec![SqlValue::Int(1), text("ada@example.com")]],
        ))
    }
}

/// Provider answering from a script and recording what it was sent
pub struct FakeProvider {
    id: String,
    configured: bool,
    stalled: bool,
    replies: Mutex<VecDeque<Result<String>>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl FakeProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            configured: true,
            stalled: false,
            replies: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn unconfigured(id: &str) -> Self {
        Self {
            configured: false,
            ..Self::new(id)
        }
    }

    /// Provider whose calls never complete
    pub fn stalled(id: &str) -> Self {
        Self {
            stalled: true,
            ..Self::new(id)
        }
    }

    pub fn reply(self, content: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(content.to_string()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(QueryAgentError::LLMApiError {
            provider: "Fake".to_string(),
            message: message.to_string(),
            status: 500,
        }));
        self
    }

    /// Conversation passed on each call
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for FakeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Fake"
    }

    fn model_id(&self) -> &str {
        "fake-model"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn chat(&self, messages: &[Message], _system_prompt: &str) -> Result<ChatResponse> {
        self.received.lock().unwrap().push(messages.to_vec());
        if self.stalled {
            std::future::pending::<()>().await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(self.response(content)),
            Some(Err(e)) => Err(e),
            None => Ok(self.response("Nothing more to say.".to_string())),
        }
    }
}
