//! REPL implementation
//!
//! This module implements the interactive Read-Eval-Print Loop for Query-Agent.

use crate::api::QueryService;
use crate::cli::commands::{self, format_error, Command, CommandType, ReplState};
use crate::error::{QueryAgentError, Result};
use crate::llm::{ProviderDescriptor, DEFAULT_PROVIDER};
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::Context;
use rustyline::Helper;
use rustyline::{CompletionType, Config, Editor};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const COMMANDS: &[&str] = &[
    "/schema",
    "/refresh",
    "/check",
    "/tables",
    "/procedures",
    "/table",
    "/proc",
    "/relationships",
    "/sql",
    "/preview",
    "/providers",
    "/use",
    "/clear",
    "/clearcache",
    "/help",
    "/quit",
    "/exit",
];

/// Query-Agent command completer
struct QueryAgentCompleter;

impl Completer for QueryAgentCompleter {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &Context<'_>,
    ) -> std::result::Result<(usize, Vec<String>), ReadlineError> {
        if line.starts_with('/') && !line.contains(' ') {
            let matches: Vec<String> = COMMANDS
                .iter()
                .filter(|cmd| cmd.starts_with(line))
                .map(|s| s.to_string())
                .collect();
            Ok((0, matches))
        } else {
            Ok((0, vec![]))
        }
    }
}

impl Hinter for QueryAgentCompleter {
    type Hint = String;
}

impl Highlighter for QueryAgentCompleter {}

impl Validator for QueryAgentCompleter {}

impl Helper for QueryAgentCompleter {}

/// Query-Agent REPL
pub struct Repl {
    /// The rustyline editor
    editor: Editor<QueryAgentCompleter, DefaultHistory>,
    /// Whether the REPL should continue running
    running: bool,
    service: Arc<QueryService>,
    state: ReplState,
    history_path: PathBuf,
}

impl Repl {
    /// Create a new REPL instance with its own chat session
    ///
    /// Without an explicit provider, the default one is used when configured,
    /// otherwise the first configured provider.
    pub fn new(service: Arc<QueryService>, provider: Option<String>) -> Result<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .auto_add_history(true)
            .build();

        let mut editor = Editor::<QueryAgentCompleter, DefaultHistory>::with_config(config)
            .map_err(|e| {
                QueryAgentError::Io(std::io::Error::other(format!(
                    "Failed to initialize editor: {}",
                    e
                )))
            })?;
        editor.set_helper(Some(QueryAgentCompleter));

        let history_path = dirs::home_dir()
            .map(|p| p.join(".query-agent").join("history"))
            .unwrap_or_else(|| ".query-agent-history".into());

        if let Err(e) = editor.load_history(&history_path) {
            debug!(error = %e, "No REPL history loaded");
        }

        let provider_id = match provider {
            Some(id) => {
                service.orchestrator().providers().get(&id)?;
                id
            }
            None => pick_provider(&service.providers()),
        };

        Ok(Self {
            editor,
            running: true,
            service,
            state: ReplState {
                provider_id,
                session_id: format!("repl-{}", uuid::Uuid::new_v4()),
            },
            history_path,
        })
    }

    /// Run the REPL loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        while self.running {
            match self.editor.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match Command::parse(line) {
                        Ok(command) => self.handle_command(command).await,
                        Err(e) => println!("{}", format_error(&e)),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    self.running = false;
                }
                Err(err) => {
                    println!("Error: {:?}", err);
                    self.running = false;
                }
            }
        }

        self.save_history();
        Ok(())
    }

    fn save_history(&mut self) {
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = self.editor.save_history(&self.history_path) {
            debug!(error = %e, "Could not save REPL history");
        }
    }

    fn print_welcome(&self) {
        println!();
        println!("Query-Agent v{}", env!("CARGO_PKG_VERSION"));
        println!("Natural-language queries for SQL Server");
        println!();
        println!("Provider: {}", self.state.provider_id);
        println!("Type /help for the list of commands, or ask a question.");
        println!();
    }

    /// Handle a command; Ctrl-C while it runs cancels it
    async fn handle_command(&mut self, command: Command) {
        if command.command_type == CommandType::Quit {
            self.running = false;
        }

        let (cancel, watcher) = cancel_on(tokio::signal::ctrl_c());
        let outcome =
            commands::handle_command(&command, &self.service, &mut self.state, &cancel).await;
        watcher.abort();

        match outcome {
            Ok(msg) => println!("{}", msg),
            Err(QueryAgentError::Cancelled(what)) => println!("^C ({} cancelled)", what),
            Err(e) => println!("{}", format_error(&e)),
        }
    }
}

/// Token cancelled once `signal` resolves successfully
fn cancel_on<F>(signal: F) -> (CancellationToken, JoinHandle<()>)
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        match signal.await {
            Ok(()) => trigger.cancel(),
            Err(e) => debug!(error = %e, "Interrupt listener unavailable"),
        }
    });
    (cancel, watcher)
}

fn pick_provider(available: &[ProviderDescriptor]) -> String {
    available
        .iter()
        .find(|p| p.id == DEFAULT_PROVIDER && p.configured)
        .or_else(|| available.iter().find(|p| p.configured))
        .map(|p| p.id.clone())
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
}
