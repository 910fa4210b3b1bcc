// Query-Agent: natural-language queries for SQL Server
//
// This is the main entry point for the Query-Agent application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use query_agent::api::QueryService;
use query_agent::cli::Repl;
use query_agent::config::AppConfig;
use query_agent::tools::service::run_stdio;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "query-agent", version, about = "Natural-language queries for SQL Server")]
struct Cli {
    /// Path to a TOML config file (defaults to the user config dir, query-agent/config.toml)
    #[arg(short, long, env = "QUERY_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Interactive chat REPL (default)
    Repl {
        /// Provider id to start with
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Serve the database tools as an MCP server on stdin/stdout
    Tools,
}

/// Initialize the tracing subscriber; logs go to stderr so stdout stays free for output
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_tracing(level);

    info!("Starting Query-Agent v{}", env!("CARGO_PKG_VERSION"));

    let service = Arc::new(QueryService::from_config(&config)?);
    let shutdown = CancellationToken::new();
    let reaper = service.start_session_reaper(shutdown.clone());

    let result = match cli.mode.unwrap_or(Mode::Repl { provider: None }) {
        Mode::Repl { provider } => {
            let mut repl = Repl::new(Arc::clone(&service), provider)?;
            repl.run().await
        }
        Mode::Tools => run_stdio(Arc::new(service.tool_surface())).await,
    };

    shutdown.cancel();
    if let Err(e) = reaper.await {
        error!(error = %e, "Session reaper failed");
    }
    info!("Shutdown complete");

    result.map_err(Into::into)
}
