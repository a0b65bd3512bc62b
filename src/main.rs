mod cli;
mod config;
mod db;
mod embedding;
mod error;
mod memory;
mod model;
mod server;
mod storage;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "context-orchestrator",
    version,
    about = "Personal external brain — MCP memory server with hybrid retrieval"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport)
    Serve,
    /// Run the consolidation pass once and print statistics
    Consolidate,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to the cache directory
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::OrchestratorConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            server::serve_stdio(config).await?;
        }
        Command::Consolidate => {
            let state = server::build_state(config)?;
            let stats = state
                .consolidation
                .consolidate()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_wire()))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedder).await?;
            }
        },
    }

    Ok(())
}
