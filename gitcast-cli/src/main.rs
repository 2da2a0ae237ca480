//! Gitcast CLI
//!
//! Command-line interface for submitting repositories to the Gitcast
//! orchestrator and following the resulting jobs.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "gitcast")]
#[command(about = "Turn code repositories into narrated videos", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "GITCAST_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    /// Identity used by the orchestrator for rate limiting
    #[arg(long, env = "GITCAST_CLIENT_ID")]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
        client_id: cli.client_id,
    };

    handle_command(cli.command, &config).await
}
