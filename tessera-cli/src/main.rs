//! Tessera CLI
//!
//! Command-line interface for submitting and tracking prediction jobs.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera prediction job CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "TESSERA_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    /// Owner the requests are made for
    #[arg(long, env = "TESSERA_OWNER_ID")]
    owner: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
        owner_id: cli.owner,
    };

    handle_command(cli.command, &config).await
}
