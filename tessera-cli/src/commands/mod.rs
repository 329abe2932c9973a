//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod batch;
mod job;

pub use batch::BatchCommands;
pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Individual jobs (and reading or cancelling any job)
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Batches of jobs
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Batch { command } => batch::handle_batch_command(command, config).await,
    }
}
