//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod run;
mod system;

pub use job::JobCommands;
pub use run::RunArgs;
pub use system::SystemCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a work item file locally, without a server
    Run(RunArgs),
    /// Job management on a server
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Server resource status
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// Result indicating success or failure
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run_command(args).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::System { command } => system::handle_system_command(command, config).await,
    }
}
