//! Command executor for dispatching CLI commands

use super::handlers::{RunCommandHandler, ScheduleCommandHandler, StateCommandHandler};
use super::parser::{Cli, Commands};
use crate::config::settings::Settings;
use crate::engine::shutdown_signal;
use crate::error::AppResult;

/// Execute a CLI command with merged and validated settings.
pub async fn execute_command(cli: &Cli, settings: Settings) -> AppResult<()> {
    match &cli.command {
        Commands::Run { jobs, dry_run, .. } => {
            RunCommandHandler::new(settings).execute(jobs, *dry_run).await
        }
        Commands::Schedule { jobs, .. } => {
            ScheduleCommandHandler::new(settings)
                .execute(jobs, shutdown_signal())
                .await
        }
        Commands::State { job_name, history } => {
            StateCommandHandler::new(&settings)
                .execute(job_name, *history)
                .await
        }
    }
}
