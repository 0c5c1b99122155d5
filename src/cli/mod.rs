//! Command line interface for tributary
//!
//! Parsing, merging CLI overrides into the loaded settings, and the
//! `run`, `schedule` and `state` command handlers.

pub mod config_merger;
pub mod executor;
pub mod handlers;
pub mod parser;
pub mod validation;

pub use config_merger::ConfigurationMerger;
pub use executor::execute_command;
pub use parser::{Cli, Commands, EngineOverrides, Environment};

use crate::config::settings::Settings;
use crate::error::AppResult;
use crate::logger::{init_logger, LogLevelHandle};

/// Load settings the way `cli` selects and apply its overrides.
///
/// # Errors
///
/// Returns the loading, merging or validation error; the caller decides how
/// to report it.
pub fn load_and_merge_config(cli: &Cli) -> AppResult<Settings> {
    let merger = ConfigurationMerger::from_cli(cli)?;
    Ok(merger.merge_cli_args(cli)?)
}

/// Install the global subscriber from the `logger` settings section.
pub fn init_logger_from_settings(settings: &Settings) -> AppResult<LogLevelHandle> {
    let logger_config = settings.logger.clone().into_logger_config()?;
    Ok(init_logger(logger_config)?)
}
