//! CLI argument parsing with clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use super::validation;

/// Batch job scheduler for file ingestion pipelines
#[derive(Parser, Debug)]
#[command(name = "tributary")]
#[command(about = "Batch job scheduler for file ingestion pipelines")]
#[command(long_about = "
Tributary splits data-ingestion jobs into work units, runs them on a bounded
worker pool with retries, and records every run in a state store.

EXAMPLES:
    # Run two jobs once and wait for them
    tributary run jobs/orders.toml jobs/customers.toml

    # Check job files without running anything
    tributary run --dry-run jobs/orders.toml

    # Start the scheduler with every job under jobs.directory
    tributary schedule

    # Use a single configuration file in production mode
    tributary --config /etc/tributary.toml --env production schedule

    # Show the last run of a job, then its whole history
    tributary state orders
    tributary state orders --history
")]
#[command(version = crate::clap_long_version())]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    ///
    /// Read only this TOML file instead of the layered configuration
    /// directory. `TRIBUTARY_*` environment variables still apply.
    #[arg(short, long, global = true, value_name = "FILE", value_parser = validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects which `{environment}.toml` layer is loaded.
    #[arg(short, long, global = true, value_enum)]
    pub env: Option<Environment>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run jobs once and wait for them to finish
    ///
    /// Exits non-zero if any job does not end COMMITTED.
    ///
    /// Examples:
    ///   tributary run jobs/orders.toml
    ///   tributary run --pool-size 8 --max-retries 1 jobs/*.toml
    Run {
        /// Job definition files (TOML)
        #[arg(required = true, value_name = "JOB_FILE", value_parser = validation::validate_job_file_path)]
        jobs: Vec<PathBuf>,

        /// Validate job files and settings, then exit
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        overrides: EngineOverrides,
    },

    /// Start the engine and run scheduled jobs until interrupted
    ///
    /// Without job files, every `*.toml` in `jobs.directory` is scheduled.
    Schedule {
        #[arg(value_name = "JOB_FILE", value_parser = validation::validate_job_file_path)]
        jobs: Vec<PathBuf>,

        #[command(flatten)]
        overrides: EngineOverrides,
    },

    /// Print the persisted state of a job
    State {
        #[arg(value_name = "JOB_NAME", value_parser = validation::validate_job_name)]
        job_name: String,

        /// List every recorded run, oldest first
        #[arg(long)]
        history: bool,
    },
}

/// Engine settings that can be overridden per invocation
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOverrides {
    /// Executor worker count
    #[arg(long, value_name = "N", value_parser = validation::validate_pool_size)]
    pub pool_size: Option<usize>,

    /// Default retry budget for tasks
    #[arg(long, value_name = "N", value_parser = validation::validate_max_retries)]
    pub max_retries: Option<u32>,
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

impl Cli {
    /// Level forced by `--verbose` or `--quiet`, if any.
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("error")
        } else {
            None
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}
