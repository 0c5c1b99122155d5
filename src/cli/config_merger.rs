//! Configuration merger for CLI arguments and config files
//!
//! CLI arguments override configuration file and environment values.

use super::parser::{Cli, Commands, EngineOverrides};
use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, settings::Settings};

pub struct ConfigurationMerger {
    base_config: Settings,
}

impl ConfigurationMerger {
    pub fn new(base_config: Settings) -> Self {
        Self { base_config }
    }

    /// Load the base settings the way `cli` selects: `--config` switches to
    /// single-file mode and `--env` replaces `TRIBUTARY_APP_ENV`.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut loader = ConfigLoader::new()?;
        if let Some(path) = &cli.config {
            loader = loader.with_file(path.clone());
        }
        if let Some(env) = cli.env {
            loader = loader.with_environment(env.into());
        }
        Ok(Self::new(loader.load()?))
    }

    /// Apply CLI overrides to the base settings and validate the result.
    pub fn merge_cli_args(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut config = self.base_config.clone();

        if let Some(level) = cli.log_level_override() {
            config.logger.level = level.to_string();
        }

        match &cli.command {
            Commands::Run { overrides, .. } | Commands::Schedule { overrides, .. } => {
                Self::apply_engine_overrides(&mut config, overrides);
            }
            Commands::State { .. } => {}
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_engine_overrides(config: &mut Settings, overrides: &EngineOverrides) {
        if let Some(pool_size) = overrides.pool_size {
            config.engine.executor.pool_size = pool_size;
        }
        if let Some(max_retries) = overrides.max_retries {
            config.engine.retry.max_retries = max_retries;
        }
    }

    pub fn config(&self) -> &Settings {
        &self.base_config
    }
}
