//! Configuration validation logic
//!
//! Range and format checks for every settings section. Errors name the
//! dotted field path so they can be traced back to the TOML key or the
//! `TRIBUTARY_*` variable that set it.

use crate::config::error::ConfigError;
use crate::config::settings::{
    EngineConfig, FileSettings, LoggerSettings, Settings, StateStoreBackend, StateStoreConfig,
};
use crate::logger::{LogFormat, RotationStrategy};

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn positive(field: &str, value: u64, what: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::validation(
            field,
            format!("{} must be greater than 0.", what),
        ));
    }
    Ok(())
}

impl FileSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if let Err(e) = self.format.parse::<LogFormat>() {
            return Err(ConfigError::validation("logger.file.format", e.to_string()));
        }

        if let Err(e) = self.rotation.strategy.parse::<RotationStrategy>() {
            return Err(ConfigError::validation(
                "logger.file.rotation.strategy",
                e.to_string(),
            ));
        }

        positive(
            "logger.file.rotation.max_size",
            self.rotation.max_size,
            "Maximum log file size",
        )?;
        positive(
            "logger.file.rotation.max_files",
            self.rotation.max_files as u64,
            "Maximum number of rotated files",
        )
    }
}

impl LoggerSettings {
    /// Validate logger settings
    ///
    /// # Validation Rules
    /// - Log level must be one of: trace, debug, info, warn, error
    /// - At least one of console and file output is enabled
    /// - File format and rotation strategy must parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.level.trim().to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                field: "logger.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        if !self.console.enabled && !self.file.enabled {
            return Err(ConfigError::validation(
                "logger",
                "At least one output (console or file) must be enabled.",
            ));
        }

        self.file.validate()
    }
}

impl EngineConfig {
    /// Validate engine sizing, retry and timeout settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive(
            "engine.executor.pool_size",
            self.executor.pool_size as u64,
            "Executor pool size",
        )?;
        positive(
            "engine.executor.queue_capacity",
            self.executor.queue_capacity as u64,
            "Executor queue capacity",
        )?;
        positive(
            "engine.tracker.pool_core_size",
            self.tracker.pool_core_size as u64,
            "Tracker core pool size",
        )?;

        if self.tracker.pool_max_size < self.tracker.pool_core_size {
            return Err(ConfigError::ValidationError {
                field: "engine.tracker.pool_max_size".to_string(),
                message: format!(
                    "Tracker max pool size ({}) cannot be below its core size ({}).",
                    self.tracker.pool_max_size, self.tracker.pool_core_size
                ),
            });
        }

        positive(
            "engine.tracker.poll_interval_ms",
            self.tracker.poll_interval_ms,
            "Tracker poll interval",
        )?;

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::validation(
                "engine.retry.backoff_multiplier",
                "Backoff multiplier must be a finite number of at least 1.0.",
            ));
        }

        if self.retry.max_delay_ms < self.retry.delay_ms {
            return Err(ConfigError::ValidationError {
                field: "engine.retry.max_delay_ms".to_string(),
                message: format!(
                    "Maximum retry delay ({}ms) cannot be below the initial delay ({}ms).",
                    self.retry.max_delay_ms, self.retry.delay_ms
                ),
            });
        }

        positive(
            "engine.shutdown_timeout_secs",
            self.shutdown_timeout_secs,
            "Shutdown timeout",
        )
    }
}

impl StateStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StateStoreBackend::Fs && self.directory.trim().is_empty() {
            return Err(ConfigError::validation(
                "state_store.directory",
                "A directory is required for the fs state store.",
            ));
        }
        Ok(())
    }
}

impl Settings {
    /// Validate every section, returning the first error encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logger.validate()?;
        self.engine.validate()?;
        self.state_store.validate()?;

        if self.jobs.directory.trim().is_empty() {
            return Err(ConfigError::validation(
                "jobs.directory",
                "Jobs directory cannot be empty.",
            ));
        }
        Ok(())
    }
}
