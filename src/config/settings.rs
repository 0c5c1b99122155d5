//! Configuration settings structures for tributary
//!
//! Everything here can be loaded from TOML files and `TRIBUTARY_*`
//! environment variables; every field has a default.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::engine::EngineOptions;
use crate::jobs::{ExecutorConfig, ManagerDefaults, RetryPolicy, TrackerConfig};
use crate::logger::{
    ConsoleConfig, FileConfig, LogFormat, LoggerConfig, RotationConfig, RotationStrategy,
};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "tributary".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/tributary.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation_strategy() -> String {
    "size".to_string()
}

fn default_max_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_files() -> usize {
    5
}

fn default_pool_size() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_pool_core_size() -> usize {
    2
}

fn default_pool_max_size() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stall_threshold_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_state_directory() -> String {
    "state-store".to_string()
}

fn default_jobs_directory() -> String {
    "jobs".to_string()
}

// ============================================================================
// Application Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Logger Configuration
// ============================================================================

/// Console output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Colour output; ignored when stdout is not a terminal
    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

/// Rotation settings for file logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSettings {
    /// "size", "combined", "time"/"daily", "hourly", "weekly" or "monthly"
    #[serde(default = "default_rotation_strategy")]
    pub strategy: String,

    /// Maximum file size in bytes before rotation
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Rotated files kept on disk
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            strategy: default_rotation_strategy(),
            max_size: default_max_size(),
            max_files: default_max_files(),
        }
    }
}

/// File output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// "full", "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(default)]
    pub rotation: RotationSettings,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
            rotation: RotationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// "trace", "debug", "info", "warn" or "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime [`LoggerConfig`].
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let console = self.console.into_console_config();
        let file = self.file.into_file_config()?;

        LoggerConfig::new(console, file, self.level)
            .map_err(|e| ConfigError::validation("logger", e.to_string()))
    }
}

impl ConsoleSettings {
    pub fn into_console_config(self) -> ConsoleConfig {
        ConsoleConfig::new(self.enabled, self.colored)
    }
}

impl FileSettings {
    pub fn into_file_config(self) -> Result<FileConfig, ConfigError> {
        let format = self
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", e.to_string()))?;
        let rotation = self.rotation.into_rotation_config()?;

        let config = FileConfig {
            enabled: self.enabled,
            path: PathBuf::from(self.path),
            append: self.append,
            format,
            rotation,
        };
        config
            .validate()
            .map_err(|e| ConfigError::validation("logger.file", e.to_string()))?;
        Ok(config)
    }
}

impl RotationSettings {
    pub fn into_rotation_config(self) -> Result<RotationConfig, ConfigError> {
        let strategy = self.strategy.parse::<RotationStrategy>().map_err(|e| {
            ConfigError::validation("logger.file.rotation.strategy", e.to_string())
        })?;

        let config = RotationConfig {
            strategy,
            max_size: self.max_size,
            max_files: self.max_files,
        };
        config
            .validate()
            .map_err(|e| ConfigError::validation("logger.file.rotation", e.to_string()))?;
        Ok(config)
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Concurrent task attempts
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Submissions buffered before dispatch blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(default = "default_pool_core_size")]
    pub pool_core_size: usize,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            pool_core_size: default_pool_core_size(),
            pool_max_size: default_pool_max_size(),
            poll_interval_ms: default_poll_interval_ms(),
            stall_threshold_secs: default_stall_threshold_secs(),
        }
    }
}

/// Engine-wide retry policy; jobs may override it with `task.*` keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.delay_ms),
            self.backoff_multiplier,
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub tracker: TrackerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-attempt timeout in seconds, 0 for none
    #[serde(default)]
    pub task_timeout_secs: u64,

    /// Bound for each service's stop stage
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            tracker: TrackerSettings::default(),
            retry: RetrySettings::default(),
            task_timeout_secs: 0,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn to_options(&self) -> EngineOptions {
        EngineOptions {
            executor: ExecutorConfig {
                pool_size: self.executor.pool_size,
                queue_capacity: self.executor.queue_capacity,
            },
            tracker: TrackerConfig {
                pool_core_size: self.tracker.pool_core_size,
                pool_max_size: self.tracker.pool_max_size,
                poll_interval: Duration::from_millis(self.tracker.poll_interval_ms),
                stall_threshold: Duration::from_secs(self.tracker.stall_threshold_secs),
            },
            defaults: ManagerDefaults {
                retry_policy: self.retry.to_policy(),
                task_timeout: (self.task_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.task_timeout_secs)),
            },
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

// ============================================================================
// State Store Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStoreBackend {
    /// One JSON file per run under `directory`
    #[default]
    Fs,
    /// Process-local, lost on exit
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStoreConfig {
    #[serde(default)]
    pub backend: StateStoreBackend,

    #[serde(default = "default_state_directory")]
    pub directory: String,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            backend: StateStoreBackend::default(),
            directory: default_state_directory(),
        }
    }
}

// ============================================================================
// Jobs Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Job TOML files picked up by `schedule` when none are given
    #[serde(default = "default_jobs_directory")]
    pub directory: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            directory: default_jobs_directory(),
        }
    }
}

// ============================================================================
// Main Settings Structure
// ============================================================================

/// Complete application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub logger: LoggerSettings,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub state_store: StateStoreConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================================================
    // Arbitrary implementations for property-based testing
    // ========================================================================

    fn arb_application_config() -> impl Strategy<Value = ApplicationConfig> {
        (
            "[a-z][a-z0-9-]{0,20}",
            "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
        )
            .prop_map(|(name, version)| ApplicationConfig { name, version })
    }

    fn arb_logger_settings() -> impl Strategy<Value = LoggerSettings> {
        (
            prop::sample::select(vec!["trace", "debug", "info", "warn", "error"]),
            any::<bool>(),
            any::<bool>(),
            "[a-z]{1,10}/[a-z]{1,10}\\.log",
            prop::sample::select(vec!["full", "compact", "json"]),
            prop::sample::select(vec!["size", "daily", "hourly", "combined"]),
            1u64..1_000_000_000,
            1usize..100,
        )
            .prop_map(
                |(level, console, file, path, format, strategy, max_size, max_files)| {
                    LoggerSettings {
                        level: level.to_string(),
                        // At least one output stays enabled.
                        console: ConsoleSettings {
                            enabled: console || !file,
                            colored: console,
                        },
                        file: FileSettings {
                            enabled: file,
                            path,
                            append: true,
                            format: format.to_string(),
                            rotation: RotationSettings {
                                strategy: strategy.to_string(),
                                max_size,
                                max_files,
                            },
                        },
                    }
                },
            )
    }

    fn arb_engine_config() -> impl Strategy<Value = EngineConfig> {
        (
            1usize..64,
            1usize..1024,
            1usize..8,
            0usize..8,
            0u32..10,
            1u64..10_000,
            // Multipliers with an exact TOML representation
            prop::sample::select(vec![1.0, 1.5, 2.0, 3.0]),
            0u64..600,
        )
            .prop_map(
                |(pool, queue, core, extra, retries, delay, multiplier, timeout)| EngineConfig {
                    executor: ExecutorSettings {
                        pool_size: pool,
                        queue_capacity: queue,
                    },
                    tracker: TrackerSettings {
                        pool_core_size: core,
                        pool_max_size: core + extra,
                        poll_interval_ms: delay,
                        stall_threshold_secs: 300,
                    },
                    retry: RetrySettings {
                        max_retries: retries,
                        delay_ms: delay,
                        backoff_multiplier: multiplier,
                        max_delay_ms: delay * 10,
                    },
                    task_timeout_secs: timeout,
                    shutdown_timeout_secs: 30,
                },
            )
    }

    fn arb_settings() -> impl Strategy<Value = Settings> {
        (
            arb_application_config(),
            arb_logger_settings(),
            arb_engine_config(),
            prop::sample::select(vec![StateStoreBackend::Fs, StateStoreBackend::Memory]),
            "[a-z]{1,12}",
        )
            .prop_map(|(application, logger, engine, backend, directory)| Settings {
                application,
                logger,
                engine,
                state_store: StateStoreConfig {
                    backend,
                    directory: directory.clone(),
                },
                jobs: JobsConfig { directory },
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_settings_round_trip_serialization(settings in arb_settings()) {
            let toml_str = toml::to_string(&settings).unwrap();
            let deserialized: Settings = toml::from_str(&toml_str).unwrap();
            prop_assert_eq!(settings, deserialized);
        }

        #[test]
        fn prop_generated_settings_validate(settings in arb_settings()) {
            prop_assert!(settings.validate().is_ok());
        }
    }

    // ========================================================================
    // Unit tests
    // ========================================================================

    #[test]
    fn test_application_config_defaults() {
        let config = ApplicationConfig::default();
        assert_eq!(config.name, "tributary");
        assert_eq!(config.version, crate::pkg_version());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.engine.executor.pool_size, 4);
        assert_eq!(settings.state_store.backend, StateStoreBackend::Fs);
        assert_eq!(settings.jobs.directory, "jobs");
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[engine.retry]
max_retries = 7

[state_store]
backend = "memory"
"#,
        )
        .unwrap();
        assert_eq!(settings.engine.retry.max_retries, 7);
        assert_eq!(settings.engine.retry.delay_ms, 1000);
        assert_eq!(settings.state_store.backend, StateStoreBackend::Memory);
        assert_eq!(settings.state_store.directory, "state-store");
    }

    #[test]
    fn test_engine_options_conversion() {
        let mut engine = EngineConfig::default();
        engine.executor.pool_size = 8;
        engine.tracker.poll_interval_ms = 250;
        engine.retry.delay_ms = 500;

        let options = engine.to_options();
        assert_eq!(options.executor.pool_size, 8);
        assert_eq!(options.tracker.poll_interval, Duration::from_millis(250));
        assert_eq!(options.defaults.retry_policy.delay, Duration::from_millis(500));
        assert_eq!(options.defaults.task_timeout, None);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(30));

        engine.task_timeout_secs = 5;
        assert_eq!(
            engine.to_options().defaults.task_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_logger_settings_conversion() {
        let settings = LoggerSettings {
            level: "debug".to_string(),
            console: ConsoleSettings::default(),
            file: FileSettings {
                enabled: true,
                format: "compact".to_string(),
                rotation: RotationSettings {
                    strategy: "hourly".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        };

        let config = settings.into_logger_config().unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.file.format, LogFormat::Compact);
        assert_eq!(
            config.file.rotation.strategy,
            RotationStrategy::Time(crate::logger::TimeUnit::Hourly)
        );
    }

    #[test]
    fn test_unknown_rotation_strategy_names_field() {
        let mut settings = LoggerSettings::default();
        settings.file.rotation.strategy = "count".to_string();
        let err = settings.into_logger_config().unwrap_err();
        assert_eq!(err.field(), Some("logger.file.rotation.strategy"));
    }
}
