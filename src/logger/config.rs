//! Runtime logger configuration

use std::path::PathBuf;
use std::str::FromStr;

use jiff::{Span, ToSpan};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::logger::error::LoggerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub console: ConsoleConfig,
    pub file: FileConfig,
    /// One of trace, debug, info, warn or error.
    pub level: String,
}

impl LoggerConfig {
    pub fn new(console: ConsoleConfig, file: FileConfig, level: String) -> Result<Self, LoggerError> {
        let config = Self {
            console,
            file,
            level,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        self.parse_level()?;
        self.file.validate()?;
        if !self.console.enabled && !self.file.enabled {
            return Err(LoggerError::config(
                "at least one output (console or file) must be enabled",
            ));
        }
        Ok(())
    }

    pub fn parse_level(&self) -> Result<Level, LoggerError> {
        Level::from_str(self.level.trim()).map_err(|_| {
            LoggerError::config(format!(
                "invalid log level '{}', expected one of: trace, debug, info, warn, error",
                self.level
            ))
        })
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// ANSI colours; only honoured when stdout is a terminal.
    pub colored: bool,
}

impl ConsoleConfig {
    pub fn new(enabled: bool, colored: bool) -> Self {
        Self { enabled, colored }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            colored: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub append: bool,
    pub format: LogFormat,
    pub rotation: RotationConfig,
}

impl FileConfig {
    /// Pure check; the writer creates missing directories on open.
    pub fn validate(&self) -> Result<(), LoggerError> {
        if !self.enabled {
            return Ok(());
        }
        if self.path.as_os_str().is_empty() {
            return Err(LoggerError::config(
                "file path cannot be empty when file output is enabled",
            ));
        }
        self.rotation.validate()
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("logs/tributary.log"),
            append: true,
            format: LogFormat::Json,
            rotation: RotationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggerError::config(format!(
                "invalid log format '{}', expected one of: full, compact, json",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub strategy: RotationStrategy,
    /// Bytes written to the active file before a size rotation.
    pub max_size: u64,
    /// Rotated files kept next to the active one.
    pub max_files: usize,
}

impl RotationConfig {
    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.max_size == 0 {
            return Err(LoggerError::config("maximum file size must be greater than 0"));
        }
        if self.max_files == 0 {
            return Err(LoggerError::config("maximum number of files must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::Size,
            max_size: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RotationStrategy {
    #[default]
    Size,
    Time(TimeUnit),
    /// Size, or once a day, whichever comes first.
    Combined,
}

impl FromStr for RotationStrategy {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "size" => Ok(RotationStrategy::Size),
            "combined" => Ok(RotationStrategy::Combined),
            "time" | "daily" => Ok(RotationStrategy::Time(TimeUnit::Daily)),
            "hourly" => Ok(RotationStrategy::Time(TimeUnit::Hourly)),
            "weekly" => Ok(RotationStrategy::Time(TimeUnit::Weekly)),
            "monthly" => Ok(RotationStrategy::Time(TimeUnit::Monthly)),
            _ => Err(LoggerError::config(format!(
                "invalid rotation strategy '{}', expected one of: size, combined, \
                 time, hourly, daily, weekly, monthly",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeUnit {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl TimeUnit {
    /// Calendar span between rotations; months follow the calendar.
    pub fn span(&self) -> Span {
        match self {
            TimeUnit::Hourly => 1.hour(),
            TimeUnit::Daily => 1.day(),
            TimeUnit::Weekly => 1.week(),
            TimeUnit::Monthly => 1.month(),
        }
    }
}
