//! Logging setup on top of `tracing-subscriber`.
//!
//! Console and file outputs can be enabled independently. The file output
//! rotates by size or time, and the level filter can be swapped at runtime
//! through [`LogLevelHandle`].

pub mod config;
pub mod error;
pub mod rotation;
pub(crate) mod writer;

#[cfg(test)]
mod tests;

pub use config::*;
pub use error::LoggerError;

use std::io::IsTerminal;
use std::sync::Arc;

use tracing_subscriber::{
    fmt,
    layer::{Layered, SubscriberExt},
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};
use writer::RotatingFileWriter;

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Changes the active level filter after initialization.
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: Arc<reload::Handle<EnvFilter, Registry>>,
}

impl LogLevelHandle {
    /// Accepts a level name or any `EnvFilter` directive string,
    /// e.g. `info,tributary::jobs=debug`.
    pub fn set_level(&self, level: &str) -> Result<(), LoggerError> {
        let filter = EnvFilter::try_new(level).map_err(|e| LoggerError::Filter {
            directive: level.to_string(),
            message: e.to_string(),
        })?;
        self.inner
            .reload(filter)
            .map_err(|e| LoggerError::Init(format!("failed to reload log filter: {}", e)))
    }

    pub fn current_level(&self) -> Option<String> {
        self.inner.with_current(|filter| filter.to_string()).ok()
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails on an invalid configuration, when the log file cannot be opened, or
/// when a global subscriber is already set.
pub fn init_logger(config: LoggerConfig) -> anyhow::Result<LogLevelHandle> {
    config.validate()?;

    let filter = EnvFilter::try_new(config.level.trim())
        .map_err(|e| LoggerError::Filter {
            directive: config.level.clone(),
            message: e.to_string(),
        })?;
    let (filter, handle) = reload::Layer::new(filter);

    // File before console, or ANSI escapes leak into span fields in the file.
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.file.enabled {
        layers.push(file_layer(&config.file)?);
    }
    if config.console.enabled {
        layers.push(console_layer(&config.console));
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))?;

    Ok(LogLevelHandle {
        inner: Arc::new(handle),
    })
}

fn console_layer(config: &ConsoleConfig) -> BoxedLayer {
    let use_ansi = config.colored && std::io::stdout().is_terminal();
    fmt::layer()
        .with_ansi(use_ansi)
        .with_target(true)
        .with_level(true)
        .boxed()
}

fn file_layer(config: &FileConfig) -> Result<BoxedLayer, LoggerError> {
    let writer = RotatingFileWriter::new(config)?;
    let layer = match config.format {
        LogFormat::Full => fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .compact()
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed(),
    };
    Ok(layer)
}
