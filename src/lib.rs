//! Tributary
//!
//! A single-process scheduling kernel for batch data-ingestion jobs: jobs are
//! split into work units, run as tasks on a bounded worker pool with retries,
//! and reported exactly once to a listener when the run is terminal.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod logger;

pub use engine::{Engine, EngineOptions};

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
