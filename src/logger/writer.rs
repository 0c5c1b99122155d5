//! File writer with rotation for the fmt layer

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;

use crate::logger::config::FileConfig;
use crate::logger::error::LoggerError;
use crate::logger::rotation::RotationManager;

/// Shared handle to the active log file. Each event gets a short-lived
/// [`RotatingWriterGuard`].
#[derive(Clone)]
pub struct RotatingFileWriter {
    state: Arc<Mutex<WriterState>>,
}

struct WriterState {
    path: PathBuf,
    file: BufWriter<File>,
    written: u64,
    rotation: RotationManager,
    /// Set after a failed write or rotation; events then go to stderr.
    fallback: bool,
}

impl WriterState {
    fn rotate(&mut self) -> Result<(), LoggerError> {
        self.file.flush()?;
        self.rotation.rotate(&self.path)?;
        self.file = open_log_file(&self.path, false)?;
        self.written = 0;
        Ok(())
    }

    fn enter_fallback(&mut self, error: &dyn std::fmt::Display) {
        if !self.fallback {
            eprintln!(
                "[tributary] writing {} failed, logging to stderr: {}",
                self.path.display(),
                error
            );
        }
        self.fallback = true;
    }
}

impl RotatingFileWriter {
    pub fn new(config: &FileConfig) -> Result<Self, LoggerError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = open_log_file(&config.path, config.append)?;
        let written = if config.append {
            std::fs::metadata(&config.path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            state: Arc::new(Mutex::new(WriterState {
                path: config.path.clone(),
                file,
                written,
                rotation: RotationManager::new(config.rotation.clone()),
                fallback: false,
            })),
        })
    }

    pub fn is_in_fallback_mode(&self) -> bool {
        self.lock().fallback
    }

    /// Reopen the log file after a failure. Returns whether file output resumed.
    pub fn try_recover(&self) -> bool {
        let mut state = self.lock();
        if !state.fallback {
            return true;
        }
        match open_log_file(&state.path, true) {
            Ok(file) => {
                state.written = std::fs::metadata(&state.path).map(|m| m.len()).unwrap_or(0);
                state.file = file;
                state.fallback = false;
                true
            }
            Err(_) => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard {
            state: Arc::clone(&self.state),
        }
    }
}

pub struct RotatingWriterGuard {
    state: Arc<Mutex<WriterState>>,
}

impl RotatingWriterGuard {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for RotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.fallback {
            return io::stderr().write(buf);
        }

        if state.rotation.should_rotate(state.written) {
            if let Err(e) = state.rotate() {
                state.enter_fallback(&e);
                return io::stderr().write(buf);
            }
        }

        match state.file.write(buf) {
            Ok(n) => {
                state.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                state.enter_fallback(&e);
                io::stderr().write(buf)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.fallback {
            return io::stderr().flush();
        }
        state.file.flush()
    }
}

impl Drop for RotatingWriterGuard {
    fn drop(&mut self) {
        let _ = self.lock().file.flush();
    }
}

fn open_log_file(path: &Path, append: bool) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    Ok(BufWriter::new(file))
}
